//! One-time secret lifecycle: write, then read at most once.
//!
//! ```text
//!            wrong passphrase (tries - 1 > 0)
//!                 ┌──────────┐
//!                 ▼          │
//!  write ──▶  Created ───────┘
//!                 │
//!                 ├── correct passphrase ──────────▶ Revealed            (deleted)
//!                 ├── wrong passphrase, last try ──▶ ExhaustedAndDeleted (deleted)
//!                 └── expires_at <= now ───────────▶ Expired             (deleted)
//! ```
//!
//! Every terminal state deletes the row, so any later read is `NotFound`.
//! Per-row atomicity comes from the store's compare-and-set operations: a
//! plaintext is only returned by the caller whose delete actually removed the
//! row, and a try is only consumed by the caller whose conditional update or
//! conditional delete matched the count it read.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::crypto::{CryptoError, EnvelopeCodec};
use crate::secret::{expires_on_text, generate_external_id, NewSecret, Secret};
use crate::store::{LivenessCheck, SecretStore, StoreError};
use crate::validation::{
    self, BreachChecker, PassphrasePolicy, StrengthPolicy, ValidationError,
};

/// Attempts at drawing an unused external id before giving up.
pub const MAX_ID_ATTEMPTS: usize = 10;

/// Each lost race means another reader consumed a try, so the largest
/// allowed tries count also bounds the rounds a reader can lose.
const MAX_BOOKKEEPING_ROUNDS: usize = 10;

/// What a read does with a secret whose `expires_at` has passed but which
/// the sweeper has not removed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpiredReadPolicy {
    /// Treat it as gone and delete it on the spot.
    #[default]
    Reject,
    /// Keep serving it until the sweeper runs.
    ServeUntilSwept,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSettings {
    /// Maximum plaintext length in characters.
    pub secret_max_length: usize,
    pub expired_reads: ExpiredReadPolicy,
    /// Run the breach lookup on every write, not only when requested.
    pub breach_check_always: bool,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            secret_max_length: 250,
            expired_reads: ExpiredReadPolicy::Reject,
            breach_check_always: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub secret: String,
    pub passphrase: String,
    /// Expiration code such as `1d`.
    pub expire: String,
    pub tries: u32,
    /// Look the passphrase up in the breach corpus.
    pub check_breach: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResult {
    pub external_id: String,
    pub expires_at: DateTime<Utc>,
    /// Human-readable form of `expires_at`.
    pub expires_on: String,
}

/// Result of a read attempt. All four are expected outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Revealed(String),
    WrongPassphrase { remaining: u32 },
    ExhaustedAndDeleted,
    NotFound,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Repository unavailable: {0}")]
    RepositoryUnavailable(String),

    #[error("Could not allocate a unique external id after {0} attempts")]
    IdSpaceExhausted(usize),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        ServiceError::RepositoryUnavailable(e.to_string())
    }
}

/// The lifecycle engine. All collaborators are injected.
pub struct SecretService {
    store: Arc<dyn SecretStore>,
    clock: Arc<dyn Clock>,
    codec: EnvelopeCodec,
    passphrase_policy: Arc<dyn PassphrasePolicy>,
    breach_checker: Option<Arc<dyn BreachChecker>>,
    liveness: LivenessCheck,
    settings: LifecycleSettings,
}

impl SecretService {
    pub fn new(store: Arc<dyn SecretStore>, clock: Arc<dyn Clock>, codec: EnvelopeCodec) -> Self {
        Self {
            store,
            clock,
            codec,
            passphrase_policy: Arc::new(StrengthPolicy::default()),
            breach_checker: None,
            liveness: LivenessCheck::default(),
            settings: LifecycleSettings::default(),
        }
    }

    pub fn with_passphrase_policy(mut self, policy: Arc<dyn PassphrasePolicy>) -> Self {
        self.passphrase_policy = policy;
        self
    }

    pub fn with_breach_checker(mut self, checker: Arc<dyn BreachChecker>) -> Self {
        self.breach_checker = Some(checker);
        self
    }

    pub fn with_liveness(mut self, liveness: LivenessCheck) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn with_settings(mut self, settings: LifecycleSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn SecretStore> {
        &self.store
    }

    /// Encrypt and persist a new secret.
    pub async fn write(&self, request: WriteRequest) -> Result<WriteResult, ServiceError> {
        let plaintext = validation::validate_secret(&request.secret, self.settings.secret_max_length)?;
        validation::validate_passphrase(self.passphrase_policy.as_ref(), &request.passphrase)?;
        let expiration = validation::validate_expiration(&request.expire)?;
        let tries = validation::validate_tries(request.tries)?;

        if request.check_breach || self.settings.breach_check_always {
            if let Some(checker) = &self.breach_checker {
                validation::check_breach(checker.as_ref(), &request.passphrase).await?;
            }
        }

        self.liveness.ensure_alive(self.store.as_ref()).await?;

        let created_at = self.clock.now();
        let expires_at = expiration.expires_at(created_at);

        let codec = self.codec;
        let passphrase = request.passphrase;
        let envelope = tokio::task::spawn_blocking(move || {
            codec.seal(plaintext.as_bytes(), &passphrase)
        })
        .await
        .map_err(|e| ServiceError::Internal(format!("Task join error: {}", e)))?
        .map_err(|e| ServiceError::Internal(e.to_string()))?;

        let secret = self
            .insert_with_unique_id(envelope, created_at, expires_at, tries)
            .await?;

        info!(
            external_id = %secret.external_id,
            "Secret created and expires on {}",
            expires_on_text(secret.expires_at)
        );

        Ok(WriteResult {
            external_id: secret.external_id,
            expires_at: secret.expires_at,
            expires_on: expires_on_text(secret.expires_at),
        })
    }

    async fn insert_with_unique_id(
        &self,
        envelope: Vec<u8>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        tries: u32,
    ) -> Result<Secret, ServiceError> {
        for attempt in 1..=MAX_ID_ATTEMPTS {
            let candidate = NewSecret {
                external_id: generate_external_id(),
                envelope: envelope.clone(),
                created_at,
                expires_at,
                tries_remaining: tries,
            };
            match self.store.insert(candidate).await {
                Ok(secret) => return Ok(secret),
                Err(StoreError::DuplicateExternalId) => {
                    debug!(attempt, "External id collision, drawing a new one");
                }
                Err(e) => return Err(e.into()),
            }
        }
        warn!("Gave up allocating an external id after {} attempts", MAX_ID_ATTEMPTS);
        Err(ServiceError::IdSpaceExhausted(MAX_ID_ATTEMPTS))
    }

    /// Attempt to decrypt a secret, consuming it on success or a try on failure.
    pub async fn read(&self, external_id: &str, passphrase: &str) -> Result<ReadOutcome, ServiceError> {
        validation::validate_read(external_id, passphrase)?;
        self.liveness.ensure_alive(self.store.as_ref()).await?;

        let Some(secret) = self.store.get(external_id).await? else {
            warn!(external_id = %external_id, "Tried to read a secret that does not exist");
            return Ok(ReadOutcome::NotFound);
        };

        if self.settings.expired_reads == ExpiredReadPolicy::Reject
            && secret.has_expired(self.clock.now())
        {
            self.store.delete(external_id).await?;
            info!(external_id = %external_id, "Expired secret read before sweep, deleted");
            return Ok(ReadOutcome::NotFound);
        }

        match self.open(&secret, passphrase).await? {
            Ok(plaintext) => {
                // Only the reader whose delete removed the row gets the plaintext.
                if self.store.delete(external_id).await? {
                    info!(external_id = %external_id, "Secret was decrypted and deleted");
                    Ok(ReadOutcome::Revealed(plaintext))
                } else {
                    Ok(ReadOutcome::NotFound)
                }
            }
            Err(CryptoError::InvalidCredential) => {
                self.consume_try(external_id, secret.tries_remaining).await
            }
            Err(e) => Err(ServiceError::Internal(e.to_string())),
        }
    }

    async fn open(
        &self,
        secret: &Secret,
        passphrase: &str,
    ) -> Result<Result<String, CryptoError>, ServiceError> {
        let codec = self.codec;
        let envelope = secret.envelope.clone();
        let passphrase = passphrase.to_string();
        tokio::task::spawn_blocking(move || codec.open_text(&envelope, &passphrase))
            .await
            .map_err(|e| ServiceError::Internal(format!("Task join error: {}", e)))
    }

    /// Decrement tries, or delete on the last one, retrying on lost races.
    async fn consume_try(&self, external_id: &str, mut tries: u32) -> Result<ReadOutcome, ServiceError> {
        for _ in 0..MAX_BOOKKEEPING_ROUNDS {
            let remaining = tries.saturating_sub(1);
            if remaining == 0 {
                if self.store.conditional_delete(external_id, tries).await? {
                    info!(external_id = %external_id, "Tries to open secret exceeded, deleted");
                    return Ok(ReadOutcome::ExhaustedAndDeleted);
                }
            } else if self
                .store
                .conditional_update_tries(external_id, tries, remaining)
                .await?
            {
                info!(
                    external_id = %external_id,
                    remaining,
                    "Wrong passphrase used"
                );
                return Ok(ReadOutcome::WrongPassphrase { remaining });
            }

            // Another reader changed the row first.
            match self.store.get(external_id).await? {
                Some(current) => tries = current.tries_remaining,
                None => return Ok(ReadOutcome::NotFound),
            }
        }
        Err(ServiceError::RepositoryUnavailable(format!(
            "Could not update tries for {} under contention",
            external_id
        )))
    }
}
