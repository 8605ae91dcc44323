//! Input validation for the write and read paths.
//!
//! Everything here runs before any crypto or storage work. The breach lookup
//! is advisory: a lookup failure is logged and the passphrase is accepted.

use std::time::Duration;

use async_trait::async_trait;
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::secret::{is_allowed_tries, ExpirationCode};

/// Default k-anonymity range endpoint.
pub const PWNED_PASSWORDS_API: &str = "https://api.pwnedpasswords.com/range/";

const PWNED_PREFIX_LENGTH: usize = 5;

/// A rejected request. The message is shown to the caller verbatim.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing a secret to encrypt.")]
    MissingSecret,

    #[error("The secret should not exceed {0} characters.")]
    SecretTooLong(usize),

    #[error("Missing a passphrase.")]
    MissingPassphrase,

    #[error(
        "Sorry, your passphrase is too weak. It needs minimum 8 characters, \
         with 1 number and 1 uppercase."
    )]
    WeakPassphrase,

    #[error(
        "This password has been pwned {0} time(s) (haveibeenpwned.com), \
         please chose another one."
    )]
    BreachedPassphrase(u64),

    #[error("Invalid expiration {0:?}. Must be one of: 10m, 30m, 1h, 3h, 6h, 1d, 2d, 3d, 5d, 7d.")]
    InvalidExpiration(String),

    #[error("Invalid number of tries {0}. Must be one of: 3, 5, 10.")]
    InvalidTries(u32),

    #[error("Missing a secret link.")]
    MissingExternalId,
}

/// Passphrase-strength policy.
pub trait PassphrasePolicy: Send + Sync {
    fn check(&self, passphrase: &str) -> Result<(), ValidationError>;
}

/// Minimum length plus at least one uppercase letter, one lowercase letter and one digit.
#[derive(Debug, Clone, Copy)]
pub struct StrengthPolicy {
    pub min_length: usize,
}

impl Default for StrengthPolicy {
    fn default() -> Self {
        Self { min_length: 8 }
    }
}

impl PassphrasePolicy for StrengthPolicy {
    fn check(&self, passphrase: &str) -> Result<(), ValidationError> {
        let strong = passphrase.chars().count() >= self.min_length
            && passphrase.chars().any(|c| c.is_ascii_uppercase())
            && passphrase.chars().any(|c| c.is_ascii_lowercase())
            && passphrase.chars().any(|c| c.is_ascii_digit());
        if strong {
            Ok(())
        } else {
            Err(ValidationError::WeakPassphrase)
        }
    }
}

/// Breached-password lookup.
#[async_trait]
pub trait BreachChecker: Send + Sync {
    /// How many times `passphrase` appears in the breach corpus.
    async fn breach_count(&self, passphrase: &str) -> anyhow::Result<u64>;
}

/// Client for the Pwned Passwords range API.
///
/// Only the first five hex characters of the SHA-1 digest leave the process.
#[derive(Debug, Clone)]
pub struct PwnedPasswords {
    client: reqwest::Client,
    api_url: String,
}

impl PwnedPasswords {
    pub fn new(api_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.into(),
        })
    }
}

#[async_trait]
impl BreachChecker for PwnedPasswords {
    async fn breach_count(&self, passphrase: &str) -> anyhow::Result<u64> {
        let (prefix, suffix) = sha1_range_key(passphrase);
        let url = format!("{}/{}", self.api_url.trim_end_matches('/'), prefix);
        let body = self
            .client
            .get(&url)
            .header("Add-Padding", "true")
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(count_in_range_response(&body, &suffix))
    }
}

/// Upper-case SHA-1 hex digest split into the range prefix and the suffix to look for.
fn sha1_range_key(passphrase: &str) -> (String, String) {
    let digest = hex::encode_upper(Sha1::digest(passphrase.as_bytes()));
    let (prefix, suffix) = digest.split_at(PWNED_PREFIX_LENGTH);
    (prefix.to_string(), suffix.to_string())
}

/// Scan `SUFFIX:COUNT` lines for `suffix`. Padding rows carry a count of zero.
fn count_in_range_response(body: &str, suffix: &str) -> u64 {
    body.lines()
        .filter_map(|line| line.trim().split_once(':'))
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(suffix))
        .and_then(|(_, count)| count.trim().parse().ok())
        .unwrap_or(0)
}

/// Run the breach lookup, treating any failure as "not breached".
pub async fn check_breach(checker: &dyn BreachChecker, passphrase: &str) -> Result<(), ValidationError> {
    match checker.breach_count(passphrase).await {
        Ok(0) => Ok(()),
        Ok(count) => Err(ValidationError::BreachedPassphrase(count)),
        Err(e) => {
            tracing::warn!("Breach lookup failed, accepting passphrase: {}", e);
            Ok(())
        }
    }
}

/// Normalise line endings and enforce the length limit. Returns the text to encrypt.
pub fn validate_secret(secret: &str, max_length: usize) -> Result<String, ValidationError> {
    let normalised = secret.lines().collect::<Vec<_>>().join("\n");
    if normalised.trim().is_empty() {
        return Err(ValidationError::MissingSecret);
    }
    if normalised.chars().count() > max_length {
        return Err(ValidationError::SecretTooLong(max_length));
    }
    Ok(normalised)
}

pub fn validate_passphrase(
    policy: &dyn PassphrasePolicy,
    passphrase: &str,
) -> Result<(), ValidationError> {
    if passphrase.is_empty() {
        return Err(ValidationError::MissingPassphrase);
    }
    policy.check(passphrase)
}

pub fn validate_expiration(code: &str) -> Result<ExpirationCode, ValidationError> {
    code.parse::<ExpirationCode>()
        .ok()
        .filter(ExpirationCode::is_allowed)
        .ok_or_else(|| ValidationError::InvalidExpiration(code.to_string()))
}

pub fn validate_tries(tries: u32) -> Result<u32, ValidationError> {
    if is_allowed_tries(tries) {
        Ok(tries)
    } else {
        Err(ValidationError::InvalidTries(tries))
    }
}

/// Read requests only need both fields present.
pub fn validate_read(external_id: &str, passphrase: &str) -> Result<(), ValidationError> {
    if external_id.trim().is_empty() {
        return Err(ValidationError::MissingExternalId);
    }
    if passphrase.is_empty() {
        return Err(ValidationError::MissingPassphrase);
    }
    Ok(())
}
