//! In-memory secret store (non-persistent).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{SecretStore, StoreError, StoreResult};
use crate::secret::{NewSecret, Secret};

/// Secrets keyed by external id. Every compare-and-set runs under the write lock.
#[derive(Clone)]
pub struct InMemorySecretStore {
    secrets: Arc<RwLock<HashMap<String, Secret>>>,
    next_id: Arc<AtomicI64>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self {
            secrets: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }

    /// Number of live secrets.
    pub async fn len(&self) -> usize {
        self.secrets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.secrets.read().await.is_empty()
    }
}

impl Default for InMemorySecretStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn insert(&self, secret: NewSecret) -> StoreResult<Secret> {
        let mut secrets = self.secrets.write().await;
        if secrets.contains_key(&secret.external_id) {
            return Err(StoreError::DuplicateExternalId);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let secret = Secret::from_new(id, secret);
        secrets.insert(secret.external_id.clone(), secret.clone());
        Ok(secret)
    }

    async fn get(&self, external_id: &str) -> StoreResult<Option<Secret>> {
        Ok(self.secrets.read().await.get(external_id).cloned())
    }

    async fn conditional_update_tries(
        &self,
        external_id: &str,
        expected_tries: u32,
        new_tries: u32,
    ) -> StoreResult<bool> {
        let mut secrets = self.secrets.write().await;
        match secrets.get_mut(external_id) {
            Some(secret) if secret.tries_remaining == expected_tries => {
                secret.tries_remaining = new_tries;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn conditional_delete(&self, external_id: &str, expected_tries: u32) -> StoreResult<bool> {
        let mut secrets = self.secrets.write().await;
        let matches = secrets
            .get(external_id)
            .is_some_and(|secret| secret.tries_remaining == expected_tries);
        if matches {
            secrets.remove(external_id);
        }
        Ok(matches)
    }

    async fn delete(&self, external_id: &str) -> StoreResult<bool> {
        Ok(self.secrets.write().await.remove(external_id).is_some())
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<String>> {
        Ok(self
            .secrets
            .read()
            .await
            .values()
            .filter(|secret| secret.has_expired(now))
            .map(|secret| secret.external_id.clone())
            .collect())
    }
}
