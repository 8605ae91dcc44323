//! Secret storage with pluggable backends.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for testing)
//! - `sqlite`: SQLite database
//!
//! Every mutating call other than `insert` is a compare-and-set on a single
//! row and reports whether it took effect. The lifecycle engine builds its
//! read-then-update-or-delete protocol on those booleans instead of holding
//! locks of its own.

mod liveness;
mod memory;
mod sqlite;

pub use liveness::LivenessCheck;
pub use memory::InMemorySecretStore;
pub use sqlite::SqliteSecretStore;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::secret::{NewSecret, Secret};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("External id already in use")]
    DuplicateExternalId,

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Secret store trait - implemented by all storage backends.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Whether this store persists data across restarts.
    fn is_persistent(&self) -> bool;

    /// Cheap connectivity check.
    async fn ping(&self) -> StoreResult<()>;

    /// Insert a new secret. Fails with `DuplicateExternalId` if the id is taken.
    async fn insert(&self, secret: NewSecret) -> StoreResult<Secret>;

    /// Fetch a secret by external id.
    async fn get(&self, external_id: &str) -> StoreResult<Option<Secret>>;

    /// Set `tries_remaining` to `new_tries` only if it currently equals `expected_tries`.
    async fn conditional_update_tries(
        &self,
        external_id: &str,
        expected_tries: u32,
        new_tries: u32,
    ) -> StoreResult<bool>;

    /// Delete a secret only if its `tries_remaining` equals `expected_tries`.
    async fn conditional_delete(&self, external_id: &str, expected_tries: u32) -> StoreResult<bool>;

    /// Delete a secret unconditionally. Returns whether a row was removed.
    async fn delete(&self, external_id: &str) -> StoreResult<bool>;

    /// External ids of every secret with `expires_at <= now`.
    async fn list_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<String>>;
}

/// Secret store type selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecretStoreType {
    Memory,
    #[default]
    Sqlite,
}

impl SecretStoreType {
    /// Parse from environment variable value.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "sqlite" | "db" => Some(Self::Sqlite),
            _ => None,
        }
    }
}

/// Create a secret store based on type and configuration.
pub async fn create_secret_store(
    store_type: SecretStoreType,
    database_path: PathBuf,
) -> StoreResult<Arc<dyn SecretStore>> {
    match store_type {
        SecretStoreType::Memory => Ok(Arc::new(InMemorySecretStore::new())),
        SecretStoreType::Sqlite => {
            let store = SqliteSecretStore::open(database_path).await?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap()
    }

    fn new_secret(external_id: &str, expires_at: DateTime<Utc>, tries: u32) -> NewSecret {
        NewSecret {
            external_id: external_id.to_string(),
            envelope: vec![1, 2, 3, 4],
            created_at: expires_at - Duration::hours(1),
            expires_at,
            tries_remaining: tries,
        }
    }

    /// Behaviour every backend has to share.
    async fn exercise_store(store: &dyn SecretStore) {
        store.ping().await.expect("ping");

        let inserted = store
            .insert(new_secret("alpha", at(12), 3))
            .await
            .expect("insert alpha");
        assert_eq!(inserted.external_id, "alpha");
        assert_eq!(inserted.tries_remaining, 3);

        let fetched = store.get("alpha").await.unwrap().expect("alpha exists");
        assert_eq!(fetched, inserted);
        assert_eq!(fetched.envelope, vec![1, 2, 3, 4]);
        assert_eq!(fetched.expires_at, at(12));
        assert!(store.get("missing").await.unwrap().is_none());

        // External ids are unique.
        assert!(matches!(
            store.insert(new_secret("alpha", at(13), 5)).await,
            Err(StoreError::DuplicateExternalId)
        ));

        // Compare-and-set on tries.
        assert!(!store.conditional_update_tries("alpha", 2, 1).await.unwrap());
        assert!(store.conditional_update_tries("alpha", 3, 2).await.unwrap());
        assert_eq!(store.get("alpha").await.unwrap().unwrap().tries_remaining, 2);
        assert!(!store.conditional_update_tries("missing", 3, 2).await.unwrap());

        // Conditional delete only fires on the expected count.
        assert!(!store.conditional_delete("alpha", 3).await.unwrap());
        assert!(store.get("alpha").await.unwrap().is_some());
        assert!(store.conditional_delete("alpha", 2).await.unwrap());
        assert!(store.get("alpha").await.unwrap().is_none());

        // Plain delete reports whether anything was removed.
        store.insert(new_secret("beta", at(14), 5)).await.unwrap();
        assert!(store.delete("beta").await.unwrap());
        assert!(!store.delete("beta").await.unwrap());

        // Expiry listing is inclusive of `now`.
        store.insert(new_secret("early", at(8), 5)).await.unwrap();
        store.insert(new_secret("boundary", at(10), 5)).await.unwrap();
        store.insert(new_secret("late", at(20), 5)).await.unwrap();
        let mut expired = store.list_expired(at(10)).await.unwrap();
        expired.sort();
        assert_eq!(expired, vec!["boundary".to_string(), "early".to_string()]);
    }

    #[tokio::test]
    async fn test_memory_store_contract() {
        let store = InMemorySecretStore::new();
        assert!(!store.is_persistent());
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteSecretStore::open(dir.path().join("secrets.db"))
            .await
            .unwrap();
        assert!(store.is_persistent());
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("secrets.db");

        {
            let store = SqliteSecretStore::open(path.clone()).await.unwrap();
            store.insert(new_secret("kept", at(12), 10)).await.unwrap();
        }

        let store = SqliteSecretStore::open(path).await.unwrap();
        let kept = store.get("kept").await.unwrap().expect("row persisted");
        assert_eq!(kept.tries_remaining, 10);
        assert_eq!(kept.created_at, at(11));
    }

    #[tokio::test]
    async fn test_create_secret_store() {
        let dir = tempfile::tempdir().unwrap();
        let memory = create_secret_store(SecretStoreType::Memory, dir.path().join("unused.db"))
            .await
            .unwrap();
        assert!(!memory.is_persistent());

        let sqlite = create_secret_store(SecretStoreType::Sqlite, dir.path().join("shhh.db"))
            .await
            .unwrap();
        assert!(sqlite.is_persistent());
    }

    #[test]
    fn test_store_type_from_str() {
        assert_eq!(SecretStoreType::from_str("memory"), Some(SecretStoreType::Memory));
        assert_eq!(SecretStoreType::from_str(" SQLite "), Some(SecretStoreType::Sqlite));
        assert_eq!(SecretStoreType::from_str("db"), Some(SecretStoreType::Sqlite));
        assert_eq!(SecretStoreType::from_str("redis"), None);
    }
}
