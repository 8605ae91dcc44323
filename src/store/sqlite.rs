//! SQLite-based secret store.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tokio::sync::Mutex;

use super::{SecretStore, StoreError, StoreResult};
use crate::crypto;
use crate::secret::{NewSecret, Secret};

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS secret (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT NOT NULL UNIQUE,
    envelope TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    tries_remaining INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_secret_expires_at ON secret(expires_at);
"#;

const SELECT_SECRET: &str = "SELECT id, external_id, envelope, created_at, expires_at, tries_remaining
     FROM secret WHERE external_id = ?1";

/// Timestamps are stored as Unix milliseconds so `expires_at <= ?` compares numerically.
fn to_millis(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn unavailable(e: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn parse_row(row: &rusqlite::Row<'_>) -> Result<Secret, rusqlite::Error> {
    let external_id: String = row.get(1)?;
    let envelope_text: String = row.get(2)?;
    // An undecodable envelope stays in place and fails decryption like any
    // other corrupted blob.
    let envelope = crypto::decode_text(&envelope_text).unwrap_or_else(|_| {
        tracing::warn!(external_id = %external_id, "Stored envelope is not valid base64");
        Vec::new()
    });
    let tries: i64 = row.get(5)?;
    let tries_remaining = u32::try_from(tries).unwrap_or_else(|_| {
        tracing::warn!(
            external_id = %external_id,
            tries,
            "Stored tries_remaining is out of range, treating as 0"
        );
        0
    });

    Ok(Secret {
        id: row.get(0)?,
        external_id,
        envelope,
        created_at: from_millis(row.get(3)?),
        expires_at: from_millis(row.get(4)?),
        tries_remaining,
    })
}

pub struct SqliteSecretStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSecretStore {
    pub async fn open(db_path: PathBuf) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| unavailable(format!("Failed to create database dir: {}", e)))?;
        }

        // Open database in blocking task
        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)
                .map_err(|e| unavailable(format!("Failed to open SQLite database: {}", e)))?;
            conn.execute_batch(SCHEMA)
                .map_err(|e| unavailable(format!("Failed to run schema: {}", e)))?;
            tracing::info!("Opened secret database at {}", db_path.display());
            Ok::<_, StoreError>(conn)
        })
        .await
        .map_err(|e| unavailable(format!("Task join error: {}", e)))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&conn)
        })
        .await
        .map_err(unavailable)?
    }
}

#[async_trait]
impl SecretStore for SqliteSecretStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn ping(&self) -> StoreResult<()> {
        self.with_conn(|conn| {
            let has_table = conn
                .prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'secret'")
                .map_err(unavailable)?
                .exists([])
                .map_err(unavailable)?;
            if has_table {
                Ok(())
            } else {
                Err(unavailable("Required table 'secret' does not exist"))
            }
        })
        .await
    }

    async fn insert(&self, secret: NewSecret) -> StoreResult<Secret> {
        self.with_conn(move |conn| {
            let result = conn.execute(
                "INSERT INTO secret (external_id, envelope, created_at, expires_at, tries_remaining)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    &secret.external_id,
                    crypto::encode_text(&secret.envelope),
                    to_millis(secret.created_at),
                    to_millis(secret.expires_at),
                    i64::from(secret.tries_remaining),
                ],
            );
            match result {
                Ok(_) => Ok(Secret::from_new(conn.last_insert_rowid(), secret)),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::DuplicateExternalId)
                }
                Err(e) => Err(unavailable(e)),
            }
        })
        .await
    }

    async fn get(&self, external_id: &str) -> StoreResult<Option<Secret>> {
        let external_id = external_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(SELECT_SECRET, params![&external_id], parse_row)
                .optional()
                .map_err(unavailable)
        })
        .await
    }

    async fn conditional_update_tries(
        &self,
        external_id: &str,
        expected_tries: u32,
        new_tries: u32,
    ) -> StoreResult<bool> {
        let external_id = external_id.to_string();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE secret SET tries_remaining = ?3
                     WHERE external_id = ?1 AND tries_remaining = ?2",
                    params![&external_id, i64::from(expected_tries), i64::from(new_tries)],
                )
                .map_err(unavailable)?;
            Ok(changed == 1)
        })
        .await
    }

    async fn conditional_delete(&self, external_id: &str, expected_tries: u32) -> StoreResult<bool> {
        let external_id = external_id.to_string();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "DELETE FROM secret WHERE external_id = ?1 AND tries_remaining = ?2",
                    params![&external_id, i64::from(expected_tries)],
                )
                .map_err(unavailable)?;
            Ok(changed == 1)
        })
        .await
    }

    async fn delete(&self, external_id: &str) -> StoreResult<bool> {
        let external_id = external_id.to_string();
        self.with_conn(move |conn| {
            let changed = conn
                .execute("DELETE FROM secret WHERE external_id = ?1", params![&external_id])
                .map_err(unavailable)?;
            Ok(changed == 1)
        })
        .await
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<String>> {
        let now = to_millis(now);
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT external_id FROM secret WHERE expires_at <= ?1")
                .map_err(unavailable)?;
            let ids = stmt
                .query_map(params![now], |row| row.get::<_, String>(0))
                .map_err(unavailable)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(unavailable)?;
            Ok(ids)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stored(external_id: &str) -> NewSecret {
        let created_at = Utc.with_ymd_and_hms(2025, 5, 20, 9, 0, 0).unwrap();
        NewSecret {
            external_id: external_id.to_string(),
            envelope: vec![1, 2, 3],
            created_at,
            expires_at: created_at + chrono::Duration::hours(1),
            tries_remaining: 3,
        }
    }

    #[tokio::test]
    async fn test_corrupted_row_is_read_defensively() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteSecretStore::open(dir.path().join("secrets.db")).await.unwrap();
        store.insert(stored("negative")).await.unwrap();
        store.insert(stored("garbled")).await.unwrap();

        store
            .with_conn(|conn| {
                conn.execute_batch(
                    "UPDATE secret SET tries_remaining = -1 WHERE external_id = 'negative';
                     UPDATE secret SET tries_remaining = 4294967296 WHERE external_id = 'garbled';
                     UPDATE secret SET envelope = '***' WHERE external_id = 'garbled';",
                )
                .map_err(unavailable)
            })
            .await
            .unwrap();

        let negative = store.get("negative").await.unwrap().unwrap();
        assert_eq!(negative.tries_remaining, 0);
        assert_eq!(negative.envelope, vec![1, 2, 3]);

        let garbled = store.get("garbled").await.unwrap().unwrap();
        assert_eq!(garbled.tries_remaining, 0);
        assert!(garbled.envelope.is_empty());

        assert!(store.delete("negative").await.unwrap());
    }
}
