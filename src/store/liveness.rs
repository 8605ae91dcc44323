//! Storage liveness ping with bounded retries.
//!
//! Some hosted databases go to sleep when idle. Request handling and the
//! sweeper ping the store first and give up after a fixed number of attempts.

use std::time::Duration;

use super::{SecretStore, StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessCheck {
    pub retry_count: u32,
    pub sleep_interval: Duration,
}

impl Default for LivenessCheck {
    fn default() -> Self {
        Self {
            retry_count: 5,
            sleep_interval: Duration::from_secs(1),
        }
    }
}

impl LivenessCheck {
    pub fn new(retry_count: u32, sleep_interval: Duration) -> Self {
        Self {
            retry_count: retry_count.max(1),
            sleep_interval,
        }
    }

    /// Ping `store` until it answers or the attempts run out.
    pub async fn ensure_alive(&self, store: &dyn SecretStore) -> StoreResult<()> {
        let mut last_error = StoreError::Unavailable("store was never pinged".to_string());

        for attempt in 1..=self.retry_count.max(1) {
            match store.ping().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::info!(attempt, "Retrying to reach database...");
                    last_error = e;
                }
            }
            if attempt < self.retry_count {
                tokio::time::sleep(self.sleep_interval).await;
            }
        }

        tracing::error!(
            "Could not reach the database, something is wrong with the database connection: {}",
            last_error
        );
        Err(last_error)
    }
}
