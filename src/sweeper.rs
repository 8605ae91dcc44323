//! Periodic removal of expired secrets.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::clock::Clock;
use crate::store::{LivenessCheck, SecretStore, StoreResult};

/// Deletes every secret whose `expires_at` is at or before the clock's now.
pub struct ExpirySweeper {
    store: Arc<dyn SecretStore>,
    clock: Arc<dyn Clock>,
    liveness: LivenessCheck,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn SecretStore>, clock: Arc<dyn Clock>, liveness: LivenessCheck) -> Self {
        Self {
            store,
            clock,
            liveness,
        }
    }

    /// Run one pass and return how many secrets it removed.
    ///
    /// Rows removed concurrently by a reader are skipped, so running this
    /// twice in a row is harmless.
    pub async fn sweep_once(&self) -> StoreResult<usize> {
        self.liveness.ensure_alive(self.store.as_ref()).await?;

        let now = self.clock.now();
        let mut deleted = 0;
        for external_id in self.store.list_expired(now).await? {
            if self.store.delete(&external_id).await? {
                deleted += 1;
            }
        }

        info!("Deleted {} secret(s)", deleted);
        Ok(deleted)
    }
}

/// Runs an [`ExpirySweeper`] on a fixed interval until shut down.
pub struct SweepScheduler {
    sweeper: Arc<ExpirySweeper>,
    interval: Duration,
    paused: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SweepScheduler {
    pub fn new(sweeper: Arc<ExpirySweeper>, interval: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            sweeper,
            interval,
            paused: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            handle: Mutex::new(None),
        }
    }

    /// Spawn the sweep loop. Calling this twice leaves the first loop running.
    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return;
        }

        let sweeper = Arc::clone(&self.sweeper);
        let paused = Arc::clone(&self.paused);
        let interval = self.interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        *handle = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        if paused.load(Ordering::SeqCst) {
                            continue;
                        }
                        if let Err(e) = sweeper.sweep_once().await {
                            error!("Expiry sweep failed: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Shutting down expiry sweeper");
                        break;
                    }
                }
            }
        }));

        info!(interval_secs = interval.as_secs(), "Expiry sweeper started");
    }

    /// Skip sweeps until [`resume`](Self::resume) is called.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::secret::NewSecret;
    use crate::store::InMemorySecretStore;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn new_secret(id: &str, expires_at: DateTime<Utc>, tries: u32) -> NewSecret {
        NewSecret {
            external_id: id.to_string(),
            envelope: vec![1, 2, 3],
            created_at: start() - ChronoDuration::hours(1),
            expires_at,
            tries_remaining: tries,
        }
    }

    fn sweeper(store: &InMemorySecretStore, clock: &ManualClock) -> ExpirySweeper {
        ExpirySweeper::new(
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            LivenessCheck::new(1, Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let store = InMemorySecretStore::new();
        let clock = ManualClock::new(start());
        store.insert(new_secret("past", start() - ChronoDuration::minutes(1), 3)).await.unwrap();
        store.insert(new_secret("boundary", start(), 3)).await.unwrap();
        store.insert(new_secret("future", start() + ChronoDuration::minutes(1), 2)).await.unwrap();

        let deleted = sweeper(&store, &clock).sweep_once().await.unwrap();
        assert_eq!(deleted, 2);
        assert!(store.get("past").await.unwrap().is_none());
        assert!(store.get("boundary").await.unwrap().is_none());

        let future = store.get("future").await.unwrap().unwrap();
        assert_eq!(future.tries_remaining, 2);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let store = InMemorySecretStore::new();
        let clock = ManualClock::new(start());
        store.insert(new_secret("past", start() - ChronoDuration::days(1), 5)).await.unwrap();

        let sweeper = sweeper(&store, &clock);
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweep_follows_clock() {
        let store = InMemorySecretStore::new();
        let clock = ManualClock::new(start());
        store.insert(new_secret("later", start() + ChronoDuration::hours(1), 5)).await.unwrap();

        let sweeper = sweeper(&store, &clock);
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
        clock.advance(ChronoDuration::hours(1));
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_scheduler_sweeps_and_pauses() {
        let store = InMemorySecretStore::new();
        let clock = ManualClock::new(start());
        let scheduler = SweepScheduler::new(
            Arc::new(sweeper(&store, &clock)),
            Duration::from_millis(10),
        );

        scheduler.pause();
        assert!(scheduler.is_paused());
        scheduler.start().await;

        store.insert(new_secret("past", start() - ChronoDuration::minutes(5), 3)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.len().await, 1);

        scheduler.resume();
        let mut swept = false;
        for _ in 0..100 {
            if store.is_empty().await {
                swept = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(swept);

        scheduler.shutdown().await;
    }
}
