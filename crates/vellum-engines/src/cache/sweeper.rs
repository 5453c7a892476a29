//! Background sweeper that periodically evicts idle cache entries.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, timeout};
use tracing::{debug, info, warn};

use super::cache::ResourceCache;
use super::types::ResourceFactory;

/// Bounded join applied while waiting for the sweep loop to stop.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the background sweep task for one cache.
///
/// The task wakes on a fixed period, asks the cache to evict idle entries,
/// and terminates cooperatively on a shutdown signal. All skip/evict
/// decisions live in the cache; the sweeper keeps no state of its own.
pub struct IdleSweeper {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl IdleSweeper {
    /// Spawn the sweep loop for `cache`, waking every `period`.
    #[must_use]
    pub fn spawn<F>(cache: ResourceCache<F>, period: Duration) -> Self
    where
        F: ResourceFactory + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; consume it so the first
            // sweep happens one full period after startup.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = cache.sweep(Instant::now());
                        if evicted > 0 {
                            debug!(evicted, "sweep pass evicted idle resources");
                        }
                    }
                    _ = &mut shutdown_rx => {
                        debug!("sweeper received shutdown signal");
                        break;
                    }
                }
            }
        });

        info!(period_secs = period.as_secs(), "idle sweeper started");
        Self { shutdown_tx: Some(shutdown_tx), task: Some(task) }
    }

    /// Whether the sweep loop is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the sweep loop cooperatively, waiting at most a few seconds for
    /// it to finish.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            match timeout(SHUTDOWN_TIMEOUT, task).await {
                Ok(Ok(())) => info!("idle sweeper stopped"),
                Ok(Err(e)) => warn!(error = %e, "sweeper task failed during shutdown"),
                Err(_) => warn!("sweeper shutdown timed out, task may still be running"),
            }
        }
    }
}

impl Drop for IdleSweeper {
    fn drop(&mut self) {
        // No free-floating tasks: dropping the sweeper stops the loop.
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::cache::types::ConstructionError;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct NoopFactory;

    #[async_trait]
    impl ResourceFactory for NoopFactory {
        type Resource = String;

        fn is_registered(&self, _key: &str) -> bool {
            true
        }

        async fn construct(&self, key: &str) -> Result<Arc<String>, ConstructionError> {
            Ok(Arc::new(key.to_string()))
        }
    }

    fn test_cache() -> ResourceCache<NoopFactory> {
        ResourceCache::new(NoopFactory, CacheConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_sweeper_starts_and_shuts_down() {
        let mut sweeper = IdleSweeper::spawn(test_cache(), Duration::from_secs(300));
        assert!(sweeper.is_running());

        sweeper.shutdown().await;
        assert!(!sweeper.is_running());
    }

    #[tokio::test]
    async fn test_sweeper_shutdown_is_idempotent() {
        let mut sweeper = IdleSweeper::spawn(test_cache(), Duration::from_secs(300));
        sweeper.shutdown().await;
        sweeper.shutdown().await;
        assert!(!sweeper.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_on_schedule() {
        let config =
            CacheConfig { enabled: true, idle_timeout_secs: 10, sweep_interval_secs: 5 };
        let cache = ResourceCache::new(NoopFactory, config).unwrap();
        let mut sweeper = IdleSweeper::spawn(cache.clone(), cache.config().sweep_interval());

        drop(cache.acquire("a").await.unwrap());
        assert_eq!(cache.len(), 1);

        // Sweeps fire at t=5 (too fresh) and t=10 (idle >= timeout).
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(cache.is_empty());

        sweeper.shutdown().await;
    }
}
