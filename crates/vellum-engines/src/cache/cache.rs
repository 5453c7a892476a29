//! ResourceCache implementation with lazy loading and idle eviction.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::{CacheConfig, CacheConfigError};
use super::types::{
    CacheError, CacheStats, EntryState, LoadOutcome, ReadyEntry, ResourceFactory,
};

/// Keyed cache of lazily-constructed, idle-evicted resources.
///
/// Construction is strictly serialized per key: while one caller is
/// constructing, every other `acquire` for the same key waits for that
/// attempt's outcome instead of starting a second one. The entry map is
/// guarded by a short-held mutex that protects state transitions only —
/// neither construction nor use of a resource happens under it.
///
/// Cloning is cheap; clones share the same entries.
pub struct ResourceCache<F: ResourceFactory> {
    inner: Arc<CacheInner<F>>,
}

impl<F: ResourceFactory> Clone for ResourceCache<F> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<F: ResourceFactory> fmt::Debug for ResourceCache<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCache")
            .field("config", &self.inner.config)
            .field("len", &self.len())
            .finish()
    }
}

struct CacheInner<F: ResourceFactory> {
    factory: F,
    entries: Mutex<HashMap<String, EntryState<F::Resource>>>,
    stats: Mutex<CacheStats>,
    config: CacheConfig,
}

/// What `acquire` decided to do after inspecting the entry map.
enum Pending<R: ?Sized> {
    /// Another caller is constructing; wait for its outcome.
    Wait(watch::Receiver<LoadOutcome<R>>),
    /// This caller installed the placeholder and owns the construction.
    Build(watch::Sender<LoadOutcome<R>>),
}

impl<F: ResourceFactory> ResourceCache<F> {
    /// Create a new cache around the given factory.
    ///
    /// # Errors
    /// Returns `CacheConfigError` if the configuration is invalid.
    pub fn new(factory: F, config: CacheConfig) -> Result<Self, CacheConfigError> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(CacheInner {
                factory,
                entries: Mutex::new(HashMap::new()),
                stats: Mutex::new(CacheStats::default()),
                config,
            }),
        })
    }

    /// Get a usable handle to the resource for `key`, constructing it if
    /// absent.
    ///
    /// The returned handle keeps the entry in active use until it is
    /// dropped: the sweeper will not evict an entry with live handles.
    ///
    /// # Errors
    /// - `CacheError::UnknownKey` if the key is not registered with the
    ///   factory (the factory is never invoked).
    /// - `CacheError::Construction` if construction fails. The same error is
    ///   observed by every caller waiting on that attempt, and the entry
    ///   reverts to absent so a later call may retry.
    pub async fn acquire(&self, key: &str) -> Result<ResourceHandle<F>, CacheError> {
        if !self.inner.factory.is_registered(key) {
            return Err(CacheError::UnknownKey(key.to_string()));
        }

        loop {
            // Decide under the map lock; construct and wait outside it.
            let pending = {
                let mut entries = self.inner.entries.lock().expect("cache lock poisoned");
                match entries.get_mut(key) {
                    Some(EntryState::Ready(entry)) => {
                        entry.touch();
                        entry.in_flight += 1;
                        let instance = Arc::clone(&entry.instance);
                        drop(entries);

                        self.inner.stats.lock().expect("stats lock poisoned").total_hits += 1;
                        debug!(key = %key, "cache hit");
                        return Ok(self.handle(key, instance));
                    }
                    Some(EntryState::Loading(rx)) => Pending::Wait(rx.clone()),
                    None => {
                        let (tx, rx) = watch::channel::<LoadOutcome<F::Resource>>(None);
                        entries.insert(key.to_string(), EntryState::Loading(rx));
                        Pending::Build(tx)
                    }
                }
            };

            match pending {
                Pending::Wait(rx) => self.wait_for_load(key, rx).await?,
                Pending::Build(tx) => return self.construct(key, &tx).await,
            }
        }
    }

    /// Wait for an in-flight construction of `key` to publish its outcome.
    ///
    /// On success the caller loops back to `acquire`'s fast path and picks
    /// up the installed instance; on failure the forwarded error is
    /// returned. A dead channel means the constructor was dropped without
    /// publishing — the stale placeholder is cleared and the caller retries.
    async fn wait_for_load(
        &self,
        key: &str,
        mut rx: watch::Receiver<LoadOutcome<F::Resource>>,
    ) -> Result<(), CacheError> {
        debug!(key = %key, "waiting on in-flight construction");
        loop {
            let outcome = rx.borrow_and_update().clone();
            match outcome {
                Some(Ok(_)) => return Ok(()),
                Some(Err(err)) => return Err(err),
                None => {
                    if rx.changed().await.is_err() {
                        let mut entries =
                            self.inner.entries.lock().expect("cache lock poisoned");
                        if let Some(EntryState::Loading(current)) = entries.get(key) {
                            if current.same_channel(&rx) {
                                entries.remove(key);
                            }
                        }
                        warn!(key = %key, "construction abandoned without publishing, retrying");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Run the factory for `key` and publish the outcome to all waiters.
    async fn construct(
        &self,
        key: &str,
        tx: &watch::Sender<LoadOutcome<F::Resource>>,
    ) -> Result<ResourceHandle<F>, CacheError> {
        self.inner.stats.lock().expect("stats lock poisoned").total_misses += 1;
        info!(key = %key, "cache miss, constructing resource");

        let started = Instant::now();
        match self.inner.factory.construct(key).await {
            Ok(instance) => {
                {
                    let mut entries = self.inner.entries.lock().expect("cache lock poisoned");
                    let mut entry = ReadyEntry::new(Arc::clone(&instance));
                    entry.in_flight = 1;
                    entries.insert(key.to_string(), EntryState::Ready(entry));
                }
                // Waiters are woken only after the entry is installed.
                let _ = tx.send(Some(Ok(Arc::clone(&instance))));

                info!(
                    key = %key,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "resource constructed"
                );
                Ok(self.handle(key, instance))
            }
            Err(source) => {
                let err = CacheError::Construction { key: key.to_string(), source };
                {
                    // Revert to absent so a later call may retry.
                    let mut entries = self.inner.entries.lock().expect("cache lock poisoned");
                    entries.remove(key);
                }
                let _ = tx.send(Some(Err(err.clone())));

                warn!(key = %key, error = %err, "resource construction failed");
                Err(err)
            }
        }
    }

    fn handle(&self, key: &str, instance: Arc<F::Resource>) -> ResourceHandle<F> {
        ResourceHandle { key: key.to_string(), instance, inner: Arc::clone(&self.inner) }
    }

    /// One sweep pass: evict every ready entry whose idle time has reached
    /// the configured timeout. Entries in active use and entries still
    /// loading are skipped and re-checked on the next sweep.
    ///
    /// Returns the number of evicted entries.
    pub fn sweep(&self, now: Instant) -> usize {
        let timeout = self.inner.config.idle_timeout();
        let mut evicted = 0usize;

        {
            let mut entries = self.inner.entries.lock().expect("cache lock poisoned");
            entries.retain(|key, state| match state {
                EntryState::Loading(rx) => {
                    // Placeholders whose constructor vanished without
                    // publishing are stale; drop them.
                    if rx.has_changed().is_err() {
                        debug!(key = %key, "dropping stale loading placeholder");
                        return false;
                    }
                    true
                }
                EntryState::Ready(entry) => {
                    if entry.in_flight > 0 {
                        return true;
                    }
                    let idle = now.duration_since(entry.last_used);
                    if idle < timeout {
                        return true;
                    }
                    info!(
                        key = %key,
                        idle_secs = idle.as_secs(),
                        age_secs = now.duration_since(entry.created_at).as_secs(),
                        "evicting idle resource"
                    );
                    evicted += 1;
                    false
                }
            });
        }

        if evicted > 0 {
            self.inner.stats.lock().expect("stats lock poisoned").total_evictions +=
                evicted as u64;
        }
        evicted
    }

    /// Remove the entry for `key` immediately, regardless of idle time.
    ///
    /// Used when an operation signals the resource is no longer viable.
    /// Holders of live handles keep the instance alive until those handles
    /// drop; only the cache's ownership ends here.
    ///
    /// Returns `true` if a ready entry was removed.
    pub fn evict(&self, key: &str) -> bool {
        let removed = {
            let mut entries = self.inner.entries.lock().expect("cache lock poisoned");
            matches!(entries.get(key), Some(EntryState::Ready(_))) && entries.remove(key).is_some()
        };
        if removed {
            self.inner.stats.lock().expect("stats lock poisoned").total_evictions += 1;
            info!(key = %key, "evicted resource");
        }
        removed
    }

    /// Tear down every entry. Used at process shutdown.
    pub fn evict_all(&self) {
        let cleared = {
            let mut entries = self.inner.entries.lock().expect("cache lock poisoned");
            let cleared = entries.len();
            entries.clear();
            cleared
        };
        info!(cleared, "cleared all resources from cache");
    }

    /// Current number of entries (ready or loading).
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.lock().expect("cache lock poisoned").len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of current cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.inner.stats.lock().expect("stats lock poisoned").clone();
        stats.cache_size = self.len();
        stats
    }

    /// The cache configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }
}

impl<F: ResourceFactory> CacheInner<F> {
    /// End one active use of `key`: refresh the idle clock and, under the
    /// construct-use-discard policy, tear the entry down once the last
    /// in-flight use ends.
    ///
    /// Release is tied to entry identity, not just the key: a handle that
    /// outlived its entry (explicit `evict` followed by a reconstruction)
    /// must not touch the successor entry's bookkeeping.
    fn release(&self, key: &str, instance: &Arc<F::Resource>) {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        let Some(EntryState::Ready(entry)) = entries.get_mut(key) else {
            return;
        };
        if !std::ptr::addr_eq(Arc::as_ptr(&entry.instance), Arc::as_ptr(instance)) {
            return;
        }
        entry.in_flight = entry.in_flight.saturating_sub(1);
        entry.touch();

        if !self.config.enabled && entry.in_flight == 0 {
            entries.remove(key);
            drop(entries);
            self.stats.lock().expect("stats lock poisoned").total_evictions += 1;
            debug!(key = %key, "discarded resource after use");
        }
    }
}

/// A live reference to a cached resource.
///
/// Dereferences to the resource itself. While the handle exists the entry is
/// in active use and exempt from eviction; dropping it ends the use and
/// refreshes the entry's idle clock.
pub struct ResourceHandle<F: ResourceFactory> {
    key: String,
    instance: Arc<F::Resource>,
    inner: Arc<CacheInner<F>>,
}

impl<F: ResourceFactory> ResourceHandle<F> {
    /// The key this handle was acquired for.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<F: ResourceFactory> Deref for ResourceHandle<F> {
    type Target = F::Resource;

    fn deref(&self) -> &F::Resource {
        &self.instance
    }
}

impl<F: ResourceFactory> Drop for ResourceHandle<F> {
    fn drop(&mut self) {
        self.inner.release(&self.key, &self.instance);
    }
}

impl<F: ResourceFactory> fmt::Debug for ResourceHandle<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle").field("key", &self.key).finish()
    }
}
