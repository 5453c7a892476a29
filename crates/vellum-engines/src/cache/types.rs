//! Core data types for the resource cache.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// Failure to bring a resource into a usable state.
///
/// Cloneable so the outcome of a single construction attempt can be
/// forwarded to every caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ConstructionError(String);

impl ConstructionError {
    /// Create a new construction error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors surfaced by `ResourceCache::acquire`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// The key is not part of the configured key set. Rejected before any
    /// resource work happens.
    #[error("unknown resource key: {0}")]
    UnknownKey(String),

    /// The factory failed to construct the resource. The entry reverts to
    /// absent, so a later call may retry. Every caller waiting on the same
    /// construction attempt observes this same error.
    #[error("failed to construct resource '{key}': {source}")]
    Construction {
        /// The key whose construction failed.
        key: String,
        /// The underlying factory error.
        source: ConstructionError,
    },
}

/// Constructs one instance of an expensive resource per key.
///
/// Construction may be slow (seconds) and may allocate significant memory or
/// device resources. It must be safe to call again after a failure: a failed
/// attempt must not leave partial global state behind.
#[async_trait]
pub trait ResourceFactory: Send + Sync {
    /// The resource type this factory produces. Usually a trait object.
    type Resource: ?Sized + Send + Sync + 'static;

    /// Whether `key` belongs to the configured key set.
    fn is_registered(&self, key: &str) -> bool;

    /// Construct the resource for `key`.
    ///
    /// # Errors
    /// Returns a `ConstructionError` if the resource cannot be built.
    async fn construct(&self, key: &str) -> Result<Arc<Self::Resource>, ConstructionError>;
}

/// Outcome of a construction attempt, broadcast to waiting callers.
/// `None` means the construction is still in flight.
pub(crate) type LoadOutcome<R> = Option<Result<Arc<R>, CacheError>>;

/// State of one cache entry. An absent map entry is the implicit third state.
pub(crate) enum EntryState<R: ?Sized> {
    /// Construction is in flight; callers wait on the channel for the
    /// published outcome. Never observable to more than one constructor.
    Loading(watch::Receiver<LoadOutcome<R>>),
    /// A usable instance with idle-time bookkeeping.
    Ready(ReadyEntry<R>),
}

/// A ready cache entry.
pub(crate) struct ReadyEntry<R: ?Sized> {
    /// The cached instance. Shared with active handles.
    pub instance: Arc<R>,
    /// Timestamp of the most recent acquisition or release.
    pub last_used: Instant,
    /// Timestamp when the instance was installed.
    pub created_at: Instant,
    /// Number of handles currently in active use. The sweeper never evicts
    /// an entry while this is non-zero.
    pub in_flight: u32,
}

impl<R: ?Sized> ReadyEntry<R> {
    pub fn new(instance: Arc<R>) -> Self {
        let now = Instant::now();
        Self { instance, last_used: now, created_at: now, in_flight: 0 }
    }

    /// Refresh the idle clock. `last_used` is monotonically non-decreasing
    /// because `Instant::now()` is.
    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }
}

/// Cache statistics for observability.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Total number of cache hits.
    pub total_hits: u64,
    /// Total number of cache misses (each one triggered a construction).
    pub total_misses: u64,
    /// Total number of evictions (idle sweep, discard policy, or explicit).
    pub total_evictions: u64,
    /// Current number of entries in the cache.
    pub cache_size: usize,
}
