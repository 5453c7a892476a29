//! Resource caching for engine lifecycle management.
//!
//! Engines are expensive to construct (loading a model can take seconds and
//! gigabytes), so this module provides a keyed cache that constructs them
//! lazily on first use, shares a single instance across concurrent callers,
//! and evicts entries that have sat idle past a configurable timeout via a
//! background sweeper.

pub mod cache;
pub mod config;
pub mod sweeper;
pub mod types;

pub use cache::{ResourceCache, ResourceHandle};
pub use config::{CacheConfig, CacheConfigError};
pub use sweeper::IdleSweeper;
pub use types::{CacheError, CacheStats, ConstructionError, ResourceFactory};
