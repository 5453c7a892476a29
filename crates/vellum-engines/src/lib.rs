//! Inference engine implementations and the resource cache that serves them.
//!
//! This crate provides:
//! - A lazy-loading, idle-evicting [`cache::ResourceCache`] with a
//!   background [`cache::IdleSweeper`]
//! - An [`factory::EngineFactory`] that constructs engines on demand from
//!   declarative specs
//! - Engines for schema-constrained generation ([`llamacpp`]) and text
//!   embedding ([`embedding`]) against OpenAI-compatible backends
//! - A deterministic [`MockEngine`] for testing and development

pub mod cache;
pub mod embedding;
pub mod factory;
pub mod llamacpp;

use async_trait::async_trait;
use serde_json::json;
use vellum_abstraction::{Embedding, Engine, EngineError, GenerationParams};

pub use cache::{
    CacheConfig, CacheConfigError, CacheError, CacheStats, ConstructionError, IdleSweeper,
    ResourceCache, ResourceFactory, ResourceHandle,
};
pub use embedding::EmbeddingEngine;
pub use factory::{EngineFactory, EngineKind, EngineSpec};
pub use llamacpp::LlamaCppEngine;

/// A deterministic engine for testing and development.
///
/// `generate` echoes its input in a fixed shape and `embed` derives a
/// stable vector from each text, so callers can assert on exact output
/// without a real backend.
#[derive(Debug, Clone)]
pub struct MockEngine {
    key: String,
}

impl MockEngine {
    /// Create a mock engine for the given resource key.
    #[must_use]
    pub fn new(key: String) -> Self {
        Self { key }
    }
}

#[async_trait]
impl Engine for MockEngine {
    async fn generate(
        &self,
        prompt: &str,
        schema: &serde_json::Value,
        _params: Option<GenerationParams>,
    ) -> Result<serde_json::Value, EngineError> {
        Ok(json!({
            "engine": self.key,
            "echo": prompt,
            "schema_type": schema.get("type").cloned().unwrap_or(serde_json::Value::Null),
        }))
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>, EngineError> {
        Ok(texts
            .iter()
            .map(|text| {
                // Stable per-text vector: the byte values themselves, so
                // distinct texts stay distinct after max-abs quantization.
                let components: Vec<f32> =
                    text.bytes().map(f32::from).chain([text.len() as f32]).collect();
                Embedding::from_f32(&components)
            })
            .collect())
    }

    fn key(&self) -> &str {
        &self.key
    }
}
