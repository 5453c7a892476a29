//! Engine factory for creating engine instances from configuration.
//!
//! The factory owns the immutable key → spec map supplied at process start
//! and is the only place engines are constructed. `ResourceCache` drives it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use vellum_abstraction::Engine;

use crate::MockEngine;
use crate::cache::{ConstructionError, ResourceFactory};
use crate::embedding::EmbeddingEngine;
use crate::llamacpp::LlamaCppEngine;

/// Engine kind selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Deterministic engine for testing and development.
    Mock,
    /// Schema-constrained generation against an OpenAI-compatible backend.
    Generation,
    /// Text embedding against an OpenAI-compatible backend.
    Embedding,
}

/// Configuration for one engine, keyed by resource key in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSpec {
    /// Which engine implementation to construct.
    pub kind: EngineKind,

    /// The backend model identifier (e.g., a GGUF model name).
    #[serde(default)]
    pub model_id: String,

    /// Base URL of the OpenAI-compatible backend (required for generation
    /// and embedding engines).
    #[serde(default)]
    pub base_url: Option<String>,

    /// Optional bearer token for the backend.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Mock engines only: fail construction with this message.
    #[serde(default)]
    pub fail_construction: Option<String>,

    /// Mock engines only: artificial construction delay in milliseconds.
    #[serde(default)]
    pub construct_delay_ms: Option<u64>,
}

impl EngineSpec {
    /// A plain mock engine spec, mostly useful in tests and demos.
    #[must_use]
    pub fn mock() -> Self {
        Self {
            kind: EngineKind::Mock,
            model_id: "mock".to_string(),
            base_url: None,
            api_key: None,
            fail_construction: None,
            construct_delay_ms: None,
        }
    }
}

/// Factory that builds engines from their specs.
pub struct EngineFactory {
    specs: HashMap<String, EngineSpec>,
}

impl EngineFactory {
    /// Create a factory over the given key → spec map.
    #[must_use]
    pub fn new(specs: HashMap<String, EngineSpec>) -> Self {
        Self { specs }
    }

    /// The registered resource keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }
}

#[async_trait]
impl ResourceFactory for EngineFactory {
    type Resource = dyn Engine;

    fn is_registered(&self, key: &str) -> bool {
        self.specs.contains_key(key)
    }

    async fn construct(&self, key: &str) -> Result<Arc<dyn Engine>, ConstructionError> {
        let spec = self
            .specs
            .get(key)
            .ok_or_else(|| ConstructionError::new(format!("no engine spec for key '{key}'")))?;

        debug!(key = %key, kind = ?spec.kind, model_id = %spec.model_id, "constructing engine");

        match spec.kind {
            EngineKind::Mock => {
                if let Some(delay) = spec.construct_delay_ms {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                if let Some(message) = &spec.fail_construction {
                    return Err(ConstructionError::new(message.clone()));
                }
                let engine: Arc<dyn Engine> = Arc::new(MockEngine::new(key.to_string()));
                Ok(engine)
            }
            EngineKind::Generation => {
                let base_url = require_base_url(key, spec)?;
                let engine = LlamaCppEngine::connect(
                    key.to_string(),
                    spec.model_id.clone(),
                    base_url,
                    spec.api_key.clone(),
                )
                .await
                .map_err(|e| ConstructionError::new(e.to_string()))?;
                Ok(Arc::new(engine))
            }
            EngineKind::Embedding => {
                let base_url = require_base_url(key, spec)?;
                let engine = EmbeddingEngine::connect(
                    key.to_string(),
                    spec.model_id.clone(),
                    base_url,
                    spec.api_key.clone(),
                )
                .await
                .map_err(|e| ConstructionError::new(e.to_string()))?;
                Ok(Arc::new(engine))
            }
        }
    }
}

fn require_base_url(key: &str, spec: &EngineSpec) -> Result<String, ConstructionError> {
    spec.base_url.clone().ok_or_else(|| {
        ConstructionError::new(format!(
            "engine '{key}' has kind {:?} but no base_url configured",
            spec.kind
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory_with(key: &str, spec: EngineSpec) -> EngineFactory {
        let mut specs = HashMap::new();
        specs.insert(key.to_string(), spec);
        EngineFactory::new(specs)
    }

    #[test]
    fn test_engine_kind_deserializes_lowercase() {
        assert_eq!(serde_json::from_str::<EngineKind>(r#""mock""#).unwrap(), EngineKind::Mock);
        assert_eq!(
            serde_json::from_str::<EngineKind>(r#""generation""#).unwrap(),
            EngineKind::Generation
        );
        assert_eq!(
            serde_json::from_str::<EngineKind>(r#""embedding""#).unwrap(),
            EngineKind::Embedding
        );
        assert!(serde_json::from_str::<EngineKind>(r#""unknown""#).is_err());
    }

    #[test]
    fn test_is_registered() {
        let factory = factory_with("generation", EngineSpec::mock());
        assert!(factory.is_registered("generation"));
        assert!(!factory.is_registered("other"));
    }

    #[tokio::test]
    async fn test_construct_mock_engine() {
        let factory = factory_with("generation", EngineSpec::mock());
        let engine = factory.construct("generation").await.unwrap();
        assert_eq!(engine.key(), "generation");
    }

    #[tokio::test]
    async fn test_construct_mock_failure() {
        let spec = EngineSpec {
            fail_construction: Some("no model file".to_string()),
            ..EngineSpec::mock()
        };
        let factory = factory_with("generation", spec);
        let err = factory.construct("generation").await.err().unwrap();
        assert!(err.to_string().contains("no model file"));
    }

    #[tokio::test]
    async fn test_construct_generation_requires_base_url() {
        let spec = EngineSpec {
            kind: EngineKind::Generation,
            model_id: "phi-3-mini".to_string(),
            ..EngineSpec::mock()
        };
        let factory = factory_with("generation", spec);
        let err = factory.construct("generation").await.err().unwrap();
        assert!(err.to_string().contains("base_url"));
    }

    #[tokio::test]
    async fn test_construct_unknown_key() {
        let factory = EngineFactory::new(HashMap::new());
        assert!(factory.construct("missing").await.is_err());
    }

    #[test]
    fn test_engine_spec_deserialize() {
        let spec: EngineSpec = toml::from_str(
            r#"
            kind = "generation"
            model_id = "phi-3-mini"
            base_url = "http://localhost:8080/v1"
            "#,
        )
        .unwrap();
        assert_eq!(spec.kind, EngineKind::Generation);
        assert_eq!(spec.model_id, "phi-3-mini");
        assert_eq!(spec.base_url.as_deref(), Some("http://localhost:8080/v1"));
        assert!(spec.api_key.is_none());
    }
}
