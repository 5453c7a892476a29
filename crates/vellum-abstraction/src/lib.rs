//! Engine abstraction layer for Vellum.
//!
//! This crate defines the core trait and types for the inference engines the
//! gateway serves: schema-constrained structured generation and text
//! embedding. Engines are expensive to initialize and shared across
//! concurrent callers, so everything here is `Send + Sync`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Represents an error that can occur when invoking an inference engine.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineError {
    /// An error occurred during the request to the backend (e.g., network issues).
    #[error("Request Error: {0}")]
    RequestError(String),

    /// The backend returned an error (e.g., invalid input, server failure).
    #[error("Engine Response Error: {0}")]
    EngineResponseError(String),

    /// An error occurred during serialization or deserialization.
    #[error("Serialization Error: {0}")]
    SerializationError(String),

    /// The engine does not implement the requested operation.
    #[error("Unsupported Operation: {0}")]
    UnsupportedOperation(String),

    /// The engine's backing resource is gone (e.g., the inference backend
    /// died underneath it). An engine that produced this error should be
    /// evicted rather than reused.
    #[error("Engine Unavailable: {0}")]
    EngineUnavailable(String),

    /// Other unexpected errors.
    #[error("Other Engine Error: {0}")]
    Other(String),
}

impl EngineError {
    /// Whether the engine that produced this error is still viable for
    /// further operations.
    #[must_use]
    pub fn is_viable(&self) -> bool {
        !matches!(self, Self::EngineUnavailable(_))
    }
}

/// Parameters for controlling generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Sampling temperature, between 0 and 2. Higher values mean the model
    /// will take more risks.
    pub temperature: Option<f32>,

    /// Nucleus sampling: the model considers the tokens with `top_p`
    /// probability mass.
    pub top_p: Option<f32>,

    /// The maximum number of tokens to generate.
    pub max_tokens: Option<u32>,

    /// Sequences where the backend will stop generating further tokens.
    pub stop_sequences: Option<Vec<String>>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: Some(0.2),
            top_p: Some(1.0),
            max_tokens: Some(2048),
            stop_sequences: None,
        }
    }
}

/// A quantized embedding vector with int8 components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embedding(pub Vec<i8>);

impl Embedding {
    /// Quantize an f32 vector to int8 using symmetric max-abs scaling.
    #[must_use]
    pub fn from_f32(values: &[f32]) -> Self {
        let scale = values.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
        if scale == 0.0 {
            return Self(vec![0; values.len()]);
        }
        Self(
            values
                .iter()
                .map(|v| (v / scale * 127.0).round().clamp(-127.0, 127.0) as i8)
                .collect(),
        )
    }

    /// Encode the raw int8 components as base64 for the wire.
    #[must_use]
    pub fn to_base64(&self) -> String {
        use base64::Engine as _;

        let bytes: Vec<u8> = self.0.iter().map(|&v| v as u8).collect();
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    /// Number of components in the vector.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the vector has no components.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A trait for the inference engines served by the gateway.
///
/// Each engine supports the operations it was built for; the rest default
/// to `UnsupportedOperation`. All engines must be `Send + Sync` so a single
/// instance can be shared by concurrent request handlers.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Generate structured output constrained by a JSON schema.
    ///
    /// # Errors
    /// Returns an `EngineError` if generation fails or the engine does not
    /// support generation.
    async fn generate(
        &self,
        prompt: &str,
        schema: &serde_json::Value,
        params: Option<GenerationParams>,
    ) -> Result<serde_json::Value, EngineError> {
        let _ = (prompt, schema, params);
        Err(EngineError::UnsupportedOperation(format!(
            "engine '{}' does not support generation",
            self.key()
        )))
    }

    /// Embed a batch of texts into quantized vectors.
    ///
    /// # Errors
    /// Returns an `EngineError` if embedding fails or the engine does not
    /// support embedding.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>, EngineError> {
        let _ = texts;
        Err(EngineError::UnsupportedOperation(format!(
            "engine '{}' does not support embedding",
            self.key()
        )))
    }

    /// The resource key this engine was constructed for.
    fn key(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct KeyOnlyEngine;

    #[async_trait]
    impl Engine for KeyOnlyEngine {
        fn key(&self) -> &str {
            "key-only"
        }
    }

    #[tokio::test]
    async fn test_default_generate_is_unsupported() {
        let engine = KeyOnlyEngine;
        let result = engine.generate("hi", &serde_json::json!({}), None).await;
        assert!(matches!(result, Err(EngineError::UnsupportedOperation(_))));
    }

    #[tokio::test]
    async fn test_default_embed_is_unsupported() {
        let engine = KeyOnlyEngine;
        let result = engine.embed(&["hi".to_string()]).await;
        assert!(matches!(result, Err(EngineError::UnsupportedOperation(_))));
    }

    #[test]
    fn test_engine_error_viability() {
        assert!(EngineError::RequestError("timeout".to_string()).is_viable());
        assert!(EngineError::EngineResponseError("bad".to_string()).is_viable());
        assert!(!EngineError::EngineUnavailable("backend died".to_string()).is_viable());
    }

    #[test]
    fn test_embedding_quantization_scale() {
        let embedding = Embedding::from_f32(&[1.0, -1.0, 0.5, 0.0]);
        assert_eq!(embedding.0, vec![127, -127, 64, 0]);
    }

    #[test]
    fn test_embedding_quantization_all_zero() {
        let embedding = Embedding::from_f32(&[0.0, 0.0, 0.0]);
        assert_eq!(embedding.0, vec![0, 0, 0]);
        assert_eq!(embedding.len(), 3);
        assert!(!embedding.is_empty());
    }

    #[test]
    fn test_embedding_base64_roundtrip() {
        use base64::Engine as _;

        let embedding = Embedding(vec![1, -1, 127, -127]);
        let encoded = embedding.to_base64();
        let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
        let components: Vec<i8> = decoded.iter().map(|&b| b as i8).collect();
        assert_eq!(components, embedding.0);
    }

    #[test]
    fn test_generation_params_default() {
        let params = GenerationParams::default();
        assert_eq!(params.temperature, Some(0.2));
        assert_eq!(params.max_tokens, Some(2048));
        assert!(params.stop_sequences.is_none());
    }
}
