//! Text embedding against an OpenAI-compatible embeddings endpoint.
//!
//! Two instances of this engine typically run side by side, one for
//! document embeddings and one for query embeddings, each against its own
//! backend model. Output vectors are quantized to int8 so the wire format
//! stays compact.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use vellum_abstraction::{Embedding, Engine, EngineError};

/// Request timeout for embedding calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Embedding engine backed by an OpenAI-compatible embeddings API.
#[derive(Debug, Clone)]
pub struct EmbeddingEngine {
    /// The resource key this engine was constructed for.
    key: String,
    /// The backend model identifier.
    model_id: String,
    /// Base URL for the API endpoint.
    base_url: String,
    /// Optional bearer token.
    api_key: Option<String>,
    /// HTTP client for requests.
    client: Client,
}

impl EmbeddingEngine {
    /// Connect to the backend and verify it is reachable.
    ///
    /// # Errors
    /// Returns an `EngineError` if the HTTP client cannot be built or the
    /// backend does not answer the readiness probe.
    pub async fn connect(
        key: String,
        model_id: String,
        base_url: String,
        api_key: Option<String>,
    ) -> Result<Self, EngineError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build().map_err(|e| {
            EngineError::RequestError(format!("Failed to create HTTP client: {e}"))
        })?;

        let engine = Self { key, model_id, base_url, api_key, client };
        engine.probe().await?;
        Ok(engine)
    }

    /// Readiness probe against the backend's model listing endpoint.
    async fn probe(&self) -> Result<(), EngineError> {
        let url = format!("{}/models", self.base_url);
        let mut request = self.client.get(&url);
        if let Some(ref api_key) = self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| {
            EngineError::RequestError(format!("backend unreachable at {url}: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::EngineResponseError(format!(
                "backend probe failed ({status}) at {url}"
            )));
        }

        debug!(key = %self.key, url = %url, "backend probe succeeded");
        Ok(())
    }
}

#[async_trait]
impl Engine for EmbeddingEngine {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>, EngineError> {
        debug!(key = %self.key, model_id = %self.model_id, batch = texts.len(), "embedding batch");

        let url = format!("{}/embeddings", self.base_url);
        let body = EmbeddingsRequest { model: self.model_id.clone(), input: texts.to_vec() };

        let mut request = self.client.post(&url).json(&body);
        if let Some(ref api_key) = self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| {
            error!(key = %self.key, error = %e, url = %url, "failed to send embeddings request");
            if e.is_connect() {
                EngineError::EngineUnavailable(format!("backend unreachable: {e}"))
            } else {
                EngineError::RequestError(format!("Network error: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text =
                response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                key = %self.key,
                status = %status,
                error = %error_text,
                "backend returned error status"
            );

            if status == 401 || status == 403 {
                return Err(EngineError::RequestError(format!(
                    "Authentication failed ({status}): {error_text}"
                )));
            }
            if (500..=599).contains(&status.as_u16()) {
                return Err(EngineError::EngineResponseError(format!(
                    "Server error ({status}): {error_text}"
                )));
            }
            return Err(EngineError::EngineResponseError(format!(
                "API error ({status}): {error_text}"
            )));
        }

        let parsed: EmbeddingsResponse = response.json().await.map_err(|e| {
            EngineError::SerializationError(format!("Failed to parse embeddings: {e}"))
        })?;

        if parsed.data.len() != texts.len() {
            return Err(EngineError::EngineResponseError(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        // The backend may reorder entries; `index` is authoritative.
        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| Embedding::from_f32(&d.embedding)).collect())
    }

    fn key(&self) -> &str {
        &self.key
    }
}

/// OpenAI-compatible embeddings request.
#[derive(Debug, Serialize)]
struct EmbeddingsRequest {
    model: String,
    input: Vec<String>,
}

/// OpenAI-compatible embeddings response (the parts we read).
#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn server_with_probe() -> mockito::ServerGuard {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/models")
            .with_status(200)
            .with_body(r#"{"data": []}"#)
            .create_async()
            .await;
        server
    }

    async fn connect_to(server: &mockito::ServerGuard) -> EmbeddingEngine {
        EmbeddingEngine::connect(
            "embedding:document".to_string(),
            "nomic-embed-text".to_string(),
            server.url(),
            None,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_connect_probe_failure() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/models").with_status(503).create_async().await;

        let result = EmbeddingEngine::connect(
            "embedding:document".to_string(),
            "nomic-embed-text".to_string(),
            server.url(),
            None,
        )
        .await;

        assert!(matches!(result, Err(EngineError::EngineResponseError(_))));
    }

    #[tokio::test]
    async fn test_embed_quantizes_and_preserves_order() {
        let mut server = server_with_probe().await;
        // Entries returned out of order; `index` restores the input order.
        server
            .mock("POST", "/embeddings")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"data": [
                    {"index": 1, "embedding": [0.0, 0.5]},
                    {"index": 0, "embedding": [1.0, -1.0]}
                ]}"#,
            )
            .create_async()
            .await;

        let engine = connect_to(&server).await;
        let embeddings =
            engine.embed(&["first".to_string(), "second".to_string()]).await.unwrap();

        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].0, vec![127, -127]);
        assert_eq!(embeddings[1].0, vec![0, 127]);
    }

    #[tokio::test]
    async fn test_embed_count_mismatch() {
        let mut server = server_with_probe().await;
        server
            .mock("POST", "/embeddings")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data": [{"index": 0, "embedding": [1.0]}]}"#)
            .create_async()
            .await;

        let engine = connect_to(&server).await;
        let err =
            engine.embed(&["a".to_string(), "b".to_string()]).await.unwrap_err();
        assert!(matches!(err, EngineError::EngineResponseError(_)));
    }

    #[tokio::test]
    async fn test_embed_server_error() {
        let mut server = server_with_probe().await;
        server
            .mock("POST", "/embeddings")
            .with_status(500)
            .with_body("model load failed")
            .create_async()
            .await;

        let engine = connect_to(&server).await;
        let err = engine.embed(&["a".to_string()]).await.unwrap_err();

        match err {
            EngineError::EngineResponseError(msg) => assert!(msg.contains("model load failed")),
            other => panic!("expected EngineResponseError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_generate_is_unsupported() {
        let server = server_with_probe().await;
        let engine = connect_to(&server).await;
        let err = engine.generate("hi", &serde_json::json!({}), None).await.unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedOperation(_)));
    }
}
