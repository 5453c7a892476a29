//! Schema-constrained generation against an OpenAI-compatible server.
//!
//! This engine targets any backend that implements the OpenAI Chat
//! Completions API with structured output support, which covers the usual
//! local inference servers:
//!
//! - **llama.cpp** (`llama-server`): the primary deployment target
//! - **vLLM**: high-performance inference server
//! - **LM Studio / LocalAI**: desktop and self-hosted servers
//!
//! Construction probes the backend so that a missing or dead server is a
//! construction failure rather than a failure on the first request.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use vellum_abstraction::{Engine, EngineError, GenerationParams};

/// Request timeout for generation calls. Constrained decoding on CPU can be
/// slow, so this is generous.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Generation engine backed by an OpenAI-compatible chat completions API.
#[derive(Debug, Clone)]
pub struct LlamaCppEngine {
    /// The resource key this engine was constructed for.
    key: String,
    /// The backend model identifier.
    model_id: String,
    /// Base URL for the API endpoint (e.g., "http://localhost:8080/v1").
    base_url: String,
    /// Optional bearer token (local servers usually run without auth).
    api_key: Option<String>,
    /// HTTP client for requests.
    client: Client,
}

impl LlamaCppEngine {
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
impl Engine for LlamaCppEngine {
    async fn generate(
        &self,
        prompt: &str,
        schema: &serde_json::Value,
        params: Option<GenerationParams>,
    ) -> Result<serde_json::Value, EngineError> {
        debug!(
            key = %self.key,
            model_id = %self.model_id,
            prompt_len = prompt.len(),
            "generating schema-constrained completion"
        );

        let url = format!("{}/chat/completions", self.base_url);

        // The derived per-call object: a constrained-decoding request built
        // from the mode's schema.
        let mut body = ChatRequest {
            model: self.model_id.clone(),
            messages: vec![ChatRequestMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop: None,
            response_format: ResponseFormat {
                format_type: "json_schema".to_string(),
                json_schema: JsonSchemaFormat {
                    name: "response".to_string(),
                    schema: schema.clone(),
                    strict: true,
                },
            },
        };

        let params = params.unwrap_or_default();
        body.temperature = params.temperature;
        body.top_p = params.top_p;
        body.max_tokens = params.max_tokens;
        body.stop = params.stop_sequences;

        let mut request = self.client.post(&url).json(&body);
        if let Some(ref api_key) = self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| {
            error!(key = %self.key, error = %e, url = %url, "failed to send generation request");
            if e.is_connect() {
                // The backend we probed at construction time is gone.
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

        let completion: ChatResponse = response.json().await.map_err(|e| {
            EngineError::SerializationError(format!("Failed to parse completion: {e}"))
        })?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| {
                EngineError::EngineResponseError("No choices in completion".to_string())
            })?;

        serde_json::from_str(&content).map_err(|e| {
            EngineError::SerializationError(format!("Completion was not valid JSON: {e}"))
        })
    }

    fn key(&self) -> &str {
        &self.key
    }
}

/// OpenAI-compatible chat completions request.
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatRequestMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatRequestMessage {
    role: String,
    content: String,
}

/// Structured-output constraint attached to the request.
#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
    json_schema: JsonSchemaFormat,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat {
    name: String,
    schema: serde_json::Value,
    strict: bool,
}

/// OpenAI-compatible chat completions response (the parts we read).
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

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

    async fn connect_to(server: &mockito::ServerGuard) -> LlamaCppEngine {
        LlamaCppEngine::connect(
            "generation".to_string(),
            "phi-3-mini".to_string(),
            server.url(),
            None,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_connect_probe_failure() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/models").with_status(500).create_async().await;

        let result = LlamaCppEngine::connect(
            "generation".to_string(),
            "phi-3-mini".to_string(),
            server.url(),
            None,
        )
        .await;

        assert!(matches!(result, Err(EngineError::EngineResponseError(_))));
    }

    #[tokio::test]
    async fn test_generate_parses_schema_shaped_content() {
        let mut server = server_with_probe().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices": [{"message": {"role": "assistant", "content": "{\"title\": \"hi\"}"}}]}"#,
            )
            .create_async()
            .await;

        let engine = connect_to(&server).await;
        let schema = json!({"type": "object", "properties": {"title": {"type": "string"}}});
        let result = engine.generate("extract a title", &schema, None).await.unwrap();

        assert_eq!(result, json!({"title": "hi"}));
    }

    #[tokio::test]
    async fn test_generate_server_error() {
        let mut server = server_with_probe().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .with_body("out of memory")
            .create_async()
            .await;

        let engine = connect_to(&server).await;
        let err = engine.generate("hi", &json!({}), None).await.unwrap_err();

        match err {
            EngineError::EngineResponseError(msg) => assert!(msg.contains("out of memory")),
            other => panic!("expected EngineResponseError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_generate_non_json_content_is_serialization_error() {
        let mut server = server_with_probe().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices": [{"message": {"role": "assistant", "content": "not json"}}]}"#,
            )
            .create_async()
            .await;

        let engine = connect_to(&server).await;
        let err = engine.generate("hi", &json!({}), None).await.unwrap_err();
        assert!(matches!(err, EngineError::SerializationError(_)));
    }

    #[tokio::test]
    async fn test_embed_is_unsupported() {
        let server = server_with_probe().await;
        let engine = connect_to(&server).await;
        let err = engine.embed(&["hi".to_string()]).await.unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedOperation(_)));
    }
}
