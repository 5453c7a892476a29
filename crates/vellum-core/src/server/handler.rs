//! HTTP request handling for the gateway.
//!
//! The handler owns the resource cache. Each request acquires the engine it
//! needs (constructing it lazily on first use), holds the handle across the
//! inference call so the sweeper leaves the entry alone, and releases it by
//! dropping the handle.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, warn};
use vellum_engines::cache::{CacheError, ResourceCache};
use vellum_engines::factory::EngineFactory;

use crate::config::Config;
use crate::error::{Result, VellumError};
use crate::prompt::PromptTemplate;

/// A resolved generation mode: the engine that serves it and the schema
/// constraining its output.
#[derive(Debug, Clone)]
pub struct Mode {
    /// Resource key of the serving engine.
    pub engine_key: String,
    /// JSON schema for constrained decoding.
    pub schema: serde_json::Value,
}

/// Shared state for all request handlers.
pub struct AppState {
    /// The engine cache.
    cache: ResourceCache<EngineFactory>,
    /// Generation modes by name, schemas already loaded.
    modes: HashMap<String, Mode>,
    /// Prompt template for generation requests.
    prompt: PromptTemplate,
}

impl AppState {
    /// Build handler state from configuration: construct the factory and
    /// cache, load mode schemas, and load the prompt template.
    ///
    /// # Errors
    /// Returns an error if a schema file cannot be read or parsed, the
    /// prompt template is invalid, or the cache configuration is invalid.
    pub fn from_config(config: &Config) -> Result<Self> {
        let factory = EngineFactory::new(config.engines.clone());
        let cache = ResourceCache::new(factory, config.cache.clone())?;

        let mut modes = HashMap::new();
        for (name, mode_config) in &config.modes {
            let schema = match (&mode_config.schema, &mode_config.schema_path) {
                (Some(inline), _) => inline.clone(),
                (None, Some(path)) => {
                    let contents = std::fs::read_to_string(path).map_err(|e| {
                        VellumError::Config(format!(
                            "failed to read schema for mode '{name}' from {}: {e}",
                            path.display()
                        ))
                    })?;
                    serde_json::from_str(&contents).map_err(|e| {
                        VellumError::Config(format!(
                            "invalid schema for mode '{name}' in {}: {e}",
                            path.display()
                        ))
                    })?
                }
                (None, None) => {
                    return Err(VellumError::Config(format!(
                        "mode '{name}' has neither an inline schema nor a schema_path"
                    )));
                }
            };
            modes.insert(
                name.to_lowercase(),
                Mode { engine_key: mode_config.engine.clone(), schema },
            );
        }

        let prompt = match &config.prompt_template {
            Some(path) => PromptTemplate::from_file(path)?,
            None => PromptTemplate::default(),
        };

        Ok(Self { cache, modes, prompt })
    }

    /// The engine cache, for the server to run the sweeper over and tear
    /// down on shutdown.
    #[must_use]
    pub fn cache(&self) -> &ResourceCache<EngineFactory> {
        &self.cache
    }
}

/// Body of `POST /generate`.
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    /// Generation mode name.
    pub mode: String,
    /// Text to run the mode over.
    pub input_text: String,
}

/// Body of a successful `POST /generate` response.
#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    /// Schema-shaped output.
    pub result: serde_json::Value,
}

/// Body of `POST /embed`.
#[derive(Debug, Deserialize)]
pub struct EmbedRequest {
    /// Texts to embed.
    pub texts: Vec<String>,
    /// Which embedding model to use.
    #[serde(default = "default_model_type")]
    pub model_type: String,
}

fn default_model_type() -> String {
    "document".to_string()
}

/// Body of a successful `POST /embed` response.
#[derive(Debug, Serialize)]
pub struct EmbedResponse {
    /// Base64-encoded int8 vectors, one per input text.
    pub embeddings: Vec<String>,
}

/// Route an HTTP request.
pub async fn handle_request(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (method.as_str(), path.as_str()) {
        ("POST", "/generate") => handle_generate(&state, req).await,
        ("POST", "/embed") => handle_embed(&state, req).await,
        ("GET", "/healthz") => json_response(StatusCode::OK, &json!({"status": "ok"})),
        (_, "/generate" | "/embed" | "/healthz") => {
            error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
        }
        _ => error_response(StatusCode::NOT_FOUND, "not found"),
    };

    debug!(method = %method, path = %path, status = %response.status(), "handled request");
    Ok(response)
}

/// `POST /generate`: render the prompt, acquire the mode's engine, and run
/// schema-constrained generation.
async fn handle_generate(state: &AppState, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let request: GenerateRequest = match read_json_body(req).await {
        Ok(request) => request,
        Err(response) => return *response,
    };

    let Some(mode) = state.modes.get(&request.mode.to_lowercase()) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            &format!("unknown mode '{}'", request.mode),
        );
    };

    let handle = match state.cache.acquire(&mode.engine_key).await {
        Ok(handle) => handle,
        Err(e) => return cache_error_response(&e),
    };

    let prompt = state.prompt.render(&request.input_text);
    match handle.generate(&prompt, &mode.schema, None).await {
        Ok(result) => json_response(StatusCode::OK, &GenerateResponse { result }),
        Err(e) => {
            error!(mode = %request.mode, engine = handle.key(), error = %e, "generation failed");
            if !e.is_viable() {
                // The backing resource is gone; drop the cached engine so
                // the next request reconstructs it.
                warn!(engine = handle.key(), "evicting non-viable engine");
                state.cache.evict(handle.key());
            }
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

/// `POST /embed`: acquire the embedding engine for the requested model type
/// and embed the batch.
async fn handle_embed(state: &AppState, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let request: EmbedRequest = match read_json_body(req).await {
        Ok(request) => request,
        Err(response) => return *response,
    };

    let key = format!("embedding:{}", request.model_type.to_lowercase());
    let handle = match state.cache.acquire(&key).await {
        Ok(handle) => handle,
        Err(e) => return cache_error_response(&e),
    };

    match handle.embed(&request.texts).await {
        Ok(embeddings) => {
            let encoded = embeddings.iter().map(vellum_abstraction::Embedding::to_base64);
            json_response(StatusCode::OK, &EmbedResponse { embeddings: encoded.collect() })
        }
        Err(e) => {
            error!(engine = handle.key(), error = %e, "embedding failed");
            if !e.is_viable() {
                warn!(engine = handle.key(), "evicting non-viable engine");
                state.cache.evict(handle.key());
            }
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

/// Read and deserialize a JSON request body, or produce the 400 response.
async fn read_json_body<T: serde::de::DeserializeOwned>(
    req: Request<Incoming>,
) -> std::result::Result<T, Box<Response<Full<Bytes>>>> {
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return Err(Box::new(error_response(
                StatusCode::BAD_REQUEST,
                &format!("failed to read body: {e}"),
            )));
        }
    };

    serde_json::from_slice(&body).map_err(|e| {
        Box::new(error_response(StatusCode::BAD_REQUEST, &format!("invalid request body: {e}")))
    })
}

/// Map cache errors to HTTP: unknown key is the caller's fault, a
/// construction failure is a transient backend problem.
fn cache_error_response(error: &CacheError) -> Response<Full<Bytes>> {
    match error {
        CacheError::UnknownKey(_) => error_response(StatusCode::BAD_REQUEST, &error.to_string()),
        CacheError::Construction { .. } => {
            error!(error = %error, "engine construction failed");
            error_response(StatusCode::SERVICE_UNAVAILABLE, &error.to_string())
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    // Serialization of our own response types cannot fail.
    let bytes = serde_json::to_vec(body).unwrap_or_default();
    let mut response = Response::new(Full::new(Bytes::from(bytes)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &json!({"error": message}))
}
