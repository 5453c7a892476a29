//! Configuration for the Vellum gateway.
//!
//! Configuration is loaded from a TOML file named by the `VELLUM_CONFIG`
//! environment variable, falling back to built-in defaults (a mock-only
//! setup useful for local development).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use vellum_engines::cache::CacheConfig;
use vellum_engines::factory::EngineSpec;

use crate::error::{Result, VellumError};

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "VELLUM_CONFIG";

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// The address to bind the HTTP server to.
    #[serde(default = "default_address")]
    pub address: SocketAddr,
}

fn default_address() -> SocketAddr {
    // This is a compile-time constant, so expect is safe
    "127.0.0.1:8000".parse().expect("valid default address")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { address: default_address() }
    }
}

/// One generation mode: which engine serves it and the JSON schema that
/// constrains its output.
#[derive(Debug, Clone, Deserialize)]
pub struct ModeConfig {
    /// The resource key of the engine serving this mode.
    pub engine: String,
    /// Path to a JSON schema file.
    #[serde(default)]
    pub schema_path: Option<PathBuf>,
    /// Inline JSON schema (takes precedence over `schema_path`).
    #[serde(default)]
    pub schema: Option<serde_json::Value>,
}

/// Root configuration for the gateway.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Resource cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Engine specs keyed by resource key (e.g., "generation",
    /// "embedding:document", "embedding:query").
    #[serde(default)]
    pub engines: HashMap<String, EngineSpec>,

    /// Generation modes keyed by mode name (e.g., "extraction").
    #[serde(default)]
    pub modes: HashMap<String, ModeConfig>,

    /// Path to a prompt template file with an `{input}` placeholder.
    #[serde(default)]
    pub prompt_template: Option<PathBuf>,
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the file named by `VELLUM_CONFIG`, or
    /// defaults if the variable is unset.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) => Self::from_path(Path::new(&path)),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            VellumError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        toml::from_str(&contents).map_err(|e| {
            VellumError::Config(format!("failed to parse {}: {e}", path.display()))
        })
    }

    /// Validate cross-references between sections.
    ///
    /// # Errors
    /// Returns an error if a mode names an unknown engine, a mode has no
    /// schema, or the cache configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;

        for (mode, mode_config) in &self.modes {
            if !self.engines.contains_key(&mode_config.engine) {
                return Err(VellumError::Config(format!(
                    "mode '{mode}' references unknown engine '{}'",
                    mode_config.engine
                )));
            }
            if mode_config.schema.is_none() && mode_config.schema_path.is_none() {
                return Err(VellumError::Config(format!(
                    "mode '{mode}' has neither an inline schema nor a schema_path"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use vellum_engines::factory::EngineKind;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.address, "127.0.0.1:8000".parse().unwrap());
    }

    #[test]
    fn test_config_default_is_valid() {
        let config = Config::new();
        assert!(config.engines.is_empty());
        assert!(config.modes.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_config_from_toml_file() {
        let toml = r#"
            [server]
            address = "127.0.0.1:9100"

            [cache]
            idle_timeout_secs = 60
            sweep_interval_secs = 10

            [engines.generation]
            kind = "generation"
            model_id = "phi-3-mini"
            base_url = "http://localhost:8080/v1"

            [engines."embedding:document"]
            kind = "embedding"
            model_id = "nomic-embed-text"
            base_url = "http://localhost:8081/v1"

            [modes.extraction]
            engine = "generation"
            schema = { type = "object" }
        "#;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(toml.as_bytes()).unwrap();

        let config = Config::from_path(file.path()).unwrap();
        assert_eq!(config.server.address, "127.0.0.1:9100".parse().unwrap());
        assert_eq!(config.cache.idle_timeout_secs, 60);
        assert_eq!(config.engines["generation"].kind, EngineKind::Generation);
        assert_eq!(config.engines["embedding:document"].model_id, "nomic-embed-text");
        assert_eq!(config.modes["extraction"].engine, "generation");
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_unknown_engine_reference() {
        let toml = r#"
            [modes.extraction]
            engine = "missing"
            schema = { type = "object" }
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unknown engine"));
    }

    #[test]
    fn test_validate_rejects_schemaless_mode() {
        let toml = r#"
            [engines.generation]
            kind = "mock"

            [modes.extraction]
            engine = "generation"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("schema"));
    }

    #[test]
    fn test_from_path_missing_file() {
        let err = Config::from_path(Path::new("/nonexistent/vellum.toml")).unwrap_err();
        assert!(matches!(err, VellumError::Config(_)));
    }
}
