//! Error types for the Vellum gateway.

use thiserror::Error;
use vellum_engines::cache::{CacheConfigError, CacheError};

/// Core error type for gateway operations.
#[derive(Error, Debug)]
pub enum VellumError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Address parsing errors
    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] std::net::AddrParseError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource cache errors
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Cache configuration errors
    #[error("Cache configuration error: {0}")]
    CacheConfig(#[from] CacheConfigError),

    /// Engine-related errors
    #[error("Engine error: {0}")]
    Engine(String),
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, VellumError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_address_parsing() {
        let parse_err = "invalid:address:format".parse::<std::net::SocketAddr>().unwrap_err();
        let err: VellumError = parse_err.into();
        match err {
            VellumError::InvalidAddress(_) => {}
            _ => panic!("Expected InvalidAddress error variant"),
        }
    }

    #[test]
    fn test_error_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err: VellumError = io_err.into();
        match err {
            VellumError::Io(_) => {}
            _ => panic!("Expected Io error variant"),
        }
    }

    #[test]
    fn test_error_cache_conversion() {
        let cache_err = CacheError::UnknownKey("summarize".to_string());
        let err: VellumError = cache_err.into();
        assert!(err.to_string().contains("summarize"));
    }

    #[test]
    fn test_error_config_display() {
        let err = VellumError::Config("missing engine table".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing engine table");
    }
}
