//! Vellum Core - HTTP gateway serving cached inference engines.
//!
//! This crate provides:
//! - HTTP server exposing `/generate`, `/embed`, and `/healthz`
//! - Configuration management
//! - Prompt templating
//! - Error handling
//!
//! # Example
//!
//! ```rust,no_run
//! use vellum_core::{config::Config, server};
//!
//! #[tokio::main]
//! async fn main() -> vellum_core::error::Result<()> {
//!     let config = Config::load()?;
//!     server::run(&config).await
//! }
//! ```

pub mod config;
pub mod error;
pub mod prompt;
pub mod server;

pub use config::Config;
pub use error::{Result, VellumError};
pub use prompt::PromptTemplate;
pub use server::ApiServer;
