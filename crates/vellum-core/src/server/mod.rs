//! HTTP server lifecycle.
//!
//! The cache and sweeper are constructed once at startup, owned here, and
//! shared with handlers through an `Arc`. Shutdown stops the sweeper with a
//! bounded join and then evicts everything so engine teardown happens
//! before the process exits.

pub mod embedded;
pub mod handler;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use vellum_engines::cache::IdleSweeper;

use crate::config::Config;
use crate::error::{Result, VellumError};
use handler::AppState;

pub use embedded::ApiServer;

/// Run the server until Ctrl+C.
///
/// # Errors
/// Returns an error if startup fails or the listener breaks.
pub async fn run(config: &Config) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, shutting down");
            let _ = shutdown_tx.send(());
        }
    });

    run_with_shutdown(config, shutdown_rx).await
}

/// Run the server until the shutdown signal fires.
///
/// # Errors
/// Returns an error if the configuration is invalid or the listener cannot
/// bind.
pub async fn run_with_shutdown(
    config: &Config,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> Result<()> {
    config.validate()?;

    let state = Arc::new(AppState::from_config(config)?);

    // The sweeper only earns its keep when entries can outlive a request.
    let mut sweeper = if config.cache.enabled {
        Some(IdleSweeper::spawn(state.cache().clone(), config.cache.sweep_interval()))
    } else {
        None
    };

    let listener = TcpListener::bind(config.server.address).await.map_err(|e| {
        VellumError::Config(format!("failed to bind to {}: {e}", config.server.address))
    })?;

    info!(address = %config.server.address, "Vellum gateway started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                handler::handle_request(Arc::clone(&state), req)
                            });
                            if let Err(e) =
                                http1::Builder::new().serve_connection(io, service).await
                            {
                                warn!(%addr, error = %e, "Error serving connection");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                    }
                }
            }
            _ = &mut shutdown_rx => {
                info!("Shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    if let Some(sweeper) = sweeper.as_mut() {
        sweeper.shutdown().await;
    }
    state.cache().evict_all();
    info!("Vellum gateway stopped");

    Ok(())
}
