//! Embedded server for tests and host applications.
//!
//! Runs the gateway in a background task with explicit start, readiness,
//! and shutdown steps.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, VellumError};
use crate::server;

/// Manages an embedded gateway running in a background task.
pub struct ApiServer {
    /// Server configuration.
    config: Config,
    /// Shutdown signal sender.
    shutdown_tx: Option<oneshot::Sender<()>>,
    /// Server task handle.
    server_handle: Option<JoinHandle<Result<()>>>,
    /// The address the server binds to.
    address: SocketAddr,
}

impl ApiServer {
    /// Create a new embedded server (not started yet).
    #[must_use]
    pub fn new(config: Config) -> Self {
        let address = config.server.address;
        Self { config, shutdown_tx: None, server_handle: None, address }
    }

    /// Start the server in a background task.
    ///
    /// # Errors
    /// Returns an error if the server is already running.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(VellumError::Config("Server is already running".to_string()));
        }

        info!(address = %self.address, "Starting embedded Vellum gateway");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let config = self.config.clone();

        let server_handle =
            tokio::spawn(async move { server::run_with_shutdown(&config, shutdown_rx).await });

        self.shutdown_tx = Some(shutdown_tx);
        self.server_handle = Some(server_handle);
        Ok(())
    }

    /// Wait until the server accepts connections.
    ///
    /// # Errors
    /// Returns an error if the server is not running, its task has failed,
    /// or the timeout elapses first.
    pub async fn wait_for_ready(&self, timeout: Duration) -> Result<()> {
        let start_time = std::time::Instant::now();
        let mut poll_interval = interval(Duration::from_millis(50));
        poll_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        if self.server_handle.is_none() {
            return Err(VellumError::Config("Server is not running".to_string()));
        }

        loop {
            if start_time.elapsed() > timeout {
                return Err(VellumError::Config(format!(
                    "Server did not become ready within {timeout:?}"
                )));
            }

            if let Some(ref handle) = self.server_handle {
                if handle.is_finished() {
                    return Err(VellumError::Config(
                        "Server task completed unexpectedly while waiting for ready".to_string(),
                    ));
                }
            }

            match TcpStream::connect(self.address).await {
                Ok(_) => {
                    info!(
                        address = %self.address,
                        elapsed_ms = start_time.elapsed().as_millis(),
                        "Embedded server is ready"
                    );
                    return Ok(());
                }
                Err(e) => {
                    debug!(error = %e, "Server not ready yet, retrying");
                }
            }

            poll_interval.tick().await;
        }
    }

    /// Whether the server task exists and has not finished.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.server_handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// The address the server is bound to.
    #[must_use]
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Gracefully shut the server down.
    ///
    /// # Errors
    /// Returns an error if the server task fails or the shutdown times out.
    pub async fn shutdown(&mut self) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }

        info!(address = %self.address, "Shutting down embedded server");

        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            if shutdown_tx.send(()).is_err() {
                warn!("Shutdown signal receiver already dropped");
            }
        }

        if let Some(handle) = self.server_handle.take() {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(result)) => {
                    info!("Embedded server stopped gracefully");
                    result
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Server task panicked during shutdown");
                    Err(VellumError::Config(format!("Server shutdown error: {e}")))
                }
                Err(_) => {
                    warn!("Server shutdown timed out, task may still be running");
                    Err(VellumError::Config("Server shutdown timed out".to_string()))
                }
            }
        } else {
            Ok(())
        }
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("ApiServer dropped while running, sending shutdown signal");
            if let Some(shutdown_tx) = self.shutdown_tx.take() {
                let _ = shutdown_tx.send(());
            }
        }
    }
}
