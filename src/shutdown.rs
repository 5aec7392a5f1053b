use actix_web::dev::ServerHandle;
use std::path::PathBuf;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::pipeline::workspace::sweep_stale_workspaces;

/// Handles graceful shutdown of the application
///
/// This module orchestrates graceful shutdown by:
/// 1. Listening for shutdown signals (SIGTERM, SIGINT/CTRL+C)
/// 2. Stopping the HTTP server (stops accepting new requests, lets in-flight uploads finish)
/// 3. Waiting for the server task to complete
/// 4. Removing any job workspaces still present under the work root
pub struct ShutdownCoordinator {
    server_handle: ServerHandle,
    server_task: JoinHandle<Result<(), std::io::Error>>,
    work_root: PathBuf,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new(
        server_handle: ServerHandle,
        server_task: JoinHandle<Result<(), std::io::Error>>,
        work_root: PathBuf,
    ) -> Self {
        Self {
            server_handle,
            server_task,
            work_root,
        }
    }

    /// Wait for shutdown signal and perform graceful shutdown
    ///
    /// This function will block until either:
    /// - CTRL+C is received
    /// - SIGTERM is received (Unix only)
    pub async fn wait_for_shutdown(self) -> Result<(), std::io::Error> {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for CTRL+C: {:?}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM signal handler: {:?}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received CTRL+C signal, initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM signal, initiating graceful shutdown...");
            }
        }

        self.shutdown().await
    }

    /// Perform the actual shutdown sequence
    async fn shutdown(self) -> Result<(), std::io::Error> {
        // 1. Stop HTTP server; graceful stop waits for in-flight uploads
        info!("Stopping HTTP server (no longer accepting new requests)...");
        self.server_handle.stop(true).await;
        info!("HTTP server stopped accepting new requests");

        // 2. Wait for HTTP server task to complete
        info!("Waiting for HTTP server to fully shut down...");
        match self.server_task.await {
            Ok(Ok(_)) => info!("HTTP server shut down successfully"),
            Ok(Err(e)) => error!("HTTP server encountered error during shutdown: {:?}", e),
            Err(e) => error!("HTTP server task panicked: {:?}", e),
        }

        // 3. No job is running any more; clear what is left in the work root
        match sweep_stale_workspaces(&self.work_root) {
            Ok(0) => info!("Work directory is clean"),
            Ok(n) => info!("Removed {} leftover job workspaces", n),
            Err(e) => error!("Failed to sweep work directory: {:?}", e),
        }

        info!("Graceful shutdown completed successfully");
        Ok(())
    }
}
