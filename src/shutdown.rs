//! Shutdown coordination for the daemon.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::node::MeshNode;

/// Ties ctrl+c (or an explicit trigger) to node teardown and background tasks.
pub struct ShutdownManager {
    cancel_token: CancellationToken,
    task_handles: Vec<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            task_handles: Vec::new(),
        }
    }

    /// Clone of the token background tasks should watch.
    pub fn token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn register_task(&mut self, handle: JoinHandle<()>) {
        self.task_handles.push(handle);
    }

    /// Wait for ctrl+c or for the token to be cancelled elsewhere, then shut
    /// the node down and give registered tasks a bounded time to finish.
    pub async fn wait_for_shutdown(mut self, node: Arc<MeshNode>) {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => tracing::info!("🛑 Shutdown signal received"),
                Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
            },
            _ = self.cancel_token.cancelled() => {
                tracing::info!("🛑 Shutdown requested");
            }
        }

        self.cancel_token.cancel();
        node.shutdown().await;

        let timeout = tokio::time::Duration::from_secs(5);
        let shutdown_tasks = std::pin::pin!(async {
            for handle in self.task_handles.drain(..) {
                let _ = handle.await;
            }
        });

        match tokio::time::timeout(timeout, shutdown_tasks).await {
            Ok(_) => tracing::info!("✓ All tasks shut down gracefully"),
            Err(_) => tracing::warn!("⏱️  Shutdown timeout: Some tasks did not complete"),
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
