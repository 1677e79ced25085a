//! Shutdown coordination for the orchestrator server.
//!
//! The HTTP server and the topology refresher both stop when the
//! coordinator fires, which happens on SIGTERM, SIGINT or an explicit call.

use crate::error::{OrchestratorError, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Fires once and wakes every waiter.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.rx.borrow()
    }

    /// Initiate shutdown. Later calls are no-ops.
    pub fn shutdown(&self) {
        let first = self.tx.send_if_modified(|down| {
            let changed = !*down;
            *down = true;
            changed
        });
        if first {
            info!("Initiating graceful shutdown");
        }
    }

    /// Resolve once shutdown has been initiated.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for a termination signal, then fire `coordinator`.
#[cfg(unix)]
pub async fn listen_for_signals(coordinator: ShutdownCoordinator) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let install = |kind: SignalKind| {
        signal(kind).map_err(|e| {
            OrchestratorError::Internal(format!("Failed to install signal handler: {}", e))
        })
    };
    let mut sigterm = install(SignalKind::terminate())?;
    let mut sigint = install(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
        _ = coordinator.wait_for_shutdown() => return Ok(()),
    }

    coordinator.shutdown();
    Ok(())
}

/// Wait for Ctrl+C, then fire `coordinator`.
#[cfg(not(unix))]
pub async fn listen_for_signals(coordinator: ShutdownCoordinator) -> Result<()> {
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.map_err(|e| OrchestratorError::Internal(format!("Failed to install Ctrl+C handler: {}", e)))?;
            info!("Received Ctrl+C");
        }
        _ = coordinator.wait_for_shutdown() => return Ok(()),
    }

    coordinator.shutdown();
    Ok(())
}
