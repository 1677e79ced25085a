//! Orchestrator - policy-gated suspension of hosts and application instances.
//!
//! Operators and automation ask the orchestrator for permission before taking
//! hosts down. A request is granted only when the hosts' applications would
//! still have enough healthy services, and only after the content clusters'
//! cluster controllers have accepted the corresponding storage node states.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  HTTP API (server) | CLI + client                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Engine: suspend / resume / remove / suspend_all + rollback │
//! ├──────────────────┬──────────────────┬───────────────────────┤
//! │  Policy          │  Cluster State   │  Status Store         │
//! │  (enough up)     │  Driver → CC RPC │  (locks + persisted)  │
//! ├──────────────────┴──────────────────┴───────────────────────┤
//! │  Topology Snapshot (applications, clusters, service health) │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use orchestrator::config::OrchestratorConfig;
//!
//! #[tokio::main]
//! async fn main() -> orchestrator::Result<()> {
//!     let config = OrchestratorConfig::development();
//!     orchestrator::run(config).await
//! }
//! ```

pub mod config;
pub mod error;
pub mod types;

pub mod context;
pub mod controller;
pub mod driver;
pub mod engine;
pub mod policy;
pub mod status;
pub mod topology;

pub mod cli;
pub mod client;
pub mod observability;
pub mod server;
pub mod shutdown;

// Re-exports
pub use error::{OrchestratorError, Result};
pub use types::*;

use config::OrchestratorConfig;
use controller::HttpClusterControllerClientFactory;
use driver::ClusterStateDriver;
use engine::Orchestrator;
use policy::HostedPolicy;
use server::ServerState;
use shutdown::ShutdownCoordinator;
use status::{InMemoryStatusService, StatusService};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use topology::InMemoryTopology;
use tracing::{error, info, warn};

/// Run the orchestrator server with the given configuration.
pub async fn run(config: OrchestratorConfig) -> Result<()> {
    observability::init(&config.observability)?;
    config.validate()?;
    info!(bind_addr = %config.server.bind_addr, "Starting orchestrator");

    let metrics = if config.observability.metrics_enabled {
        Some(observability::install_recorder()?)
    } else {
        None
    };

    let topology = Arc::new(load_topology(config.topology.path.as_ref())?);

    let status: Arc<dyn StatusService> = match &config.status.path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Arc::new(InMemoryStatusService::open(path)?)
        }
        None => {
            warn!("No status path configured, suspensions will not survive a restart");
            Arc::new(InMemoryStatusService::new())
        }
    };

    let factory = Arc::new(HttpClusterControllerClientFactory::new(&config.cluster_controller)?);
    let driver = ClusterStateDriver::new(factory, config.cluster_controller.port);
    let orchestrator = Arc::new(Orchestrator::new(
        topology.clone(),
        status,
        Arc::new(HostedPolicy::new()),
        driver,
        config.timeouts,
    ));

    let coordinator = ShutdownCoordinator::new();

    let signal_coordinator = coordinator.clone();
    tokio::spawn(async move {
        if let Err(e) = shutdown::listen_for_signals(signal_coordinator.clone()).await {
            error!("Signal handler error: {}", e);
            signal_coordinator.shutdown();
        }
    });

    let refresher = config.topology.path.clone().map(|path| {
        tokio::spawn(refresh_topology(
            topology,
            path,
            config.topology.refresh_interval,
            coordinator.clone(),
        ))
    });

    let server_coordinator = coordinator.clone();
    let result = server::run_server(
        config.server.bind_addr,
        ServerState::new(orchestrator, metrics),
        async move { server_coordinator.wait_for_shutdown().await },
    )
    .await;

    coordinator.shutdown();
    if let Some(handle) = refresher {
        if let Err(e) = handle.await {
            warn!("Topology refresher ended abnormally: {}", e);
        }
    }

    info!("Orchestrator shutdown complete");
    result
}

fn load_topology(path: Option<&PathBuf>) -> Result<InMemoryTopology> {
    match path {
        Some(path) if path.exists() => InMemoryTopology::from_file(path),
        Some(path) => {
            warn!(path = %path.display(), "Topology file not found, starting empty");
            Ok(InMemoryTopology::new())
        }
        None => {
            warn!("No topology path configured, every host will be unknown");
            Ok(InMemoryTopology::new())
        }
    }
}

/// Reload the topology file every `interval` until shutdown.
/// A failed reload keeps the previous snapshot.
async fn refresh_topology(
    topology: Arc<InMemoryTopology>,
    path: PathBuf,
    interval: Duration,
    coordinator: ShutdownCoordinator,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = topology.reload(&path) {
                    warn!(path = %path.display(), error = %e, "Failed to reload topology");
                }
            }
            _ = coordinator.wait_for_shutdown() => break,
        }
    }
}
