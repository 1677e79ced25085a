//! Configuration module for the orchestrator.

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for an orchestrator instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Operation deadlines.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Cluster controller client configuration.
    #[serde(default)]
    pub cluster_controller: ClusterControllerConfig,
    /// Status store configuration.
    #[serde(default)]
    pub status: StatusConfig,
    /// Topology source configuration.
    #[serde(default)]
    pub topology: TopologyConfig,
    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl OrchestratorConfig {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::Config(format!("Failed to read config file: {}", e))
        })?;

        let config: Self = serde_json::from_str(&content).map_err(|e| {
            OrchestratorError::Config(format!("Failed to parse config: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        let timeouts = &self.timeouts;
        for (field, value) in [
            ("timeouts.single_op", timeouts.single_op),
            ("timeouts.max_batch", timeouts.max_batch),
            ("timeouts.rollback", timeouts.rollback),
        ] {
            if value.is_zero() {
                return Err(OrchestratorError::InvalidConfig {
                    field: field.to_string(),
                    reason: "Timeout must be non-zero".to_string(),
                });
            }
        }

        if timeouts.max_batch < timeouts.single_op {
            return Err(OrchestratorError::InvalidConfig {
                field: "timeouts.max_batch".to_string(),
                reason: "Batch timeout must be at least the single operation timeout".to_string(),
            });
        }

        let cc = &self.cluster_controller;
        if cc.rounds == 0 {
            return Err(OrchestratorError::InvalidConfig {
                field: "cluster_controller.rounds".to_string(),
                reason: "At least one round over the endpoints is required".to_string(),
            });
        }

        if cc.backoff_multiplier < 1.0 {
            return Err(OrchestratorError::InvalidConfig {
                field: "cluster_controller.backoff_multiplier".to_string(),
                reason: "Multiplier must be at least 1.0".to_string(),
            });
        }

        if cc.downstream_overhead >= timeouts.single_op {
            return Err(OrchestratorError::InvalidConfig {
                field: "cluster_controller.downstream_overhead".to_string(),
                reason: "Overhead must be smaller than the single operation timeout".to_string(),
            });
        }

        Ok(())
    }

    /// Create a minimal development configuration.
    pub fn development() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: SocketAddr::from(([127, 0, 0, 1], 19071)),
            },
            timeouts: TimeoutConfig::default(),
            cluster_controller: ClusterControllerConfig::default(),
            status: StatusConfig {
                path: Some(PathBuf::from("/tmp/orchestrator/status.json")),
            },
            topology: TopologyConfig {
                path: Some(PathBuf::from("/tmp/orchestrator/topology.json")),
                refresh_interval: Duration::from_secs(5),
            },
            observability: ObservabilityConfig {
                log_level: "debug".to_string(),
                ..Default::default()
            },
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the orchestrator API.
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 19071)),
        }
    }
}

/// Deadlines for orchestrator operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Deadline of a single-application operation.
    #[serde(with = "duration_serde")]
    pub single_op: Duration,
    /// Upper bound of a multi-application batch deadline.
    #[serde(with = "duration_serde")]
    pub max_batch: Duration,
    /// Budget for rolling back a failed batch.
    #[serde(with = "duration_serde")]
    pub rollback: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            single_op: Duration::from_secs(10),
            max_batch: Duration::from_secs(60),
            rollback: Duration::from_secs(10),
        }
    }
}

impl TimeoutConfig {
    /// Deadline for a batch over `groups` applications.
    pub fn batch_timeout(&self, groups: usize) -> Duration {
        let scaled = self.single_op.saturating_mul(groups.max(1) as u32);
        scaled.min(self.max_batch)
    }
}

/// Cluster controller client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterControllerConfig {
    /// State API port of the cluster controllers.
    pub port: u16,
    /// Connection timeout per endpoint.
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
    /// Rounds over the endpoint list before giving up.
    pub rounds: u32,
    /// Delay after the first unsuccessful round.
    #[serde(with = "duration_serde")]
    pub initial_backoff: Duration,
    /// Maximum delay between rounds.
    #[serde(with = "duration_serde")]
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Time reserved for the request to travel to and from the controller.
    #[serde(with = "duration_serde")]
    pub downstream_overhead: Duration,
    /// Smallest server-side timeout worth sending a request with.
    #[serde(with = "duration_serde")]
    pub min_server_timeout: Duration,
}

impl Default for ClusterControllerConfig {
    fn default() -> Self {
        Self {
            port: 19050,
            connect_timeout: Duration::from_secs(1),
            rounds: 2,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            downstream_overhead: Duration::from_millis(300),
            min_server_timeout: Duration::from_millis(100),
        }
    }
}

/// Status store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusConfig {
    /// File the status is persisted to. In-memory only when absent.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Topology source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// JSON file with the application instances.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// How often the file is reloaded.
    #[serde(with = "duration_serde")]
    pub refresh_interval: Duration,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            path: None,
            refresh_interval: Duration::from_secs(10),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Expose Prometheus metrics on the API server.
    pub metrics_enabled: bool,
    /// Log level.
    pub log_level: String,
    /// Enable JSON logging.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Durations in config files: `"500ms"`, `"10s"`, `"2m"`, `"1h 30m"`, or a
/// bare number of milliseconds.
pub mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        parse(&value).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse(value: &str) -> Result<Duration, String> {
        let value = value.trim();
        if let Ok(millis) = value.parse::<u64>() {
            return Ok(Duration::from_millis(millis));
        }
        humantime::parse_duration(value).map_err(|e| format!("invalid duration {:?}: {}", value, e))
    }
}
