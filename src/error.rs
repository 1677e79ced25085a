//! Error types for the orchestrator.
//!
//! This module provides a unified error type [`OrchestratorError`] for all
//! orchestrator operations, along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! - **Denial**: the policy (or a cluster controller) refused a state change.
//!   Expected and recoverable, never retried automatically.
//! - **Batch denial**: one node group of a multi-application batch failed; the
//!   already committed prefix has been rolled back.
//! - **Timeout**: the operation deadline passed, or an application lock could
//!   not be acquired in time.
//! - **Cluster controller**: no controller endpoint accepted the request.
//! - **Not found**: a host or application unknown to the topology.
//!
//! # Example
//!
//! ```rust
//! use orchestrator::error::OrchestratorError;
//!
//! fn handle_error(err: &OrchestratorError) {
//!     if err.is_denial() {
//!         println!("Refused: {}", err);
//!     } else if err.is_retryable() {
//!         println!("Retrying operation...");
//!     } else {
//!         println!("Fatal error: {}", err);
//!     }
//! }
//! ```

use crate::types::{ApplicationReference, ClusterId, HostName, NodeGroup, ServiceType};
use serde::Serialize;
use std::fmt;
use std::io;
use thiserror::Error;

/// Main error type for orchestrator operations.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    // Policy errors
    #[error("Changing the state of {node_group} would violate {reason}")]
    HostStateChangeDenied {
        node_group: String,
        reason: Box<DenialReason>,
    },

    #[error("Failed to suspend {} node groups with parent host {parent}: {source}", .outcomes.len())]
    BatchHostStateChangeDenied {
        parent: HostName,
        outcomes: Vec<GroupOutcome>,
        #[source]
        source: Box<OrchestratorError>,
        rollback_failures: Vec<String>,
    },

    // Timeout errors
    #[error("Timed out waiting for the lock of application {0}")]
    LockTimeout(ApplicationReference),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    // Cluster controller errors
    #[error("Cluster controller request for {host} in cluster {cluster_id} failed on all endpoints: {}", .attempts.join("; "))]
    ClusterControllerUnavailable {
        cluster_id: ClusterId,
        host: HostName,
        attempts: Vec<String>,
    },

    #[error("Cluster controller request failed: {0}")]
    ClusterController(String),

    #[error("Not the master cluster controller: {0}")]
    NotMaster(String),

    #[error("Network error: {0}")]
    Network(String),

    // Lookup errors
    #[error("Host not found: {0}")]
    HostNotFound(HostName),

    #[error("Application not found: {0}")]
    ApplicationNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // External errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Denial produced by the policy or a cluster controller refusal.
    pub fn denied(node_group: &NodeGroup, reason: DenialReason) -> Self {
        OrchestratorError::HostStateChangeDenied {
            node_group: node_group.to_string(),
            reason: Box::new(reason),
        }
    }

    /// Check if error is retryable against another endpoint.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::NotMaster(_) | OrchestratorError::Network(_)
        )
    }

    /// Whether this is a (batch) policy denial rather than a failure.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            OrchestratorError::HostStateChangeDenied { .. }
                | OrchestratorError::BatchHostStateChangeDenied { .. }
        )
    }

    /// The denial reason, if this error or its batch cause is a denial.
    pub fn denial_reason(&self) -> Option<&DenialReason> {
        match self {
            OrchestratorError::HostStateChangeDenied { reason, .. } => Some(reason),
            OrchestratorError::BatchHostStateChangeDenied { source, .. } => source.denial_reason(),
            _ => None,
        }
    }

    /// Convert to an HTTP status code.
    pub fn status_code(&self) -> u16 {
        match self {
            OrchestratorError::HostStateChangeDenied { .. }
            | OrchestratorError::BatchHostStateChangeDenied { .. } => 409,
            OrchestratorError::HostNotFound(_) | OrchestratorError::ApplicationNotFound(_) => 404,
            OrchestratorError::InvalidInput(_) => 400,
            OrchestratorError::Rejected { status, .. } => *status,
            OrchestratorError::LockTimeout(_) | OrchestratorError::Timeout(_) => 504,
            OrchestratorError::ClusterControllerUnavailable { .. }
            | OrchestratorError::NotMaster(_)
            | OrchestratorError::Network(_) => 502,
            _ => 500,
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(e: serde_json::Error) -> Self {
        OrchestratorError::Serialization(e.to_string())
    }
}

/// Invariant a refused state change would have violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Constraint {
    EnoughServicesUp,
    ClusterControllerRefused,
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::EnoughServicesUp => f.write_str("enough-services-up"),
            Constraint::ClusterControllerRefused => f.write_str("cluster-controller-refused"),
        }
    }
}

/// Why a state change was refused, in a form suitable for an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DenialReason {
    pub constraint: Constraint,
    pub cluster_id: Option<ClusterId>,
    pub service_type: Option<ServiceType>,
    pub message: String,
    /// Hosts already suspended that contributed to the violation.
    pub suspended_hosts: Vec<HostName>,
    /// Hosts with services reported down that contributed to the violation.
    pub down_hosts: Vec<HostName>,
    pub missing_services: usize,
}

impl DenialReason {
    pub fn new(constraint: Constraint, message: impl Into<String>) -> Self {
        Self {
            constraint,
            cluster_id: None,
            service_type: None,
            message: message.into(),
            suspended_hosts: Vec::new(),
            down_hosts: Vec::new(),
            missing_services: 0,
        }
    }

    pub fn for_cluster(mut self, cluster_id: ClusterId, service_type: ServiceType) -> Self {
        self.cluster_id = Some(cluster_id);
        self.service_type = Some(service_type);
        self
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.constraint, self.message)
    }
}

/// What happened to one node group of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupState {
    NotAttempted,
    Probed,
    ProbeFailed,
    Committed,
    CommitFailed,
    RolledBack,
    RollbackFailed,
}

/// Outcome of one node group in a failed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupOutcome {
    pub group: NodeGroup,
    pub state: GroupState,
}

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
