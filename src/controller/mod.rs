//! Cluster controller client.
//!
//! The cluster controllers of a content cluster own the state of its storage
//! nodes. The orchestrator asks them to move nodes into maintenance, back up,
//! or down; only the elected master accepts such requests.

mod failover;
mod http;
mod timeouts;

pub use failover::FailoverPolicy;
pub use http::{HttpClusterControllerClient, HttpClusterControllerClientFactory};
pub use timeouts::ClusterControllerClientTimeouts;

use crate::context::OperationContext;
use crate::error::Result;
use crate::types::{ClusterControllerNodeState, ClusterId, HostName, ServiceType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Address of one cluster controller replica.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControllerEndpoint {
    pub host: HostName,
    pub port: u16,
}

impl ControllerEndpoint {
    pub fn new(host: impl Into<HostName>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ControllerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Client for the cluster controllers of one content cluster.
#[async_trait]
pub trait ClusterControllerClient: Send + Sync {
    /// Request that the node with `index` on `host` be set to `state`.
    ///
    /// Returns whether the controller accepted the change. With `force` the
    /// controller skips its own safety checks. In a probe context the
    /// controller only evaluates the request.
    async fn try_set_node_state(
        &self,
        ctx: &OperationContext,
        host: &HostName,
        index: u16,
        state: ClusterControllerNodeState,
        service_type: &ServiceType,
        force: bool,
    ) -> Result<bool>;
}

/// Creates clients bound to a list of controller endpoints.
pub trait ClusterControllerClientFactory: Send + Sync {
    fn create_client(
        &self,
        endpoints: Vec<ControllerEndpoint>,
        cluster_id: &ClusterId,
    ) -> Arc<dyn ClusterControllerClient>;
}

/// Condition under which the controller applies a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Condition {
    Safe,
    Force,
}

/// User-wanted state of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitState {
    pub state: ClusterControllerNodeState,
    pub reason: String,
}

/// Body of a set-node-state request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetNodeStateRequest {
    pub state: NodeStates,
    pub condition: Condition,
    #[serde(rename = "response-wait")]
    pub response_wait: String,
    pub probe: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStates {
    pub user: UnitState,
}

impl SetNodeStateRequest {
    pub const WAIT_UNTIL_CLUSTER_ACKED: &'static str = "WAIT_UNTIL_CLUSTER_ACKED";
    pub const REASON: &'static str = "orchestrator";

    pub fn new(state: ClusterControllerNodeState, force: bool, probe: bool) -> Self {
        Self {
            state: NodeStates {
                user: UnitState {
                    state,
                    reason: Self::REASON.to_string(),
                },
            },
            condition: if force { Condition::Force } else { Condition::Safe },
            response_wait: Self::WAIT_UNTIL_CLUSTER_ACKED.to_string(),
            probe,
        }
    }
}

/// Controller answer to a set-node-state request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetNodeStateResponse {
    #[serde(rename = "wasModified")]
    pub was_modified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
