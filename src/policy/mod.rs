//! Admission-control policy.
//!
//! Decides whether a node group may go down given the live topology and the
//! hosts already suspended. Every decision is evaluated against the state
//! passed in; nothing is cached between calls.

mod application;
mod cluster;
mod reasons;

pub use application::ApplicationApi;
pub use cluster::{ClusterRequirement, ClusterView};
pub use reasons::SuspensionReasons;

use crate::context::OperationContext;
use crate::error::{OrchestratorError, Result};
use tracing::{debug, info};

/// Admission control for taking node groups down.
pub trait Policy: Send + Sync {
    /// Grant a temporary suspension of the node group, or deny it.
    fn grant_suspension_request(
        &self,
        ctx: &OperationContext,
        application: &ApplicationApi<'_>,
    ) -> Result<SuspensionReasons>;

    /// Grant permission to remove the node group permanently, or deny it.
    fn acquire_permission_to_remove(
        &self,
        ctx: &OperationContext,
        application: &ApplicationApi<'_>,
    ) -> Result<SuspensionReasons>;
}

/// Policy for hosted applications: every cluster touched by the node group
/// must stay within the requirement of its service type.
#[derive(Debug, Default, Clone)]
pub struct HostedPolicy;

impl HostedPolicy {
    pub fn new() -> Self {
        Self
    }

    fn verify_clusters(
        &self,
        ctx: &OperationContext,
        application: &ApplicationApi<'_>,
    ) -> Result<SuspensionReasons> {
        let group = application.node_group();
        let mut reasons = SuspensionReasons::new();

        for cluster in application.clusters_in_group() {
            if let Err(reason) = cluster.verify_group_going_down(&mut reasons) {
                info!(
                    operation_id = %ctx.id(),
                    node_group = %group,
                    cluster = %cluster.cluster().cluster_id,
                    probe = ctx.is_probe(),
                    "Denied: {}", reason
                );
                return Err(OrchestratorError::denied(group, reason));
            }
        }

        debug!(operation_id = %ctx.id(), node_group = %group, reasons = %reasons, "Granted");
        Ok(reasons)
    }
}

impl Policy for HostedPolicy {
    fn grant_suspension_request(
        &self,
        ctx: &OperationContext,
        application: &ApplicationApi<'_>,
    ) -> Result<SuspensionReasons> {
        self.verify_clusters(ctx, application)
    }

    fn acquire_permission_to_remove(
        &self,
        ctx: &OperationContext,
        application: &ApplicationApi<'_>,
    ) -> Result<SuspensionReasons> {
        self.verify_clusters(ctx, application)
    }
}
