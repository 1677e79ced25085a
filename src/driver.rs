//! Cluster state driver.
//!
//! Turns an orchestration decision into node state requests against the
//! cluster controllers of each affected content cluster.

use crate::context::OperationContext;
use crate::controller::{ClusterControllerClientFactory, ControllerEndpoint};
use crate::error::{Constraint, DenialReason, OrchestratorError, Result};
use crate::types::{
    ApplicationInstance, ClusterControllerNodeState, ClusterId, NodeGroup, ServiceType,
    StorageNode,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Pushes storage node states to cluster controllers.
pub struct ClusterStateDriver {
    factory: Arc<dyn ClusterControllerClientFactory>,
    controller_port: u16,
}

impl ClusterStateDriver {
    pub fn new(factory: Arc<dyn ClusterControllerClientFactory>, controller_port: u16) -> Self {
        Self {
            factory,
            controller_port,
        }
    }

    /// Cluster controller endpoints of an application, lowest index first.
    pub fn endpoints_for(&self, instance: &ApplicationInstance) -> Vec<ControllerEndpoint> {
        instance
            .cluster_controllers()
            .into_iter()
            .map(|controller| ControllerEndpoint::new(controller.host.clone(), self.controller_port))
            .collect()
    }

    /// Ask the controllers to put `nodes` of one cluster into maintenance.
    /// Returns false as soon as a controller refuses a node.
    pub async fn set_nodes_maintenance(
        &self,
        ctx: &OperationContext,
        endpoints: Vec<ControllerEndpoint>,
        cluster_id: &ClusterId,
        nodes: &[StorageNode],
    ) -> Result<bool> {
        let refused = self
            .first_refused(
                ctx,
                endpoints,
                cluster_id,
                nodes,
                ClusterControllerNodeState::Maintenance,
                false,
            )
            .await?;
        Ok(refused.is_none())
    }

    async fn first_refused<'n>(
        &self,
        ctx: &OperationContext,
        endpoints: Vec<ControllerEndpoint>,
        cluster_id: &ClusterId,
        nodes: &'n [StorageNode],
        state: ClusterControllerNodeState,
        force: bool,
    ) -> Result<Option<&'n StorageNode>> {
        let client = self.factory.create_client(endpoints, cluster_id);
        let service_type = ServiceType::storage_node();

        for node in nodes {
            let accepted = client
                .try_set_node_state(ctx, &node.host, node.index, state, &service_type, force)
                .await?;
            if !accepted {
                return Ok(Some(node));
            }
        }
        Ok(None)
    }

    /// Set `state` on `nodes`, cluster by cluster.
    ///
    /// A refusal becomes a denial of `group`; RPC failures propagate.
    pub async fn set_node_states(
        &self,
        ctx: &OperationContext,
        instance: &ApplicationInstance,
        group: &NodeGroup,
        nodes: &[StorageNode],
        state: ClusterControllerNodeState,
        force: bool,
    ) -> Result<()> {
        if nodes.is_empty() {
            return Ok(());
        }

        let endpoints = self.endpoints_for(instance);
        for (cluster_id, cluster_nodes) in by_cluster(nodes) {
            debug!(
                operation_id = %ctx.id(),
                cluster = %cluster_id,
                nodes = cluster_nodes.len(),
                state = %state,
                probe = ctx.is_probe(),
                "Pushing node states"
            );

            if let Some(node) = self
                .first_refused(ctx, endpoints.clone(), &cluster_id, &cluster_nodes, state, force)
                .await?
            {
                let reason = DenialReason::new(
                    Constraint::ClusterControllerRefused,
                    format!("cluster controller refused to set {} to {}", node, state),
                )
                .for_cluster(cluster_id.clone(), ServiceType::storage_node());
                return Err(OrchestratorError::denied(group, reason));
            }
        }
        Ok(())
    }

    /// Whether every storage node of the application would accept maintenance.
    pub async fn is_quiescent(
        &self,
        ctx: &OperationContext,
        instance: &ApplicationInstance,
    ) -> bool {
        let probe = ctx.subcontext_for_single_app_op(true);
        let endpoints = self.endpoints_for(instance);
        let all_nodes = match instance.storage_nodes() {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(application = %instance.reference, error = %e, "Cannot address storage nodes");
                return false;
            }
        };

        for cluster in instance.storage_clusters() {
            let nodes: Vec<StorageNode> = all_nodes
                .iter()
                .filter(|n| n.cluster_id == cluster.cluster_id)
                .cloned()
                .collect();

            match self
                .set_nodes_maintenance(&probe, endpoints.clone(), &cluster.cluster_id, &nodes)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    info!(application = %instance.reference, cluster = %cluster.cluster_id, "Not quiescent");
                    return false;
                }
                Err(e) => {
                    warn!(
                        application = %instance.reference,
                        cluster = %cluster.cluster_id,
                        error = %e,
                        "Failed to probe cluster controller"
                    );
                    return false;
                }
            }
        }
        true
    }
}

fn by_cluster(nodes: &[StorageNode]) -> BTreeMap<ClusterId, Vec<StorageNode>> {
    let mut clusters: BTreeMap<ClusterId, Vec<StorageNode>> = BTreeMap::new();
    for node in nodes {
        clusters
            .entry(node.cluster_id.clone())
            .or_default()
            .push(node.clone());
    }
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeoutConfig;
    use crate::controller::ClusterControllerClient;
    use crate::types::{
        ApplicationReference, HostName, ServiceCluster, ServiceInstance, ServiceStatus,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(Vec<ControllerEndpoint>, u16, ClusterControllerNodeState, bool)>>,
        refuse_index: Option<u16>,
    }

    struct RecordingClient {
        recorder: Arc<Recorder>,
        endpoints: Vec<ControllerEndpoint>,
    }

    #[async_trait]
    impl ClusterControllerClient for RecordingClient {
        async fn try_set_node_state(
            &self,
            ctx: &OperationContext,
            _host: &HostName,
            index: u16,
            state: ClusterControllerNodeState,
            _service_type: &ServiceType,
            _force: bool,
        ) -> Result<bool> {
            self.recorder
                .calls
                .lock()
                .push((self.endpoints.clone(), index, state, ctx.is_probe()));
            Ok(self.recorder.refuse_index != Some(index))
        }
    }

    impl ClusterControllerClientFactory for Arc<Recorder> {
        fn create_client(
            &self,
            endpoints: Vec<ControllerEndpoint>,
            _cluster_id: &ClusterId,
        ) -> Arc<dyn ClusterControllerClient> {
            Arc::new(RecordingClient {
                recorder: Arc::clone(self),
                endpoints,
            })
        }
    }

    fn instance() -> ApplicationInstance {
        ApplicationInstance::new(ApplicationReference::new("t", "app1", "prod", "r", "default"))
            .with_cluster(
                ServiceCluster::new("cc", ServiceType::CLUSTER_CONTROLLER)
                    .with_instance(ServiceInstance::new("admin/cluster-controllers/1", "cc1", ServiceStatus::Up))
                    .with_instance(ServiceInstance::new("admin/cluster-controllers/0", "cc0", ServiceStatus::Up)),
            )
            .with_cluster(
                ServiceCluster::new("content", ServiceType::STORAGE_NODE)
                    .with_instance(ServiceInstance::new("content/storage/0", "h1", ServiceStatus::Up))
                    .with_instance(ServiceInstance::new("content/storage/1", "h2", ServiceStatus::Up)),
            )
    }

    fn driver(recorder: &Arc<Recorder>) -> ClusterStateDriver {
        ClusterStateDriver::new(Arc::new(Arc::clone(recorder)), 19050)
    }

    #[test]
    fn test_endpoints_ordered_by_index() {
        let endpoints = driver(&Arc::new(Recorder::default())).endpoints_for(&instance());
        assert_eq!(
            endpoints,
            vec![ControllerEndpoint::new("cc0", 19050), ControllerEndpoint::new("cc1", 19050)]
        );
    }

    #[tokio::test]
    async fn test_refusal_becomes_denial() {
        let recorder = Arc::new(Recorder {
            refuse_index: Some(1),
            ..Default::default()
        });
        let instance = instance();
        let group = NodeGroup::new(instance.reference.clone(), vec!["h1".into(), "h2".into()]).unwrap();
        let nodes = instance.storage_nodes_on(group.hosts()).unwrap();
        let ctx = OperationContext::root(&TimeoutConfig::default());

        let err = driver(&recorder)
            .set_node_states(&ctx, &instance, &group, &nodes, ClusterControllerNodeState::Maintenance, false)
            .await
            .unwrap_err();

        let reason = err.denial_reason().unwrap();
        assert_eq!(reason.constraint, Constraint::ClusterControllerRefused);
        assert_eq!(recorder.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_is_quiescent_probes() {
        let recorder = Arc::new(Recorder::default());
        let ctx = OperationContext::root(&TimeoutConfig::default());

        assert!(driver(&recorder).is_quiescent(&ctx, &instance()).await);
        let calls = recorder.calls.lock();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|(_, _, state, probe)| {
            *state == ClusterControllerNodeState::Maintenance && *probe
        }));
    }

    #[tokio::test]
    async fn test_not_quiescent_when_refused() {
        let recorder = Arc::new(Recorder {
            refuse_index: Some(0),
            ..Default::default()
        });
        let ctx = OperationContext::root(&TimeoutConfig::default());
        assert!(!driver(&recorder).is_quiescent(&ctx, &instance()).await);
    }
}
