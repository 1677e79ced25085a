//! Common test utilities for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use orchestrator::config::TimeoutConfig;
use orchestrator::context::OperationContext;
use orchestrator::controller::{
    ClusterControllerClient, ClusterControllerClientFactory, ControllerEndpoint,
};
use orchestrator::driver::ClusterStateDriver;
use orchestrator::engine::Orchestrator;
use orchestrator::error::{OrchestratorError, Result};
use orchestrator::policy::HostedPolicy;
use orchestrator::status::InMemoryStatusService;
use orchestrator::topology::InMemoryTopology;
use orchestrator::types::{
    ApplicationInstance, ApplicationReference, ClusterControllerNodeState, ClusterId, HostName,
    ServiceCluster, ServiceInstance, ServiceStatus, ServiceType,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Reference of a test application.
pub fn app(name: &str) -> ApplicationReference {
    ApplicationReference::new("tenant", name, "prod", "us-east", "default")
}

pub fn host(name: &str) -> HostName {
    HostName::from(name)
}

/// Builds application instances with a content cluster and a cluster controller.
pub struct AppBuilder {
    name: String,
    storage_hosts: Vec<(String, ServiceStatus)>,
    redundancy: usize,
    expected_size: Option<usize>,
    extra: Vec<ServiceCluster>,
}

impl AppBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            storage_hosts: Vec::new(),
            redundancy: 1,
            expected_size: None,
            extra: Vec::new(),
        }
    }

    /// Add storage hosts that are up.
    pub fn storage(mut self, hosts: &[&str]) -> Self {
        self.storage_hosts
            .extend(hosts.iter().map(|h| (h.to_string(), ServiceStatus::Up)));
        self
    }

    pub fn storage_down(mut self, host: &str) -> Self {
        self.storage_hosts.push((host.to_string(), ServiceStatus::Down));
        self
    }

    pub fn redundancy(mut self, redundancy: usize) -> Self {
        self.redundancy = redundancy;
        self
    }

    pub fn expected_size(mut self, size: usize) -> Self {
        self.expected_size = Some(size);
        self
    }

    pub fn cluster(mut self, cluster: ServiceCluster) -> Self {
        self.extra.push(cluster);
        self
    }

    pub fn build(self) -> ApplicationInstance {
        let mut content = ServiceCluster::new(format!("{}-content", self.name), ServiceType::STORAGE_NODE)
            .with_redundancy(self.redundancy);
        for (index, (host, status)) in self.storage_hosts.iter().enumerate() {
            content = content.with_instance(ServiceInstance::new(
                format!("{}/storage/{}", self.name, index),
                host.as_str(),
                *status,
            ));
        }
        if let Some(size) = self.expected_size {
            content = content.with_expected_size(size);
        }

        let controllers = ServiceCluster::new(format!("{}-admin", self.name), ServiceType::CLUSTER_CONTROLLER)
            .with_instance(ServiceInstance::new(
                "admin/cluster-controllers/0",
                format!("{}-cc0", self.name).as_str(),
                ServiceStatus::Up,
            ));

        let mut instance = ApplicationInstance::new(app(&self.name))
            .with_cluster(content)
            .with_cluster(controllers);
        for cluster in self.extra {
            instance = instance.with_cluster(cluster);
        }
        instance
    }
}

/// A node state request seen by the fake cluster controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStateCall {
    pub cluster_id: ClusterId,
    pub host: HostName,
    pub index: u16,
    pub state: ClusterControllerNodeState,
    pub force: bool,
    pub probe: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    /// Answer "not modified".
    Refuse,
    /// Fail on every endpoint.
    Fail,
}

#[derive(Debug, Clone)]
struct Rule {
    host: HostName,
    state: Option<ClusterControllerNodeState>,
    commit_only: bool,
    reaction: Reaction,
}

#[derive(Default)]
struct ControllerState {
    calls: Mutex<Vec<NodeStateCall>>,
    rules: Mutex<Vec<Rule>>,
}

/// Recording cluster controller. Accepts everything unless told otherwise.
#[derive(Clone, Default)]
pub struct FakeClusterController {
    state: Arc<ControllerState>,
}

impl FakeClusterController {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_rule(&self, host: &str, state: Option<ClusterControllerNodeState>, commit_only: bool, reaction: Reaction) {
        self.state.rules.lock().push(Rule {
            host: HostName::from(host),
            state,
            commit_only,
            reaction,
        });
    }

    /// Refuse every request for `host`.
    pub fn refuse(&self, host: &str) {
        self.add_rule(host, None, false, Reaction::Refuse);
    }

    /// Fail every request for `host`.
    pub fn fail(&self, host: &str) {
        self.add_rule(host, None, false, Reaction::Fail);
    }

    /// Fail non-probe requests for `host`; probes succeed.
    pub fn fail_commit(&self, host: &str) {
        self.add_rule(host, None, true, Reaction::Fail);
    }

    /// Fail requests for `host` that set `state`.
    pub fn fail_state(&self, host: &str, state: ClusterControllerNodeState) {
        self.add_rule(host, Some(state), false, Reaction::Fail);
    }

    pub fn clear_rules(&self) {
        self.state.rules.lock().clear();
    }

    pub fn calls(&self) -> Vec<NodeStateCall> {
        self.state.calls.lock().clone()
    }

    /// Calls that were not probes.
    pub fn committed_calls(&self) -> Vec<NodeStateCall> {
        self.calls().into_iter().filter(|c| !c.probe).collect()
    }

    pub fn reset_calls(&self) {
        self.state.calls.lock().clear();
    }
}

impl ClusterControllerClientFactory for FakeClusterController {
    fn create_client(
        &self,
        _endpoints: Vec<ControllerEndpoint>,
        cluster_id: &ClusterId,
    ) -> Arc<dyn ClusterControllerClient> {
        Arc::new(FakeClient {
            cluster_id: cluster_id.clone(),
            state: Arc::clone(&self.state),
        })
    }
}

struct FakeClient {
    cluster_id: ClusterId,
    state: Arc<ControllerState>,
}

#[async_trait]
impl ClusterControllerClient for FakeClient {
    async fn try_set_node_state(
        &self,
        ctx: &OperationContext,
        host: &HostName,
        index: u16,
        state: ClusterControllerNodeState,
        _service_type: &ServiceType,
        force: bool,
    ) -> Result<bool> {
        self.state.calls.lock().push(NodeStateCall {
            cluster_id: self.cluster_id.clone(),
            host: host.clone(),
            index,
            state,
            force,
            probe: ctx.is_probe(),
        });

        let reaction = self
            .state
            .rules
            .lock()
            .iter()
            .find(|rule| {
                rule.host == *host
                    && rule.state.map_or(true, |s| s == state)
                    && !(rule.commit_only && ctx.is_probe())
            })
            .map(|rule| rule.reaction);

        match reaction {
            None => Ok(true),
            Some(Reaction::Refuse) => Ok(false),
            Some(Reaction::Fail) => Err(OrchestratorError::ClusterControllerUnavailable {
                cluster_id: self.cluster_id.clone(),
                host: host.clone(),
                attempts: vec![format!("{}-cc0:19050: connection refused", self.cluster_id)],
            }),
        }
    }
}

/// Real engine, policy, driver, status store and topology over a fake controller.
pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub topology: Arc<InMemoryTopology>,
    pub status: Arc<InMemoryStatusService>,
    pub controller: FakeClusterController,
}

impl Harness {
    pub fn new(instances: Vec<ApplicationInstance>) -> Self {
        Self::with_timeouts(instances, TimeoutConfig::default())
    }

    pub fn with_timeouts(instances: Vec<ApplicationInstance>, timeouts: TimeoutConfig) -> Self {
        Self::with_status(instances, timeouts, InMemoryStatusService::new())
    }

    pub fn with_status(
        instances: Vec<ApplicationInstance>,
        timeouts: TimeoutConfig,
        status: InMemoryStatusService,
    ) -> Self {
        let topology = Arc::new(
            InMemoryTopology::from_applications(instances).expect("consistent topology"),
        );
        let status = Arc::new(status);
        let controller = FakeClusterController::new();
        let driver = ClusterStateDriver::new(Arc::new(controller.clone()), 19050);
        let orchestrator = Arc::new(Orchestrator::new(
            topology.clone(),
            status.clone(),
            Arc::new(HostedPolicy::new()),
            driver,
            timeouts,
        ));

        Self {
            orchestrator,
            topology,
            status,
            controller,
        }
    }

    pub async fn is_suspended(&self, name: &str) -> bool {
        self.orchestrator
            .get_node_status(&host(name))
            .await
            .expect("known host")
            .is_suspended()
    }
}
