//! Core type definitions for the orchestrator.
//!
//! This module contains the identifiers and status values shared by every
//! layer: the topology model that the service monitor publishes, the unit of a
//! suspension decision ([`NodeGroup`]), and the statuses persisted by the
//! status store.
//!
//! # Key Types
//!
//! - [`ApplicationReference`]: identifies an application instance; the lock and status key
//! - [`ApplicationInstance`] / [`ServiceCluster`] / [`ServiceInstance`]: topology model
//! - [`NodeGroup`]: hosts of one application that are suspended or resumed together
//! - [`HostInfo`]: persisted per-host status with its suspension timestamp
//!
//! # Examples
//!
//! ```rust
//! use orchestrator::types::{ApplicationReference, HostName, NodeGroup};
//!
//! let app: ApplicationReference = "tenant:music:prod:eu-west:default".parse().unwrap();
//! assert_eq!(app.application, "music");
//!
//! let group = NodeGroup::new(app, vec![HostName::from("h1"), HostName::from("h1")]).unwrap();
//! assert_eq!(group.hosts().len(), 1);
//! ```

use crate::error::{OrchestratorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Name of a physical or virtual host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostName(String);

impl HostName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for HostName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for HostName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for HostName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one application instance in one zone.
///
/// Renders and parses as `tenant:application:environment:region:instance`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ApplicationReference {
    pub tenant: String,
    pub application: String,
    pub environment: String,
    pub region: String,
    pub instance: String,
}

impl ApplicationReference {
    pub fn new(
        tenant: impl Into<String>,
        application: impl Into<String>,
        environment: impl Into<String>,
        region: impl Into<String>,
        instance: impl Into<String>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            application: application.into(),
            environment: environment.into(),
            region: region.into(),
            instance: instance.into(),
        }
    }
}

impl fmt::Display for ApplicationReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.tenant, self.application, self.environment, self.region, self.instance
        )
    }
}

impl FromStr for ApplicationReference {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 5 || parts.iter().any(|p| p.is_empty()) {
            return Err(OrchestratorError::InvalidInput(format!(
                "Application reference must be tenant:application:environment:region:instance, got '{}'",
                s
            )));
        }
        Ok(Self::new(parts[0], parts[1], parts[2], parts[3], parts[4]))
    }
}

impl TryFrom<String> for ApplicationReference {
    type Error = OrchestratorError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ApplicationReference> for String {
    fn from(value: ApplicationReference) -> Self {
        value.to_string()
    }
}

/// Identifier of a service cluster within an application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(String);

impl ClusterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClusterId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Type of the services in a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceType(String);

impl ServiceType {
    pub const STORAGE_NODE: &'static str = "storagenode";
    pub const SEARCH_NODE: &'static str = "searchnode";
    pub const DISTRIBUTOR: &'static str = "distributor";
    pub const CLUSTER_CONTROLLER: &'static str = "container-clustercontroller";
    pub const CONTAINER: &'static str = "container";
    pub const SLOBROK: &'static str = "slobrok";
    pub const METRICS_PROXY: &'static str = "metricsproxy-container";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn storage_node() -> Self {
        Self::new(Self::STORAGE_NODE)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether services of this type hold content and are governed by a redundancy setting.
    pub fn is_content(&self) -> bool {
        matches!(
            self.0.as_str(),
            Self::STORAGE_NODE | Self::SEARCH_NODE | Self::DISTRIBUTOR
        )
    }

    pub fn is_storage_node(&self) -> bool {
        self.0 == Self::STORAGE_NODE
    }

    pub fn is_cluster_controller(&self) -> bool {
        self.0 == Self::CLUSTER_CONTROLLER
    }
}

impl From<&str> for ServiceType {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Live health of a service instance, as reported by the service monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    Up,
    Down,
    /// Not (yet) checked by the monitor. Not counted as down.
    #[default]
    Unknown,
}

/// One service running on one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub config_id: String,
    pub host: HostName,
    #[serde(default)]
    pub status: ServiceStatus,
}

impl ServiceInstance {
    pub fn new(config_id: impl Into<String>, host: impl Into<HostName>, status: ServiceStatus) -> Self {
        Self {
            config_id: config_id.into(),
            host: host.into(),
            status,
        }
    }

    /// Index of the node within its cluster: the last component of the config id.
    pub fn node_index(&self) -> Option<u16> {
        self.config_id.rsplit('/').next()?.parse().ok()
    }

    pub fn is_down(&self) -> bool {
        self.status == ServiceStatus::Down
    }
}

/// All services of one type in one cluster of an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCluster {
    pub cluster_id: ClusterId,
    pub service_type: ServiceType,
    pub instances: Vec<ServiceInstance>,
    /// Number of copies kept of each document, for content clusters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redundancy: Option<usize>,
    /// Number of services the cluster is supposed to have.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_size: Option<usize>,
}

impl ServiceCluster {
    pub fn new(cluster_id: impl Into<ClusterId>, service_type: impl Into<ServiceType>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            service_type: service_type.into(),
            instances: Vec::new(),
            redundancy: None,
            expected_size: None,
        }
    }

    pub fn with_instance(mut self, instance: ServiceInstance) -> Self {
        self.instances.push(instance);
        self
    }

    pub fn with_redundancy(mut self, redundancy: usize) -> Self {
        self.redundancy = Some(redundancy);
        self
    }

    pub fn with_expected_size(mut self, size: usize) -> Self {
        self.expected_size = Some(size);
        self
    }

    /// Size of the cluster, including services missing from the live topology.
    pub fn size(&self) -> usize {
        self.expected_size
            .unwrap_or(0)
            .max(self.instances.len())
    }

    /// Services the cluster should have but which the monitor does not report.
    pub fn missing_services(&self) -> usize {
        self.size() - self.instances.len()
    }

    pub fn has_instance_on(&self, host: &HostName) -> bool {
        self.instances.iter().any(|i| &i.host == host)
    }
}

impl From<String> for ClusterId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<String> for ServiceType {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// An application instance and all of its service clusters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationInstance {
    pub reference: ApplicationReference,
    pub service_clusters: Vec<ServiceCluster>,
}

impl ApplicationInstance {
    pub fn new(reference: ApplicationReference) -> Self {
        Self {
            reference,
            service_clusters: Vec::new(),
        }
    }

    pub fn with_cluster(mut self, cluster: ServiceCluster) -> Self {
        self.service_clusters.push(cluster);
        self
    }

    /// All hosts with at least one service of this application.
    pub fn hosts(&self) -> BTreeSet<HostName> {
        self.service_clusters
            .iter()
            .flat_map(|c| c.instances.iter().map(|i| i.host.clone()))
            .collect()
    }

    /// Cluster controller instances, lowest index first.
    pub fn cluster_controllers(&self) -> Vec<&ServiceInstance> {
        let mut controllers: Vec<&ServiceInstance> = self
            .service_clusters
            .iter()
            .filter(|c| c.service_type.is_cluster_controller())
            .flat_map(|c| c.instances.iter())
            .collect();
        controllers.sort_by_key(|i| (i.node_index().unwrap_or(u16::MAX), i.host.clone()));
        controllers
    }

    /// Clusters of storage nodes, in cluster id order.
    pub fn storage_clusters(&self) -> Vec<&ServiceCluster> {
        let mut clusters: Vec<&ServiceCluster> = self
            .service_clusters
            .iter()
            .filter(|c| c.service_type.is_storage_node())
            .collect();
        clusters.sort_by(|a, b| a.cluster_id.cmp(&b.cluster_id));
        clusters
    }

    /// Storage nodes on any of `hosts`, ordered by cluster and index.
    ///
    /// Fails if a storage instance on one of the hosts has a config id
    /// without a node index, since that node cannot be addressed.
    pub fn storage_nodes_on(&self, hosts: &[HostName]) -> Result<Vec<StorageNode>> {
        let mut nodes = Vec::new();
        for cluster in self.storage_clusters() {
            for instance in cluster.instances.iter().filter(|i| hosts.contains(&i.host)) {
                let index = instance.node_index().ok_or_else(|| {
                    OrchestratorError::InvalidInput(format!(
                        "Storage node {} on {} in cluster {} has no node index",
                        instance.config_id, instance.host, cluster.cluster_id
                    ))
                })?;
                nodes.push(StorageNode {
                    cluster_id: cluster.cluster_id.clone(),
                    host: instance.host.clone(),
                    index,
                });
            }
        }
        nodes.sort();
        Ok(nodes)
    }

    /// Every storage node of the application, ordered by cluster and index.
    pub fn storage_nodes(&self) -> Result<Vec<StorageNode>> {
        let hosts: Vec<HostName> = self.hosts().into_iter().collect();
        self.storage_nodes_on(&hosts)
    }
}

/// A storage node as addressed through the cluster controller.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageNode {
    pub cluster_id: ClusterId,
    pub index: u16,
    pub host: HostName,
}

impl fmt::Display for StorageNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/storage/{} on {}", self.cluster_id, self.index, self.host)
    }
}

/// Hosts of one application that are suspended or resumed as one decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGroup {
    application: ApplicationReference,
    hosts: Vec<HostName>,
}

impl NodeGroup {
    /// Create a node group. Duplicate hosts are dropped, keeping first-seen order.
    pub fn new(application: ApplicationReference, hosts: Vec<HostName>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        let hosts: Vec<HostName> = hosts
            .into_iter()
            .filter(|h| seen.insert(h.clone()))
            .collect();

        if hosts.is_empty() {
            return Err(OrchestratorError::InvalidInput(format!(
                "Node group for {} must contain at least one host",
                application
            )));
        }

        Ok(Self { application, hosts })
    }

    pub fn single(application: ApplicationReference, host: HostName) -> Self {
        Self {
            application,
            hosts: vec![host],
        }
    }

    pub fn application(&self) -> &ApplicationReference {
        &self.application
    }

    pub fn hosts(&self) -> &[HostName] {
        &self.hosts
    }

    pub fn contains(&self, host: &HostName) -> bool {
        self.hosts.contains(host)
    }

    pub(crate) fn push(&mut self, host: HostName) {
        if !self.hosts.contains(&host) {
            self.hosts.push(host);
        }
    }
}

impl fmt::Display for NodeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hosts: Vec<&str> = self.hosts.iter().map(HostName::as_str).collect();
        write!(f, "{}:[{}]", self.application, hosts.join(", "))
    }
}

/// Persisted status of an application instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    #[default]
    NoRemarks,
    AllowedToBeDown,
}

/// Persisted status of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostStatus {
    #[default]
    NoRemarks,
    AllowedToBeDown,
}

impl HostStatus {
    pub fn is_suspended(&self) -> bool {
        matches!(self, HostStatus::AllowedToBeDown)
    }
}

/// Host status plus the time it was first suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HostInfo {
    pub status: HostStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspended_since: Option<DateTime<Utc>>,
}

impl HostInfo {
    pub fn no_remarks() -> Self {
        Self::default()
    }

    pub fn allowed_to_be_down(since: DateTime<Utc>) -> Self {
        Self {
            status: HostStatus::AllowedToBeDown,
            suspended_since: Some(since),
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.status.is_suspended()
    }
}

/// State requested from a cluster controller for a storage node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterControllerNodeState {
    Maintenance,
    Up,
    Down,
}

impl ClusterControllerNodeState {
    pub fn wire_name(&self) -> &'static str {
        match self {
            ClusterControllerNodeState::Maintenance => "maintenance",
            ClusterControllerNodeState::Up => "up",
            ClusterControllerNodeState::Down => "down",
        }
    }
}

impl fmt::Display for ClusterControllerNodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> ApplicationReference {
        ApplicationReference::new("tenant", "music", "prod", "eu-west", "default")
    }

    #[test]
    fn test_application_reference_round_trip() {
        let text = "tenant:music:prod:eu-west:default";
        let parsed: ApplicationReference = text.parse().unwrap();
        assert_eq!(parsed, app());
        assert_eq!(parsed.to_string(), text);
    }

    #[test]
    fn test_application_reference_rejects_malformed() {
        assert!("tenant:music".parse::<ApplicationReference>().is_err());
        assert!("a:b::d:e".parse::<ApplicationReference>().is_err());
    }

    #[test]
    fn test_application_reference_as_json_key() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(app(), 1);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"tenant:music:prod:eu-west:default":1}"#);
    }

    #[test]
    fn test_node_index_from_config_id() {
        let storage = ServiceInstance::new("music/storage/3", "h1", ServiceStatus::Up);
        assert_eq!(storage.node_index(), Some(3));

        let container = ServiceInstance::new("music/container.default", "h1", ServiceStatus::Up);
        assert_eq!(container.node_index(), None);
    }

    #[test]
    fn test_node_group_dedupes_and_keeps_order() {
        let group = NodeGroup::new(
            app(),
            vec!["b".into(), "a".into(), "b".into()],
        )
        .unwrap();
        assert_eq!(group.hosts(), &[HostName::from("b"), HostName::from("a")]);
        assert_eq!(group.to_string(), "tenant:music:prod:eu-west:default:[b, a]");
    }

    #[test]
    fn test_empty_node_group_rejected() {
        let err = NodeGroup::new(app(), vec![]).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidInput(_)));
    }

    #[test]
    fn test_cluster_size_counts_missing() {
        let cluster = ServiceCluster::new("music", ServiceType::STORAGE_NODE)
            .with_instance(ServiceInstance::new("music/storage/0", "h1", ServiceStatus::Up))
            .with_expected_size(3);
        assert_eq!(cluster.size(), 3);
        assert_eq!(cluster.missing_services(), 2);
    }

    #[test]
    fn test_cluster_controllers_ordered_by_index() {
        let instance = ApplicationInstance::new(app()).with_cluster(
            ServiceCluster::new("cc", ServiceType::CLUSTER_CONTROLLER)
                .with_instance(ServiceInstance::new("admin/cluster-controllers/2", "cc2", ServiceStatus::Up))
                .with_instance(ServiceInstance::new("admin/cluster-controllers/0", "cc0", ServiceStatus::Up))
                .with_instance(ServiceInstance::new("admin/cluster-controllers/1", "cc1", ServiceStatus::Up)),
        );
        let hosts: Vec<&str> = instance
            .cluster_controllers()
            .iter()
            .map(|i| i.host.as_str())
            .collect();
        assert_eq!(hosts, vec!["cc0", "cc1", "cc2"]);
    }

    #[test]
    fn test_storage_nodes_on_hosts() {
        let instance = ApplicationInstance::new(app())
            .with_cluster(
                ServiceCluster::new("music", ServiceType::STORAGE_NODE)
                    .with_instance(ServiceInstance::new("music/storage/1", "h2", ServiceStatus::Up))
                    .with_instance(ServiceInstance::new("music/storage/0", "h1", ServiceStatus::Up)),
            )
            .with_cluster(
                ServiceCluster::new("music", ServiceType::CONTAINER)
                    .with_instance(ServiceInstance::new("music/container.0", "h1", ServiceStatus::Up)),
            );

        let nodes = instance.storage_nodes_on(&[HostName::from("h1")]).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].index, 0);

        let all: Vec<u16> = instance
            .storage_nodes()
            .unwrap()
            .iter()
            .map(|n| n.index)
            .collect();
        assert_eq!(all, vec![0, 1]);
    }

    #[test]
    fn test_storage_node_without_index_is_rejected() {
        let instance = ApplicationInstance::new(app()).with_cluster(
            ServiceCluster::new("music", ServiceType::STORAGE_NODE)
                .with_instance(ServiceInstance::new("music/storage/0", "h1", ServiceStatus::Up))
                .with_instance(ServiceInstance::new("music/storage/x", "h2", ServiceStatus::Up)),
        );

        assert_eq!(instance.storage_nodes_on(&[HostName::from("h1")]).unwrap().len(), 1);

        let err = instance.storage_nodes_on(&[HostName::from("h2")]).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidInput(_)));
        assert!(err.to_string().contains("music/storage/x"));
        assert!(instance.storage_nodes().is_err());
    }
}
