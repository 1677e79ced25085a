use super::cluster::ClusterView;
use crate::error::Result;
use crate::types::{
    ApplicationInstance, ApplicationReference, HostInfo, HostName, NodeGroup, StorageNode,
};
use std::collections::BTreeMap;

/// What the policy needs to know about one application and a node group of it.
pub struct ApplicationApi<'a> {
    instance: &'a ApplicationInstance,
    group: &'a NodeGroup,
    host_infos: BTreeMap<HostName, HostInfo>,
}

impl<'a> ApplicationApi<'a> {
    pub fn new(
        instance: &'a ApplicationInstance,
        group: &'a NodeGroup,
        host_infos: BTreeMap<HostName, HostInfo>,
    ) -> Self {
        Self {
            instance,
            group,
            host_infos,
        }
    }

    pub fn application(&self) -> &ApplicationReference {
        &self.instance.reference
    }

    pub fn node_group(&self) -> &NodeGroup {
        self.group
    }

    pub fn host_info(&self, host: &HostName) -> HostInfo {
        self.host_infos.get(host).copied().unwrap_or_default()
    }

    /// Whether every host of the group is already suspended.
    pub fn group_already_suspended(&self) -> bool {
        self.group
            .hosts()
            .iter()
            .all(|host| self.host_info(host).is_suspended())
    }

    /// Clusters with a service on the group, ordered by cluster id then type.
    pub fn clusters_in_group(&self) -> Vec<ClusterView<'_>> {
        let mut clusters: Vec<_> = self
            .instance
            .service_clusters
            .iter()
            .filter(|c| self.group.hosts().iter().any(|h| c.has_instance_on(h)))
            .collect();
        clusters.sort_by(|a, b| {
            (&a.cluster_id, &a.service_type).cmp(&(&b.cluster_id, &b.service_type))
        });
        clusters
            .into_iter()
            .map(|c| ClusterView::new(c, self.group, &self.host_infos))
            .collect()
    }

    /// Storage nodes on the hosts of the group.
    pub fn storage_nodes_in_group(&self) -> Result<Vec<StorageNode>> {
        self.instance.storage_nodes_on(self.group.hosts())
    }

    /// Suspended hosts of the application, including hosts outside the group.
    pub fn suspended_hosts(&self) -> Vec<HostName> {
        self.host_infos
            .iter()
            .filter(|(_, info)| info.is_suspended())
            .map(|(host, _)| host.clone())
            .collect()
    }
}
