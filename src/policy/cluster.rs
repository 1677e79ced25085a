//! Per-cluster evaluation of a node group going down.

use super::SuspensionReasons;
use crate::error::{Constraint, DenialReason};
use crate::types::{HostInfo, HostName, NodeGroup, ServiceCluster, ServiceInstance, ServiceType};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// How many services of a cluster must stay available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterRequirement {
    /// At least this many services up.
    MinimumUp(usize),
    /// At most this many services down.
    MaxDown(usize),
    /// At most this percentage down, unless nothing else in the cluster is down.
    MaxDownPercent(usize),
    Unrestricted,
}

impl ClusterRequirement {
    pub const DEFAULT_REDUNDANCY: usize = 1;
    pub const STATELESS_MAX_DOWN_PERCENT: usize = 10;

    /// Requirement for a cluster, derived from its service type.
    pub fn for_cluster(cluster: &ServiceCluster) -> Self {
        let service_type = &cluster.service_type;
        if service_type.is_content() {
            ClusterRequirement::MinimumUp(cluster.redundancy.unwrap_or(Self::DEFAULT_REDUNDANCY))
        } else if service_type.is_cluster_controller() {
            ClusterRequirement::MinimumUp(cluster.size() / 2 + 1)
        } else {
            match service_type.as_str() {
                ServiceType::METRICS_PROXY => ClusterRequirement::Unrestricted,
                ServiceType::SLOBROK => ClusterRequirement::MaxDown(1),
                _ => ClusterRequirement::MaxDownPercent(Self::STATELESS_MAX_DOWN_PERCENT),
            }
        }
    }
}

impl fmt::Display for ClusterRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterRequirement::MinimumUp(n) => write!(f, "at least {} up", n),
            ClusterRequirement::MaxDown(n) => write!(f, "at most {} down", n),
            ClusterRequirement::MaxDownPercent(p) => write!(f, "at most {}% down", p),
            ClusterRequirement::Unrestricted => f.write_str("no restriction"),
        }
    }
}

/// A service cluster as seen by a node group that wants to go down.
pub struct ClusterView<'a> {
    cluster: &'a ServiceCluster,
    group: &'a NodeGroup,
    host_infos: &'a BTreeMap<HostName, HostInfo>,
}

impl<'a> ClusterView<'a> {
    pub fn new(
        cluster: &'a ServiceCluster,
        group: &'a NodeGroup,
        host_infos: &'a BTreeMap<HostName, HostInfo>,
    ) -> Self {
        Self {
            cluster,
            group,
            host_infos,
        }
    }

    pub fn cluster(&self) -> &ServiceCluster {
        self.cluster
    }

    pub fn requirement(&self) -> ClusterRequirement {
        ClusterRequirement::for_cluster(self.cluster)
    }

    fn is_suspended(&self, host: &HostName) -> bool {
        self.host_infos
            .get(host)
            .map(HostInfo::is_suspended)
            .unwrap_or(false)
    }

    fn services_in_group(&self) -> usize {
        self.cluster
            .instances
            .iter()
            .filter(|i| self.group.contains(&i.host))
            .count()
    }

    /// Services outside the group that are neither suspended nor down.
    pub fn services_up_after(&self) -> usize {
        self.cluster
            .instances
            .iter()
            .filter(|i| !self.group.contains(&i.host))
            .filter(|i| !self.is_suspended(&i.host) && !i.is_down())
            .count()
    }

    /// Hosts outside the group that are already suspended.
    pub fn suspended_hosts(&self) -> Vec<HostName> {
        self.other_hosts(|view, instance| view.is_suspended(&instance.host))
    }

    /// Hosts outside the group with a service reported down.
    pub fn down_hosts(&self) -> Vec<HostName> {
        self.other_hosts(|view, instance| !view.is_suspended(&instance.host) && instance.is_down())
    }

    fn other_hosts<F>(&self, predicate: F) -> Vec<HostName>
    where
        F: Fn(&Self, &ServiceInstance) -> bool,
    {
        let hosts: BTreeSet<HostName> = self
            .cluster
            .instances
            .iter()
            .filter(|i| !self.group.contains(&i.host))
            .filter(|i| predicate(self, i))
            .map(|i| i.host.clone())
            .collect();
        hosts.into_iter().collect()
    }

    /// Check that the cluster stays within its requirement with the group down.
    pub fn verify_group_going_down(
        &self,
        reasons: &mut SuspensionReasons,
    ) -> std::result::Result<(), DenialReason> {
        let requirement = self.requirement();
        let size = self.cluster.size();
        let up_after = self.services_up_after();
        let down_after = size.saturating_sub(up_after);
        let others_down = down_after.saturating_sub(self.services_in_group());

        let allowed = match requirement {
            ClusterRequirement::Unrestricted => true,
            ClusterRequirement::MinimumUp(minimum) => up_after >= minimum,
            ClusterRequirement::MaxDown(maximum) => down_after <= maximum,
            ClusterRequirement::MaxDownPercent(percent) => {
                others_down == 0 || down_after * 100 <= size * percent
            }
        };

        if allowed {
            reasons.add(format!(
                "{} of {} services up in cluster {} ({}) after suspension, requires {}",
                up_after, size, self.cluster.cluster_id, self.cluster.service_type, requirement
            ));
            return Ok(());
        }

        Err(self.denial(requirement, size, up_after))
    }

    fn denial(&self, requirement: ClusterRequirement, size: usize, up_after: usize) -> DenialReason {
        let suspended_hosts = self.suspended_hosts();
        let down_hosts = self.down_hosts();
        let missing = self.cluster.missing_services();

        let mut contributors = Vec::new();
        if !suspended_hosts.is_empty() {
            contributors.push(format!("{} already suspended", host_list(&suspended_hosts)));
        }
        if !down_hosts.is_empty() {
            contributors.push(format!("{} down", host_list(&down_hosts)));
        }
        if missing > 0 {
            contributors.push(format!("{} services missing", missing));
        }

        let summary = format!(
            "cluster {} of type {} would have {} of {} services up, requires {}",
            self.cluster.cluster_id, self.cluster.service_type, up_after, size, requirement
        );
        let message = if contributors.is_empty() {
            summary
        } else {
            format!("{}; {}", contributors.join(", "), summary)
        };

        let mut reason = DenialReason::new(Constraint::EnoughServicesUp, message).for_cluster(
            self.cluster.cluster_id.clone(),
            self.cluster.service_type.clone(),
        );
        reason.suspended_hosts = suspended_hosts;
        reason.down_hosts = down_hosts;
        reason.missing_services = missing;
        reason
    }
}

fn host_list(hosts: &[HostName]) -> String {
    let names: Vec<&str> = hosts.iter().map(HostName::as_str).collect();
    format!("[{}]", names.join(", "))
}
