//! Topology snapshot: applications, their service clusters and live status.
//!
//! The orchestrator only reads the topology. [`InMemoryTopology`] is the
//! snapshot used by the server, loaded from a JSON file of application
//! instances and reloaded periodically by whoever owns that file.

use crate::error::{OrchestratorError, Result};
use crate::types::{
    ApplicationInstance, ApplicationReference, HostName, ServiceCluster, ServiceStatus,
    ServiceType,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};

/// Read-only view of all applications and the status of their services.
pub trait TopologySnapshot: Send + Sync {
    /// The application owning `host`, if any.
    fn application_of(&self, host: &HostName) -> Option<ApplicationReference>;

    fn application_instance(&self, application: &ApplicationReference)
        -> Option<ApplicationInstance>;

    fn service_clusters_of(&self, application: &ApplicationReference) -> Vec<ServiceCluster> {
        self.application_instance(application)
            .map(|instance| instance.service_clusters)
            .unwrap_or_default()
    }

    fn applications(&self) -> Vec<ApplicationReference>;
}

#[derive(Default)]
struct TopologyData {
    applications: BTreeMap<ApplicationReference, ApplicationInstance>,
    hosts: HashMap<HostName, ApplicationReference>,
}

impl TopologyData {
    fn build(instances: Vec<ApplicationInstance>) -> Result<Self> {
        let mut data = TopologyData::default();
        for instance in instances {
            data.insert(instance)?;
        }
        Ok(data)
    }

    fn insert(&mut self, instance: ApplicationInstance) -> Result<()> {
        let reference = instance.reference.clone();
        for host in instance.hosts() {
            if let Some(owner) = self.hosts.get(&host) {
                if *owner != reference {
                    return Err(OrchestratorError::InvalidInput(format!(
                        "Host {} belongs to both {} and {}",
                        host, owner, reference
                    )));
                }
            }
        }

        self.remove(&reference);
        for host in instance.hosts() {
            self.hosts.insert(host, reference.clone());
        }
        self.applications.insert(reference, instance);
        Ok(())
    }

    fn remove(&mut self, reference: &ApplicationReference) {
        if self.applications.remove(reference).is_some() {
            self.hosts.retain(|_, owner| owner != reference);
        }
    }
}

/// In-memory topology snapshot.
#[derive(Default)]
pub struct InMemoryTopology {
    data: RwLock<TopologyData>,
}

impl InMemoryTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot. A host may only belong to one application.
    pub fn from_applications(instances: Vec<ApplicationInstance>) -> Result<Self> {
        Ok(Self {
            data: RwLock::new(TopologyData::build(instances)?),
        })
    }

    /// Load a JSON array of application instances.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_applications(read_instances(path)?)
    }

    /// Replace the snapshot with the contents of `path`.
    ///
    /// The current snapshot is kept when the file cannot be read or is
    /// inconsistent.
    pub fn reload(&self, path: &Path) -> Result<usize> {
        let data = TopologyData::build(read_instances(path)?)?;
        let count = data.applications.len();
        *self.data.write() = data;
        debug!(path = %path.display(), applications = count, "Reloaded topology");
        Ok(count)
    }

    /// Add or replace one application instance.
    pub fn upsert_application(&self, instance: ApplicationInstance) -> Result<()> {
        info!(application = %instance.reference, "Updating application topology");
        self.data.write().insert(instance)
    }

    /// Update the monitored status of every `service_type` instance on `host`.
    /// Returns the number of instances updated.
    pub fn set_service_status(
        &self,
        host: &HostName,
        service_type: &ServiceType,
        status: ServiceStatus,
    ) -> usize {
        let mut data = self.data.write();
        let Some(reference) = data.hosts.get(host).cloned() else {
            return 0;
        };
        let Some(instance) = data.applications.get_mut(&reference) else {
            return 0;
        };

        let mut updated = 0;
        for cluster in instance
            .service_clusters
            .iter_mut()
            .filter(|c| &c.service_type == service_type)
        {
            for service in cluster.instances.iter_mut().filter(|i| &i.host == host) {
                service.status = status;
                updated += 1;
            }
        }
        updated
    }

    /// Drop every service instance on `host`. The clusters keep their
    /// expected size, so the services count as missing.
    pub fn remove_host(&self, host: &HostName) -> bool {
        let mut data = self.data.write();
        let Some(reference) = data.hosts.remove(host) else {
            return false;
        };
        if let Some(instance) = data.applications.get_mut(&reference) {
            for cluster in &mut instance.service_clusters {
                let before = cluster.instances.len();
                cluster.instances.retain(|i| &i.host != host);
                if cluster.instances.len() != before && cluster.expected_size.is_none() {
                    cluster.expected_size = Some(before);
                }
            }
        }
        true
    }
}

impl TopologySnapshot for InMemoryTopology {
    fn application_of(&self, host: &HostName) -> Option<ApplicationReference> {
        self.data.read().hosts.get(host).cloned()
    }

    fn application_instance(
        &self,
        application: &ApplicationReference,
    ) -> Option<ApplicationInstance> {
        self.data.read().applications.get(application).cloned()
    }

    fn applications(&self) -> Vec<ApplicationReference> {
        self.data.read().applications.keys().cloned().collect()
    }
}

fn read_instances(path: &Path) -> Result<Vec<ApplicationInstance>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        OrchestratorError::Config(format!(
            "Failed to read topology file {}: {}",
            path.display(),
            e
        ))
    })?;
    Ok(serde_json::from_str(&content)?)
}
