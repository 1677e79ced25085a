//! Orchestration engine.
//!
//! Every state change follows the same path: resolve the application through
//! the topology, take the application lock, consult the policy, push node
//! states to the cluster controllers, and only then persist the new status.
//! A failure at any step leaves the persisted status untouched.
//!
//! # Example
//!
//! ```rust,no_run
//! use orchestrator::engine::Orchestrator;
//! use orchestrator::types::HostName;
//!
//! async fn drain(orchestrator: &Orchestrator, host: &str) -> orchestrator::error::Result<()> {
//!     orchestrator.suspend(&HostName::from(host)).await
//! }
//! ```

mod batch;

use crate::config::TimeoutConfig;
use crate::context::OperationContext;
use crate::driver::ClusterStateDriver;
use crate::error::{OrchestratorError, Result};
use crate::observability::{self, SuspensionOutcome};
use crate::policy::{ApplicationApi, Policy};
use crate::status::StatusService;
use crate::topology::TopologySnapshot;
use crate::types::{
    ApplicationInstance, ApplicationReference, ApplicationStatus, ClusterControllerNodeState,
    HostInfo, HostName, HostStatus, NodeGroup,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// The orchestrator: suspends and resumes hosts and applications.
pub struct Orchestrator {
    topology: Arc<dyn TopologySnapshot>,
    status: Arc<dyn StatusService>,
    policy: Arc<dyn Policy>,
    driver: ClusterStateDriver,
    timeouts: TimeoutConfig,
}

impl Orchestrator {
    pub fn new(
        topology: Arc<dyn TopologySnapshot>,
        status: Arc<dyn StatusService>,
        policy: Arc<dyn Policy>,
        driver: ClusterStateDriver,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            topology,
            status,
            policy,
            driver,
            timeouts,
        }
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    fn application_of(&self, host: &HostName) -> Result<ApplicationReference> {
        self.topology
            .application_of(host)
            .ok_or_else(|| OrchestratorError::HostNotFound(host.clone()))
    }

    fn instance(&self, application: &ApplicationReference) -> Result<ApplicationInstance> {
        self.topology
            .application_instance(application)
            .ok_or_else(|| OrchestratorError::ApplicationNotFound(application.to_string()))
    }

    // Queries

    /// Persisted status of a host.
    pub async fn get_node_status(&self, host: &HostName) -> Result<HostInfo> {
        let application = self.application_of(host)?;
        let ctx = OperationContext::root(&self.timeouts);
        let lock = self.status.lock_application(&ctx, &application).await?;
        Ok(lock.host_info(host))
    }

    /// Persisted status of an application instance.
    pub async fn get_application_instance_status(
        &self,
        application: &ApplicationReference,
    ) -> Result<ApplicationStatus> {
        self.instance(application)?;
        let ctx = OperationContext::root(&self.timeouts);
        let lock = self.status.lock_application(&ctx, application).await?;
        Ok(lock.application_status())
    }

    /// Applications currently allowed to be down.
    pub fn get_all_suspended_applications(&self) -> BTreeSet<ApplicationReference> {
        self.status.suspended_applications()
    }

    /// Whether every storage node of the application would accept maintenance.
    pub async fn is_quiescent(&self, application: &ApplicationReference) -> Result<bool> {
        let instance = self.instance(application)?;
        let ctx = OperationContext::root(&self.timeouts);
        Ok(self.driver.is_quiescent(&ctx, &instance).await)
    }

    // Hosts

    /// Suspend a single host.
    pub async fn suspend(&self, host: &HostName) -> Result<()> {
        let group = NodeGroup::single(self.application_of(host)?, host.clone());
        let ctx = OperationContext::root(&self.timeouts);
        self.suspend_group(&ctx, &group).await
    }

    /// Suspend every host of `group` as one decision.
    pub async fn suspend_group(&self, ctx: &OperationContext, group: &NodeGroup) -> Result<()> {
        self.suspend_group_changed(ctx, group).await.map(|_| ())
    }

    /// Like [`Self::suspend_group`], returning whether anything changed.
    async fn suspend_group_changed(&self, ctx: &OperationContext, group: &NodeGroup) -> Result<bool> {
        let result = self.try_suspend_group(ctx, group).await;
        if !ctx.is_probe() {
            observability::record_suspension(SuspensionOutcome::of(&result));
        }
        result
    }

    async fn try_suspend_group(&self, ctx: &OperationContext, group: &NodeGroup) -> Result<bool> {
        let instance = self.instance(group.application())?;
        let mut lock = self.status.lock_application(ctx, group.application()).await?;
        let api = ApplicationApi::new(&instance, group, lock.host_infos());

        if api.group_already_suspended() {
            debug!(operation_id = %ctx.id(), node_group = %group, "Already suspended");
            return Ok(false);
        }

        let reasons = self.policy.grant_suspension_request(ctx, &api)?;

        let nodes = api.storage_nodes_in_group()?;
        self.driver
            .set_node_states(
                ctx,
                &instance,
                group,
                &nodes,
                ClusterControllerNodeState::Maintenance,
                false,
            )
            .await?;

        for host in group.hosts() {
            lock.set_host_status(host, HostStatus::AllowedToBeDown)?;
        }
        if lock.application_status() != ApplicationStatus::AllowedToBeDown {
            lock.set_application_status(ApplicationStatus::AllowedToBeDown)?;
        }

        if !ctx.is_probe() {
            info!(
                operation_id = %ctx.id(),
                node_group = %group,
                reasons = %reasons,
                "Suspended"
            );
        }
        Ok(true)
    }

    /// Resume a single host.
    pub async fn resume(&self, host: &HostName) -> Result<()> {
        let group = NodeGroup::single(self.application_of(host)?, host.clone());
        let ctx = OperationContext::root(&self.timeouts);
        self.resume_group(&ctx, &group).await
    }

    /// Bring every host of `group` back. No policy check is involved.
    pub async fn resume_group(&self, ctx: &OperationContext, group: &NodeGroup) -> Result<()> {
        let instance = self.instance(group.application())?;
        let mut lock = self.status.lock_application(ctx, group.application()).await?;

        let suspended: Vec<HostName> = group
            .hosts()
            .iter()
            .filter(|host| lock.host_info(host).is_suspended())
            .cloned()
            .collect();
        if suspended.is_empty() {
            debug!(operation_id = %ctx.id(), node_group = %group, "Not suspended");
            return Ok(());
        }

        let nodes = instance.storage_nodes_on(&suspended)?;
        self.driver
            .set_node_states(ctx, &instance, group, &nodes, ClusterControllerNodeState::Up, true)
            .await?;

        for host in &suspended {
            lock.set_host_status(host, HostStatus::NoRemarks)?;
        }
        let any_left = lock.host_infos().values().any(HostInfo::is_suspended);
        if !any_left && lock.application_status() != ApplicationStatus::NoRemarks {
            lock.set_application_status(ApplicationStatus::NoRemarks)?;
        }

        if !ctx.is_probe() {
            observability::record_resume();
            info!(operation_id = %ctx.id(), node_group = %group, "Resumed");
        }
        Ok(())
    }

    /// Check that `host` may be removed for good and set its storage nodes
    /// down. Nothing is persisted; the caller removes the host afterwards.
    pub async fn acquire_permission_to_remove(&self, host: &HostName) -> Result<()> {
        let application = self.application_of(host)?;
        let instance = self.instance(&application)?;
        let group = NodeGroup::single(application, host.clone());
        let ctx = OperationContext::root(&self.timeouts);

        let lock = self.status.lock_application(&ctx, group.application()).await?;
        let api = ApplicationApi::new(&instance, &group, lock.host_infos());
        let reasons = self.policy.acquire_permission_to_remove(&ctx, &api)?;

        let nodes = api.storage_nodes_in_group()?;
        self.driver
            .set_node_states(&ctx, &instance, &group, &nodes, ClusterControllerNodeState::Down, false)
            .await?;

        info!(operation_id = %ctx.id(), host = %host, reasons = %reasons, "Granted permission to remove");
        Ok(())
    }

    // Applications

    /// Force every storage node of the application into maintenance and mark
    /// the application and all of its hosts as allowed to be down.
    pub async fn suspend_application(&self, application: &ApplicationReference) -> Result<()> {
        let instance = self.instance(application)?;
        let ctx = OperationContext::root(&self.timeouts);
        let mut lock = self.status.lock_application(&ctx, application).await?;

        let hosts: Vec<HostName> = instance.hosts().into_iter().collect();
        let all_hosts_suspended = hosts.iter().all(|h| lock.host_info(h).is_suspended());
        if lock.application_status() == ApplicationStatus::AllowedToBeDown && all_hosts_suspended {
            debug!(application = %application, "Application already suspended");
            return Ok(());
        }

        let nodes = instance.storage_nodes()?;
        if !nodes.is_empty() {
            let group = NodeGroup::new(application.clone(), hosts.clone())?;
            self.driver
                .set_node_states(
                    &ctx,
                    &instance,
                    &group,
                    &nodes,
                    ClusterControllerNodeState::Maintenance,
                    true,
                )
                .await?;
        }

        for host in &hosts {
            lock.set_host_status(host, HostStatus::AllowedToBeDown)?;
        }
        lock.set_application_status(ApplicationStatus::AllowedToBeDown)?;

        observability::record_suspension(SuspensionOutcome::Granted);
        info!(operation_id = %ctx.id(), application = %application, hosts = hosts.len(), "Suspended application");
        Ok(())
    }

    /// Force every storage node of the application up and clear the
    /// application and all of its hosts.
    pub async fn resume_application(&self, application: &ApplicationReference) -> Result<()> {
        let instance = self.instance(application)?;
        let ctx = OperationContext::root(&self.timeouts);
        let mut lock = self.status.lock_application(&ctx, application).await?;

        let suspended: Vec<HostName> = lock
            .host_infos()
            .into_iter()
            .filter(|(_, info)| info.is_suspended())
            .map(|(host, _)| host)
            .collect();
        if lock.application_status() == ApplicationStatus::NoRemarks && suspended.is_empty() {
            debug!(application = %application, "Application not suspended");
            return Ok(());
        }

        let nodes = instance.storage_nodes()?;
        if !nodes.is_empty() {
            let hosts: Vec<HostName> = instance.hosts().into_iter().collect();
            let group = NodeGroup::new(application.clone(), hosts)?;
            self.driver
                .set_node_states(&ctx, &instance, &group, &nodes, ClusterControllerNodeState::Up, true)
                .await?;
        }

        for host in &suspended {
            lock.set_host_status(host, HostStatus::NoRemarks)?;
        }
        lock.set_application_status(ApplicationStatus::NoRemarks)?;

        observability::record_resume();
        info!(operation_id = %ctx.id(), application = %application, "Resumed application");
        Ok(())
    }
}
