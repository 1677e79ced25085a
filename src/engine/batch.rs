//! Suspension of many hosts under one parent host.
//!
//! Hosts are grouped by application, in input order. All groups are probed
//! before any is committed. Locks taken during the probe pass stay held for
//! the rest of the batch, so the commit pass sees the state that was probed.
//! When a commit fails, the groups committed so far are resumed in reverse
//! order before the error is returned.

use super::Orchestrator;
use crate::context::OperationContext;
use crate::error::{GroupOutcome, GroupState, OrchestratorError, Result};
use crate::observability;
use crate::types::{HostName, NodeGroup};
use tracing::{info, warn};

impl Orchestrator {
    /// Suspend `hosts` on behalf of `parent`, all or nothing.
    pub async fn suspend_all(&self, parent: &HostName, hosts: &[HostName]) -> Result<()> {
        let groups = self.node_groups_for(hosts)?;
        if groups.is_empty() {
            return Ok(());
        }

        let ctx = OperationContext::for_multi_app_op(self.timeouts(), groups.len());
        let mut states = vec![GroupState::NotAttempted; groups.len()];

        info!(
            operation_id = %ctx.id(),
            parent = %parent,
            groups = groups.len(),
            "Suspending node groups"
        );

        for (i, group) in groups.iter().enumerate() {
            let probe = ctx.subcontext_for_single_app_op(true);
            if let Err(e) = self.suspend_group(&probe, group).await {
                states[i] = GroupState::ProbeFailed;
                info!(operation_id = %ctx.id(), node_group = %group, error = %e, "Probe failed");
                return Err(batch_error(parent, &groups, states, e, Vec::new()));
            }
            states[i] = GroupState::Probed;
        }

        let mut changed = vec![false; groups.len()];
        for (i, group) in groups.iter().enumerate() {
            let commit = ctx.subcontext_for_single_app_op(false);
            match self.suspend_group_changed(&commit, group).await {
                Ok(was_changed) => {
                    states[i] = GroupState::Committed;
                    changed[i] = was_changed;
                }
                Err(e) => {
                    states[i] = GroupState::CommitFailed;
                    warn!(operation_id = %ctx.id(), node_group = %group, error = %e, "Commit failed, rolling back");
                    let failures = self
                        .roll_back(&ctx, &groups[..i], &changed[..i], &mut states[..i])
                        .await;
                    observability::record_batch_rollback();
                    return Err(batch_error(parent, &groups, states, e, failures));
                }
            }
        }

        Ok(())
    }

    /// Partition hosts into node groups by owning application.
    fn node_groups_for(&self, hosts: &[HostName]) -> Result<Vec<NodeGroup>> {
        let mut groups: Vec<NodeGroup> = Vec::new();
        for host in hosts {
            let application = self.application_of(host)?;
            match groups.iter_mut().find(|g| *g.application() == application) {
                Some(group) => group.push(host.clone()),
                None => groups.push(NodeGroup::single(application, host.clone())),
            }
        }
        Ok(groups)
    }

    /// Resume the committed groups that changed, most recent first.
    /// Failures are collected rather than aborting the rollback.
    async fn roll_back(
        &self,
        ctx: &OperationContext,
        groups: &[NodeGroup],
        changed: &[bool],
        states: &mut [GroupState],
    ) -> Vec<String> {
        let rollback = ctx.subcontext_for_rollback();
        let mut failures = Vec::new();

        for i in (0..groups.len()).rev() {
            if !changed[i] {
                continue;
            }
            match self.resume_group(&rollback, &groups[i]).await {
                Ok(()) => states[i] = GroupState::RolledBack,
                Err(e) => {
                    warn!(operation_id = %ctx.id(), node_group = %groups[i], error = %e, "Rollback failed");
                    states[i] = GroupState::RollbackFailed;
                    failures.push(format!("{}: {}", groups[i], e));
                }
            }
        }
        failures
    }
}

fn batch_error(
    parent: &HostName,
    groups: &[NodeGroup],
    states: Vec<GroupState>,
    source: OrchestratorError,
    rollback_failures: Vec<String>,
) -> OrchestratorError {
    let outcomes = groups
        .iter()
        .cloned()
        .zip(states)
        .map(|(group, state)| GroupOutcome { group, state })
        .collect();

    OrchestratorError::BatchHostStateChangeDenied {
        parent: parent.clone(),
        outcomes,
        source: Box::new(source),
        rollback_failures,
    }
}
