//! Integration tests for multi-application batch suspension.

mod common;

use common::*;
use orchestrator::error::{GroupOutcome, GroupState, OrchestratorError};
use orchestrator::types::{ClusterControllerNodeState, HostName};

fn three_apps() -> Harness {
    Harness::new(vec![
        AppBuilder::new("x").storage(&["x1", "x2"]).build(),
        AppBuilder::new("y").storage(&["y1", "y2"]).build(),
        AppBuilder::new("z").storage(&["z1", "z2"]).build(),
    ])
}

fn hosts(names: &[&str]) -> Vec<HostName> {
    names.iter().map(|n| host(n)).collect()
}

fn outcomes(err: OrchestratorError) -> (Vec<GroupOutcome>, Vec<String>, OrchestratorError) {
    match err {
        OrchestratorError::BatchHostStateChangeDenied {
            outcomes,
            rollback_failures,
            source,
            ..
        } => (outcomes, rollback_failures, *source),
        other => panic!("expected batch error, got {}", other),
    }
}

fn states(outcomes: &[GroupOutcome]) -> Vec<GroupState> {
    outcomes.iter().map(|o| o.state).collect()
}

#[tokio::test]
async fn test_batch_suspends_every_group() {
    let harness = three_apps();

    harness
        .orchestrator
        .suspend_all(&host("parent"), &hosts(&["x1", "y1", "z1"]))
        .await
        .unwrap();

    for name in ["x1", "y1", "z1"] {
        assert!(harness.is_suspended(name).await, "{} not suspended", name);
    }
    assert_eq!(harness.orchestrator.get_all_suspended_applications().len(), 3);

    let calls = harness.controller.calls();
    let probes: Vec<&str> = calls.iter().filter(|c| c.probe).map(|c| c.host.as_str()).collect();
    let commits: Vec<&str> = calls.iter().filter(|c| !c.probe).map(|c| c.host.as_str()).collect();
    assert_eq!(probes, vec!["x1", "y1", "z1"]);
    assert_eq!(commits, vec!["x1", "y1", "z1"]);

    // Every probe precedes every commit.
    let last_probe = calls.iter().rposition(|c| c.probe).unwrap();
    let first_commit = calls.iter().position(|c| !c.probe).unwrap();
    assert!(last_probe < first_commit);
}

#[tokio::test]
async fn test_hosts_of_one_application_form_one_group() {
    let harness = Harness::new(vec![
        AppBuilder::new("x").storage(&["x1", "x2", "x3"]).build(),
        AppBuilder::new("y").storage(&["y1", "y2"]).build(),
    ]);
    harness.controller.refuse("y1");

    let err = harness
        .orchestrator
        .suspend_all(&host("parent"), &hosts(&["x1", "y1", "x2"]))
        .await
        .unwrap_err();

    let (outcomes, _, _) = outcomes(err);
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].group.hosts(), &hosts(&["x1", "x2"])[..]);
    assert_eq!(outcomes[1].group.hosts(), &hosts(&["y1"])[..]);
}

#[tokio::test]
async fn test_probe_failure_commits_nothing() {
    let harness = Harness::new(vec![
        AppBuilder::new("x").storage(&["h1", "x2"]).build(),
        AppBuilder::new("y").storage(&["h2", "y2"]).build(),
    ]);
    harness.controller.refuse("h2");

    let err = harness
        .orchestrator
        .suspend_all(&host("parent"), &hosts(&["h1", "h2"]))
        .await
        .unwrap_err();
    assert!(err.is_denial());
    assert_eq!(err.status_code(), 409);

    let (outcomes, rollback_failures, source) = outcomes(err);
    assert_eq!(states(&outcomes), vec![GroupState::Probed, GroupState::ProbeFailed]);
    assert!(rollback_failures.is_empty());
    assert!(source.is_denial());

    assert!(!harness.is_suspended("h1").await);
    assert!(!harness.is_suspended("h2").await);
    assert!(harness.controller.committed_calls().is_empty());
    assert!(harness.orchestrator.get_all_suspended_applications().is_empty());
}

#[tokio::test]
async fn test_policy_denial_in_probe_commits_nothing() {
    let harness = three_apps();
    harness.orchestrator.suspend(&host("y2")).await.unwrap();
    harness.controller.reset_calls();

    let err = harness
        .orchestrator
        .suspend_all(&host("parent"), &hosts(&["x1", "y1"]))
        .await
        .unwrap_err();

    let (outcomes, _, source) = outcomes(err);
    assert_eq!(states(&outcomes), vec![GroupState::Probed, GroupState::ProbeFailed]);
    assert!(source.to_string().contains("[y2] already suspended"));
    assert!(!harness.is_suspended("x1").await);
    assert!(harness.controller.committed_calls().is_empty());
}

#[tokio::test]
async fn test_commit_failure_rolls_back_in_reverse_order() {
    let harness = three_apps();
    harness.controller.fail_commit("z1");

    let err = harness
        .orchestrator
        .suspend_all(&host("parent"), &hosts(&["x1", "y1", "z1"]))
        .await
        .unwrap_err();

    let (outcomes, rollback_failures, source) = outcomes(err);
    assert_eq!(
        states(&outcomes),
        vec![GroupState::RolledBack, GroupState::RolledBack, GroupState::CommitFailed]
    );
    assert!(rollback_failures.is_empty());
    assert!(matches!(source, OrchestratorError::ClusterControllerUnavailable { .. }));

    for name in ["x1", "y1", "z1"] {
        assert!(!harness.is_suspended(name).await, "{} still suspended", name);
    }
    assert!(harness.orchestrator.get_all_suspended_applications().is_empty());

    let resumed: Vec<String> = harness
        .controller
        .committed_calls()
        .iter()
        .filter(|c| c.state == ClusterControllerNodeState::Up)
        .map(|c| c.host.to_string())
        .collect();
    assert_eq!(resumed, vec!["y1", "x1"]);
}

#[tokio::test]
async fn test_rollback_failures_are_aggregated() {
    let harness = three_apps();
    harness.controller.fail_commit("z1");
    harness.controller.fail_state("x1", ClusterControllerNodeState::Up);

    let err = harness
        .orchestrator
        .suspend_all(&host("parent"), &hosts(&["x1", "y1", "z1"]))
        .await
        .unwrap_err();
    let message = err.to_string();

    let (outcomes, rollback_failures, source) = outcomes(err);
    assert_eq!(
        states(&outcomes),
        vec![GroupState::RollbackFailed, GroupState::RolledBack, GroupState::CommitFailed]
    );
    assert_eq!(rollback_failures.len(), 1);
    assert!(rollback_failures[0].contains("x1"));

    // The original failure is what gets reported.
    assert!(matches!(source, OrchestratorError::ClusterControllerUnavailable { .. }));
    assert!(message.contains("parent"));

    assert!(harness.is_suspended("x1").await);
    assert!(!harness.is_suspended("y1").await);
}

#[tokio::test]
async fn test_rollback_leaves_previously_suspended_groups() {
    let harness = three_apps();
    harness.orchestrator.suspend(&host("x1")).await.unwrap();
    harness.controller.fail_commit("y1");

    let err = harness
        .orchestrator
        .suspend_all(&host("parent"), &hosts(&["x1", "y1"]))
        .await
        .unwrap_err();

    let (outcomes, _, _) = outcomes(err);
    assert_eq!(states(&outcomes), vec![GroupState::Committed, GroupState::CommitFailed]);
    assert!(harness.is_suspended("x1").await);
}

#[tokio::test]
async fn test_unknown_host_fails_before_any_work() {
    let harness = three_apps();

    let err = harness
        .orchestrator
        .suspend_all(&host("parent"), &hosts(&["x1", "ghost"]))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::HostNotFound(_)));
    assert!(harness.controller.calls().is_empty());
}

#[tokio::test]
async fn test_empty_batch_is_a_no_op() {
    let harness = three_apps();
    harness
        .orchestrator
        .suspend_all(&host("parent"), &[])
        .await
        .unwrap();
    assert!(harness.controller.calls().is_empty());
}

#[tokio::test]
async fn test_batch_is_idempotent() {
    let harness = three_apps();
    let batch = hosts(&["x1", "y1"]);

    harness.orchestrator.suspend_all(&host("parent"), &batch).await.unwrap();
    let calls = harness.controller.calls().len();

    harness.orchestrator.suspend_all(&host("parent"), &batch).await.unwrap();
    assert_eq!(harness.controller.calls().len(), calls);
}
