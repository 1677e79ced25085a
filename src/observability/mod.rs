//! Observability for the orchestrator.
//!
//! Provides logging initialisation and the operation counters.

use crate::config::ObservabilityConfig;
use crate::error::{OrchestratorError, Result};
use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Suspension attempts by outcome.
pub const SUSPENSIONS_TOTAL: &str = "orchestrator_suspensions_total";
/// Completed resumes.
pub const RESUMES_TOTAL: &str = "orchestrator_resumes_total";
/// Batches whose committed prefix was rolled back.
pub const BATCH_ROLLBACKS_TOTAL: &str = "orchestrator_batch_rollbacks_total";

/// Initialize logging.
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| OrchestratorError::Internal(format!("Failed to init logging: {}", e)))?;
    } else {
        subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| OrchestratorError::Internal(format!("Failed to init logging: {}", e)))?;
    }

    info!("Observability initialized");
    Ok(())
}

/// Install the Prometheus recorder. The handle renders `/metrics`.
pub fn install_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| {
            OrchestratorError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

    register_metrics();
    Ok(handle)
}

fn register_metrics() {
    for outcome in SuspensionOutcome::ALL {
        counter!(SUSPENSIONS_TOTAL, "outcome" => outcome.as_str()).absolute(0);
    }
    counter!(RESUMES_TOTAL).absolute(0);
    counter!(BATCH_ROLLBACKS_TOTAL).absolute(0);
}

/// Outcome label of a committed suspension attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspensionOutcome {
    Granted,
    Denied,
    Failed,
}

impl SuspensionOutcome {
    const ALL: [SuspensionOutcome; 3] = [
        SuspensionOutcome::Granted,
        SuspensionOutcome::Denied,
        SuspensionOutcome::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SuspensionOutcome::Granted => "granted",
            SuspensionOutcome::Denied => "denied",
            SuspensionOutcome::Failed => "failed",
        }
    }

    pub fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => SuspensionOutcome::Granted,
            Err(e) if e.is_denial() => SuspensionOutcome::Denied,
            Err(_) => SuspensionOutcome::Failed,
        }
    }
}

/// Record a committed suspension attempt.
pub fn record_suspension(outcome: SuspensionOutcome) {
    counter!(SUSPENSIONS_TOTAL, "outcome" => outcome.as_str()).increment(1);
}

/// Record a completed resume.
pub fn record_resume() {
    counter!(RESUMES_TOTAL).increment(1);
}

/// Record a batch rollback.
pub fn record_batch_rollback() {
    counter!(BATCH_ROLLBACKS_TOTAL).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Constraint, DenialReason};
    use crate::types::{ApplicationReference, HostName, NodeGroup};

    #[test]
    fn test_outcome_of_result() {
        let group = NodeGroup::single(
            ApplicationReference::new("t", "a", "prod", "r", "default"),
            HostName::from("h1"),
        );
        let denied: Result<()> = Err(OrchestratorError::denied(
            &group,
            DenialReason::new(Constraint::EnoughServicesUp, "no"),
        ));
        let failed: Result<()> = Err(OrchestratorError::Timeout("late".into()));

        assert_eq!(SuspensionOutcome::of(&Ok(())), SuspensionOutcome::Granted);
        assert_eq!(SuspensionOutcome::of(&denied), SuspensionOutcome::Denied);
        assert_eq!(SuspensionOutcome::of(&failed), SuspensionOutcome::Failed);
        assert_eq!(SuspensionOutcome::Denied.as_str(), "denied");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_suspension(SuspensionOutcome::Granted);
        record_resume();
        record_batch_rollback();
    }
}
