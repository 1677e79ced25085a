//! Failover across cluster controller replicas.
//!
//! Only the elected master accepts state changes. Endpoints are tried in
//! order; retryable failures move on to the next endpoint, and after a full
//! round the client backs off before starting another.

use super::ControllerEndpoint;
use crate::config::ClusterControllerConfig;
use crate::context::OperationContext;
use crate::error::{OrchestratorError, Result};
use crate::types::{ClusterId, HostName};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Rounds and backoff for endpoint failover.
#[derive(Debug, Clone)]
pub struct FailoverPolicy {
    /// Full passes over the endpoint list.
    pub rounds: u32,
    /// Delay after the first unsuccessful round.
    pub initial_backoff: Duration,
    /// Maximum delay between rounds.
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
}

impl Default for FailoverPolicy {
    fn default() -> Self {
        Self::from_config(&ClusterControllerConfig::default())
    }
}

impl FailoverPolicy {
    pub fn from_config(config: &ClusterControllerConfig) -> Self {
        Self {
            rounds: config.rounds,
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            multiplier: config.backoff_multiplier,
        }
    }

    /// Delay after unsuccessful round `round` (1-based).
    pub fn delay_after_round(&self, round: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64()
            * self.multiplier.powi(round.saturating_sub(1) as i32);
        Duration::from_secs_f64(base.min(self.max_backoff.as_secs_f64()))
    }

    /// Run `call` against the endpoints until one succeeds, a non-retryable
    /// error occurs, the rounds are exhausted, or the context deadline passes.
    pub async fn execute<T, F, Fut>(
        &self,
        ctx: &OperationContext,
        cluster_id: &ClusterId,
        host: &HostName,
        endpoints: &[ControllerEndpoint],
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut(ControllerEndpoint) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if endpoints.is_empty() {
            return Err(OrchestratorError::ClusterController(format!(
                "No cluster controllers known for {} in cluster {}",
                host, cluster_id
            )));
        }

        let mut attempts = Vec::new();
        for round in 1..=self.rounds.max(1) {
            for endpoint in endpoints {
                ctx.remaining()?;

                match call(endpoint.clone()).await {
                    Ok(value) => return Ok(value),
                    Err(e) if e.is_retryable() => {
                        debug!(
                            operation_id = %ctx.id(),
                            cluster = %cluster_id,
                            host = %host,
                            endpoint = %endpoint,
                            round,
                            error = %e,
                            "Cluster controller unavailable, trying next"
                        );
                        attempts.push(format!("{}: {}", endpoint, e));
                    }
                    Err(e) => return Err(e),
                }
            }

            if round < self.rounds {
                let delay = self.delay_after_round(round).min(ctx.remaining()?);
                warn!(
                    operation_id = %ctx.id(),
                    cluster = %cluster_id,
                    host = %host,
                    round,
                    delay_ms = delay.as_millis() as u64,
                    "No cluster controller accepted the request, backing off"
                );
                sleep(delay).await;
            }
        }

        Err(OrchestratorError::ClusterControllerUnavailable {
            cluster_id: cluster_id.clone(),
            host: host.clone(),
            attempts,
        })
    }
}
