use crate::context::OperationContext;
use crate::error::{OrchestratorError, Result};
use std::time::Duration;

/// Timeouts for one cluster controller request, derived from the time left
/// in the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterControllerClientTimeouts {
    /// Client-side bound on the whole request.
    pub request: Duration,
    /// Sent to the controller as the time it may spend on the request.
    pub server: Duration,
}

impl ClusterControllerClientTimeouts {
    pub fn from_context(
        ctx: &OperationContext,
        downstream_overhead: Duration,
        min_server_timeout: Duration,
    ) -> Result<Self> {
        Self::from_remaining(ctx.remaining()?, downstream_overhead, min_server_timeout)
    }

    pub fn from_remaining(
        remaining: Duration,
        downstream_overhead: Duration,
        min_server_timeout: Duration,
    ) -> Result<Self> {
        let server = remaining.saturating_sub(downstream_overhead);
        if server < min_server_timeout {
            return Err(OrchestratorError::Timeout(format!(
                "{}ms left is not enough for a cluster controller request",
                remaining.as_millis()
            )));
        }

        Ok(Self {
            request: remaining,
            server,
        })
    }

    /// Server timeout as sent in the query string, in seconds.
    pub fn server_timeout_secs(&self) -> String {
        format!("{:.3}", self.server.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_timeout_leaves_overhead() {
        let timeouts = ClusterControllerClientTimeouts::from_remaining(
            Duration::from_secs(5),
            Duration::from_millis(300),
            Duration::from_millis(100),
        )
        .unwrap();
        assert_eq!(timeouts.request, Duration::from_secs(5));
        assert_eq!(timeouts.server, Duration::from_millis(4700));
        assert_eq!(timeouts.server_timeout_secs(), "4.700");
    }

    #[test]
    fn test_too_little_time_left() {
        let result = ClusterControllerClientTimeouts::from_remaining(
            Duration::from_millis(350),
            Duration::from_millis(300),
            Duration::from_millis(100),
        );
        assert!(matches!(result, Err(OrchestratorError::Timeout(_))));
    }
}
