use super::{
    ClusterControllerClient, ClusterControllerClientFactory, ClusterControllerClientTimeouts,
    ControllerEndpoint, FailoverPolicy, SetNodeStateRequest, SetNodeStateResponse,
};
use crate::config::ClusterControllerConfig;
use crate::context::OperationContext;
use crate::error::{OrchestratorError, Result};
use crate::types::{ClusterControllerNodeState, ClusterId, HostName, ServiceType};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Creates HTTP clients sharing one connection pool.
#[derive(Clone)]
pub struct HttpClusterControllerClientFactory {
    client: Client,
    failover: FailoverPolicy,
    downstream_overhead: Duration,
    min_server_timeout: Duration,
}

impl HttpClusterControllerClientFactory {
    pub fn new(config: &ClusterControllerConfig) -> Result<Self> {
        // Redirects point at the master; failover walks the endpoints instead.
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| OrchestratorError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            failover: FailoverPolicy::from_config(config),
            downstream_overhead: config.downstream_overhead,
            min_server_timeout: config.min_server_timeout,
        })
    }
}

impl ClusterControllerClientFactory for HttpClusterControllerClientFactory {
    fn create_client(
        &self,
        endpoints: Vec<ControllerEndpoint>,
        cluster_id: &ClusterId,
    ) -> Arc<dyn ClusterControllerClient> {
        Arc::new(HttpClusterControllerClient {
            client: self.client.clone(),
            endpoints,
            cluster_id: cluster_id.clone(),
            failover: self.failover.clone(),
            downstream_overhead: self.downstream_overhead,
            min_server_timeout: self.min_server_timeout,
        })
    }
}

/// Cluster controller client speaking the `/cluster/v2` state API.
pub struct HttpClusterControllerClient {
    client: Client,
    endpoints: Vec<ControllerEndpoint>,
    cluster_id: ClusterId,
    failover: FailoverPolicy,
    downstream_overhead: Duration,
    min_server_timeout: Duration,
}

impl HttpClusterControllerClient {
    fn node_path(&self, service_type: &ServiceType, index: u16) -> String {
        let kind = if service_type.as_str() == ServiceType::DISTRIBUTOR {
            "distributor"
        } else {
            "storage"
        };
        format!("/cluster/v2/{}/{}/{}", self.cluster_id, kind, index)
    }

    async fn post_state(
        &self,
        ctx: &OperationContext,
        endpoint: ControllerEndpoint,
        path: &str,
        request: &SetNodeStateRequest,
    ) -> Result<SetNodeStateResponse> {
        let timeouts = ClusterControllerClientTimeouts::from_context(
            ctx,
            self.downstream_overhead,
            self.min_server_timeout,
        )?;
        let url = format!("http://{}{}", endpoint, path);

        let response = self
            .client
            .post(&url)
            .query(&[("timeout", timeouts.server_timeout_secs())])
            .timeout(timeouts.request)
            .json(request)
            .send()
            .await
            .map_err(|e| OrchestratorError::Network(format!("{}: {}", endpoint, e)))?;

        let status = response.status();
        if matches!(
            status,
            StatusCode::TEMPORARY_REDIRECT
                | StatusCode::PERMANENT_REDIRECT
                | StatusCode::SERVICE_UNAVAILABLE
        ) {
            return Err(OrchestratorError::NotMaster(format!(
                "{} answered {}",
                endpoint, status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::ClusterController(format!(
                "{} answered {}: {}",
                endpoint, status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| OrchestratorError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl ClusterControllerClient for HttpClusterControllerClient {
    async fn try_set_node_state(
        &self,
        ctx: &OperationContext,
        host: &HostName,
        index: u16,
        state: ClusterControllerNodeState,
        service_type: &ServiceType,
        force: bool,
    ) -> Result<bool> {
        let path = self.node_path(service_type, index);
        let request = SetNodeStateRequest::new(state, force, ctx.is_probe());

        debug!(
            operation_id = %ctx.id(),
            cluster = %self.cluster_id,
            host = %host,
            index,
            state = %state,
            probe = ctx.is_probe(),
            "Setting node state"
        );

        let response = self
            .failover
            .execute(ctx, &self.cluster_id, host, &self.endpoints, |endpoint| {
                self.post_state(ctx, endpoint, &path, &request)
            })
            .await?;

        if !response.was_modified {
            info!(
                operation_id = %ctx.id(),
                cluster = %self.cluster_id,
                host = %host,
                index,
                state = %state,
                reason = response.reason.as_deref().unwrap_or(""),
                "Cluster controller refused state change"
            );
        }
        Ok(response.was_modified)
    }
}
