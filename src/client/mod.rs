//! Client library for the orchestrator HTTP API.

use crate::error::{OrchestratorError, Result};
use crate::server::{
    BatchOperationResponse, ErrorResponse, HostStatusResponse, InstanceStatusResponse,
    QuiescentResponse, UpdateHostResponse,
};
use crate::types::{ApplicationReference, HostName};
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use std::time::Duration;

/// Default connection timeout for client requests.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default request timeout. Batch suspensions may run up to the server's batch budget.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

/// Client for an orchestrator server.
#[derive(Clone)]
pub struct OrchestratorClient {
    base_url: String,
    client: Client,
}

impl OrchestratorClient {
    /// Create a new client with default timeouts.
    pub fn new(addr: SocketAddr) -> Self {
        Self::with_timeouts(addr, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a new client with custom timeouts.
    pub fn with_timeouts(
        addr: SocketAddr,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url: format!("http://{}", addr),
            client,
        }
    }

    /// Create from address string.
    pub fn from_addr(addr: &str) -> Result<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| OrchestratorError::InvalidInput(format!("Invalid address: {}", e)))?;
        Ok(Self::new(addr))
    }

    /// URL of `segments` under the server address, each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| OrchestratorError::InvalidInput(format!("Invalid server URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| OrchestratorError::InvalidInput(format!("{} cannot have a path", self.base_url)))?
            .clear()
            .extend(segments);
        Ok(url)
    }

    /// Check server health.
    pub async fn health(&self) -> Result<bool> {
        let url = self.url(&["health"])?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| OrchestratorError::Network(e.to_string()))?;
        Ok(response.status().is_success())
    }

    pub async fn host_status(&self, host: &HostName) -> Result<HostStatusResponse> {
        let url = self.url(&["orchestrator", "v1", "hosts", host.as_str()])?;
        send(self.client.get(url)).await
    }

    /// Suspend a host.
    pub async fn suspend_host(&self, host: &HostName) -> Result<UpdateHostResponse> {
        let url = self.url(&["orchestrator", "v1", "hosts", host.as_str(), "suspended"])?;
        send(self.client.put(url)).await
    }

    /// Resume a suspended host.
    pub async fn resume_host(&self, host: &HostName) -> Result<UpdateHostResponse> {
        let url = self.url(&["orchestrator", "v1", "hosts", host.as_str(), "suspended"])?;
        send(self.client.delete(url)).await
    }

    /// Ask for permission to permanently remove a host.
    pub async fn remove_host(&self, host: &HostName) -> Result<UpdateHostResponse> {
        let url = self.url(&["orchestrator", "v1", "hosts", host.as_str(), "removal"])?;
        send(self.client.put(url)).await
    }

    /// Suspend `hosts` on behalf of `parent`, all or nothing.
    pub async fn suspend_all(
        &self,
        parent: &HostName,
        hosts: &[HostName],
    ) -> Result<BatchOperationResponse> {
        let url = self.url(&["orchestrator", "v1", "suspensions", "hosts", parent.as_str()])?;
        let query: Vec<(&str, &str)> = hosts.iter().map(|h| ("hostname", h.as_str())).collect();
        send(self.client.put(url).query(&query)).await
    }

    /// Applications currently suspended as a whole.
    pub async fn suspended_instances(&self) -> Result<Vec<ApplicationReference>> {
        let url = self.url(&["orchestrator", "v1", "instances", "suspended"])?;
        send(self.client.get(url)).await
    }

    pub async fn instance_status(
        &self,
        application: &ApplicationReference,
    ) -> Result<InstanceStatusResponse> {
        let application = application.to_string();
        let url = self.url(&["orchestrator", "v1", "instances", application.as_str()])?;
        send(self.client.get(url)).await
    }

    pub async fn suspend_instance(
        &self,
        application: &ApplicationReference,
    ) -> Result<InstanceStatusResponse> {
        let application = application.to_string();
        let url = self.url(&["orchestrator", "v1", "instances", application.as_str(), "suspended"])?;
        send(self.client.put(url)).await
    }

    pub async fn resume_instance(
        &self,
        application: &ApplicationReference,
    ) -> Result<InstanceStatusResponse> {
        let application = application.to_string();
        let url = self.url(&["orchestrator", "v1", "instances", application.as_str(), "suspended"])?;
        send(self.client.delete(url)).await
    }

    /// Whether every storage node of the application could go to maintenance now.
    pub async fn is_quiescent(&self, application: &ApplicationReference) -> Result<bool> {
        let application = application.to_string();
        let url = self.url(&["orchestrator", "v1", "instances", application.as_str(), "quiescent"])?;
        let response: QuiescentResponse = send(self.client.get(url)).await?;
        Ok(response.quiescent)
    }
}

async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
    let response = request
        .send()
        .await
        .map_err(|e| OrchestratorError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let message = match response.json::<ErrorResponse>().await {
            Ok(body) => body.message,
            Err(_) => status.to_string(),
        };
        return Err(OrchestratorError::Rejected {
            status: status.as_u16(),
            message,
        });
    }

    response
        .json()
        .await
        .map_err(|e| OrchestratorError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_addr() {
        let client = OrchestratorClient::from_addr("127.0.0.1:19071").unwrap();
        assert_eq!(client.base_url, "http://127.0.0.1:19071");
    }

    #[test]
    fn test_from_invalid_addr() {
        let err = OrchestratorClient::from_addr("not-an-address").err().unwrap();
        assert!(matches!(err, OrchestratorError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        let client = OrchestratorClient::with_timeouts(
            "127.0.0.1:1".parse().unwrap(),
            Duration::from_millis(200),
            Duration::from_millis(500),
        );
        let err = client.suspend_host(&"h1".into()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_path_segments_are_encoded() {
        let client = OrchestratorClient::from_addr("127.0.0.1:19071").unwrap();

        let url = client
            .url(&["orchestrator", "v1", "hosts", "a b/c?d", "suspended"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:19071/orchestrator/v1/hosts/a%20b%2Fc%3Fd/suspended"
        );

        let application =
            ApplicationReference::new("tenant", "music", "prod", "us-east", "default").to_string();
        let url = client
            .url(&["orchestrator", "v1", "instances", application.as_str()])
            .unwrap();
        assert_eq!(url.path(), format!("/orchestrator/v1/instances/{}", application));
    }
}
