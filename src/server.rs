//! HTTP API of the orchestrator.

use crate::engine::Orchestrator;
use crate::error::{GroupOutcome, OrchestratorError, Result};
use crate::types::{
    ApplicationReference, ApplicationStatus, ClusterId, HostName, HostStatus, ServiceType,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Shared server state for Axum handlers.
#[derive(Clone)]
pub struct ServerState {
    orchestrator: Arc<Orchestrator>,
    metrics: Option<PrometheusHandle>,
}

impl ServerState {
    pub fn new(orchestrator: Arc<Orchestrator>, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            orchestrator,
            metrics,
        }
    }
}

/// Build the API router.
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handle_metrics))
        .route("/orchestrator/v1/hosts/:host", get(handle_get_host))
        .route(
            "/orchestrator/v1/hosts/:host/suspended",
            put(handle_suspend_host).delete(handle_resume_host),
        )
        .route("/orchestrator/v1/hosts/:host/removal", put(handle_remove_host))
        .route("/orchestrator/v1/suspensions/hosts/:parent", put(handle_suspend_all))
        .route("/orchestrator/v1/instances/suspended", get(handle_suspended_instances))
        .route("/orchestrator/v1/instances/:app", get(handle_get_instance))
        .route(
            "/orchestrator/v1/instances/:app/suspended",
            put(handle_suspend_instance).delete(handle_resume_instance),
        )
        .route("/orchestrator/v1/instances/:app/quiescent", get(handle_quiescent))
        .with_state(state)
}

/// Serve the API on `listener` until `shutdown` completes.
pub async fn serve<F>(listener: TcpListener, state: ServerState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(addr = %addr, "Orchestrator API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| OrchestratorError::Network(e.to_string()))
}

/// Bind `addr` and serve the API until `shutdown` completes.
pub async fn run_server<F>(addr: SocketAddr, state: ServerState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    serve(listener, state, shutdown).await
}

// Wire types

/// Status of one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStatusResponse {
    pub hostname: HostName,
    pub state: HostStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspended_since: Option<DateTime<Utc>>,
}

/// Result of a host state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateHostResponse {
    pub hostname: HostName,
}

/// Result of a batch suspension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOperationResponse {
    pub parent: HostName,
    pub hostnames: Vec<HostName>,
}

/// Status of one application instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatusResponse {
    pub reference: ApplicationReference,
    pub status: ApplicationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuiescentResponse {
    pub quiescent: bool,
}

/// Error body. Denials carry the violated constraint and its context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<ClusterId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<ServiceType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suspended_hosts: Vec<HostName>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub down_hosts: Vec<HostName>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub missing_services: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outcomes: Vec<OutcomeResponse>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rollback_failures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeResponse {
    pub application: ApplicationReference,
    pub hostnames: Vec<HostName>,
    pub state: String,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl From<&OrchestratorError> for ErrorResponse {
    fn from(err: &OrchestratorError) -> Self {
        let mut response = ErrorResponse {
            message: err.to_string(),
            ..Default::default()
        };

        if let Some(reason) = err.denial_reason() {
            response.constraint = Some(reason.constraint.to_string());
            response.cluster_id = reason.cluster_id.clone();
            response.service_type = reason.service_type.clone();
            response.suspended_hosts = reason.suspended_hosts.clone();
            response.down_hosts = reason.down_hosts.clone();
            response.missing_services = reason.missing_services;
        }

        if let OrchestratorError::BatchHostStateChangeDenied {
            outcomes,
            rollback_failures,
            ..
        } = err
        {
            response.outcomes = outcomes.iter().map(OutcomeResponse::from).collect();
            response.rollback_failures = rollback_failures.clone();
        }

        response
    }
}

impl From<&GroupOutcome> for OutcomeResponse {
    fn from(outcome: &GroupOutcome) -> Self {
        let state = serde_json::to_value(outcome.state)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        Self {
            application: outcome.group.application().clone(),
            hostnames: outcome.group.hosts().to_vec(),
            state,
        }
    }
}

/// Error returned by handlers.
pub struct ApiError(OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(error = %self.0, "Request failed");
        }
        (status, Json(ErrorResponse::from(&self.0))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

fn parse_application(app: &str) -> std::result::Result<ApplicationReference, ApiError> {
    app.parse().map_err(ApiError)
}

// API Handlers

async fn health_check() -> &'static str {
    "OK"
}

async fn handle_metrics(State(state): State<ServerState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn handle_get_host(
    State(state): State<ServerState>,
    Path(host): Path<String>,
) -> ApiResult<HostStatusResponse> {
    let hostname = HostName::from(host);
    let info = state.orchestrator.get_node_status(&hostname).await?;
    Ok(Json(HostStatusResponse {
        hostname,
        state: info.status,
        suspended_since: info.suspended_since,
    }))
}

async fn handle_suspend_host(
    State(state): State<ServerState>,
    Path(host): Path<String>,
) -> ApiResult<UpdateHostResponse> {
    let hostname = HostName::from(host);
    state.orchestrator.suspend(&hostname).await?;
    Ok(Json(UpdateHostResponse { hostname }))
}

async fn handle_resume_host(
    State(state): State<ServerState>,
    Path(host): Path<String>,
) -> ApiResult<UpdateHostResponse> {
    let hostname = HostName::from(host);
    state.orchestrator.resume(&hostname).await?;
    Ok(Json(UpdateHostResponse { hostname }))
}

async fn handle_remove_host(
    State(state): State<ServerState>,
    Path(host): Path<String>,
) -> ApiResult<UpdateHostResponse> {
    let hostname = HostName::from(host);
    state.orchestrator.acquire_permission_to_remove(&hostname).await?;
    Ok(Json(UpdateHostResponse { hostname }))
}

async fn handle_suspend_all(
    State(state): State<ServerState>,
    Path(parent): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResult<BatchOperationResponse> {
    let parent = HostName::from(parent);
    let hostnames: Vec<HostName> = params
        .into_iter()
        .filter(|(key, _)| key == "hostname")
        .map(|(_, value)| HostName::from(value))
        .collect();

    state.orchestrator.suspend_all(&parent, &hostnames).await?;
    Ok(Json(BatchOperationResponse { parent, hostnames }))
}

async fn handle_suspended_instances(
    State(state): State<ServerState>,
) -> Json<Vec<ApplicationReference>> {
    Json(
        state
            .orchestrator
            .get_all_suspended_applications()
            .into_iter()
            .collect(),
    )
}

async fn handle_get_instance(
    State(state): State<ServerState>,
    Path(app): Path<String>,
) -> ApiResult<InstanceStatusResponse> {
    let reference = parse_application(&app)?;
    let status = state
        .orchestrator
        .get_application_instance_status(&reference)
        .await?;
    Ok(Json(InstanceStatusResponse { reference, status }))
}

async fn handle_suspend_instance(
    State(state): State<ServerState>,
    Path(app): Path<String>,
) -> ApiResult<InstanceStatusResponse> {
    let reference = parse_application(&app)?;
    state.orchestrator.suspend_application(&reference).await?;
    Ok(Json(InstanceStatusResponse {
        reference,
        status: ApplicationStatus::AllowedToBeDown,
    }))
}

async fn handle_resume_instance(
    State(state): State<ServerState>,
    Path(app): Path<String>,
) -> ApiResult<InstanceStatusResponse> {
    let reference = parse_application(&app)?;
    state.orchestrator.resume_application(&reference).await?;
    Ok(Json(InstanceStatusResponse {
        reference,
        status: ApplicationStatus::NoRemarks,
    }))
}

async fn handle_quiescent(
    State(state): State<ServerState>,
    Path(app): Path<String>,
) -> ApiResult<QuiescentResponse> {
    let reference = parse_application(&app)?;
    let quiescent = state.orchestrator.is_quiescent(&reference).await?;
    Ok(Json(QuiescentResponse { quiescent }))
}
