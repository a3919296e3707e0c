//! Shared REST plumbing plus the operational and container endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use faultline_chaos::FailureInjector;
use faultline_core::FaultlineError;
use faultline_pipeline::{Deployer, PipelineSequencer};
use faultline_recovery::RecoveryController;
use faultline_runtime::{ContainerRuntime, ContainerState, ContainerSummary};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};

/// Default number of log lines returned by `/api/logs/:name`.
const DEFAULT_LOG_TAIL: u32 = 100;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub injector: Arc<FailureInjector>,
    pub controller: Arc<RecoveryController>,
    pub sequencer: Arc<PipelineSequencer>,
    pub deployer: Arc<Deployer>,
    pub start_time: Instant,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Domain error rendered as a JSON error body.
#[derive(Debug)]
pub struct ApiError(pub FaultlineError);

impl From<FaultlineError> for ApiError {
    fn from(e: FaultlineError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            FaultlineError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            FaultlineError::UnknownStrategy(_) => (StatusCode::BAD_REQUEST, "unknown_strategy"),
            FaultlineError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            FaultlineError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            e if e.is_external_tool() => (StatusCode::INTERNAL_SERVER_ERROR, "external_tool_failed"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
            metrics::counter!("api.errors").increment(1);
        } else {
            warn!(error = %self.0, "Request rejected");
            metrics::counter!("api.rejections", "code" => code).increment(1);
        }
        let body = ErrorResponse {
            error: code.to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Reject a blank required field with a 400.
pub(crate) fn required(value: &str, field: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(FaultlineError::Validation(format!("Missing required field: {field}")).into());
    }
    Ok(())
}

// ─── Operational ────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub uptime_secs: u64,
}

/// GET /ping
pub async fn ping(State(state): State<AppState>) -> Json<PingResponse> {
    Json(PingResponse {
        status: "ok",
        message: "FaultLine backend is running",
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

#[derive(Serialize)]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub api: &'static str,
}

/// GET /
pub async fn service_info() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: "FaultLine",
        version: env!("CARGO_PKG_VERSION"),
        description: "Chaos engineering and auto-recovery for containers",
        api: "/api",
    })
}

// ─── Containers ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub container_name: String,
}

#[derive(Serialize)]
pub struct DeployedContainer {
    pub id: String,
    pub name: String,
    pub image: String,
}

#[derive(Serialize)]
pub struct DeployResponse {
    pub success: bool,
    pub message: String,
    pub container: DeployedContainer,
}

/// POST /api/deploy
pub async fn deploy(
    State(state): State<AppState>,
    Json(request): Json<DeployRequest>,
) -> ApiResult<(StatusCode, Json<DeployResponse>)> {
    required(&request.image, "image")?;
    required(&request.container_name, "containerName")?;
    let handle = state
        .deployer
        .deploy_image(&request.image, &request.container_name)
        .await?;
    metrics::counter!("api.deployments").increment(1);
    Ok((
        StatusCode::CREATED,
        Json(DeployResponse {
            success: true,
            message: format!("Container {} deployed successfully", handle.name),
            container: DeployedContainer {
                id: handle.id,
                name: handle.name,
                image: request.image,
            },
        }),
    ))
}

#[derive(Serialize)]
pub struct ContainersResponse {
    pub success: bool,
    pub containers: Vec<ContainerSummary>,
    pub count: usize,
}

/// GET /api/containers
pub async fn list_containers(State(state): State<AppState>) -> ApiResult<Json<ContainersResponse>> {
    let containers = state.runtime.list(true).await?;
    Ok(Json(ContainersResponse {
        success: true,
        count: containers.len(),
        containers,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub success: bool,
    pub container_name: String,
    pub health: ContainerState,
}

/// GET /api/health/:name
pub async fn container_health(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<HealthResponse>> {
    let health = state.runtime.inspect(&name).await?;
    Ok(Json(HealthResponse {
        success: true,
        container_name: name,
        health,
    }))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub tail: Option<u32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsResponse {
    pub success: bool,
    pub container_name: String,
    pub logs: String,
}

/// GET /api/logs/:name?tail=
pub async fn container_logs(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<LogsResponse>> {
    let logs = state
        .runtime
        .logs(&name, query.tail.unwrap_or(DEFAULT_LOG_TAIL))
        .await?;
    Ok(Json(LogsResponse {
        success: true,
        container_name: name,
        logs,
    }))
}
