//! Repository deployment and pipeline endpoints. Both start background work
//! and answer 202 once the request has been validated.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use faultline_core::types::{PipelineRun, TimelineEvent};
use faultline_core::FaultlineError;
use faultline_pipeline::PipelineRequest;
use serde::Serialize;
use uuid::Uuid;

use crate::rest::{required, ApiResult, AppState};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployAccepted {
    pub status: &'static str,
    pub message: String,
    pub container_name: String,
    pub steps: [&'static str; 4],
}

/// POST /api/deploy-from-github
pub async fn deploy_from_github(
    State(state): State<AppState>,
    Json(request): Json<PipelineRequest>,
) -> ApiResult<(StatusCode, Json<DeployAccepted>)> {
    required(&request.repo_url, "repoUrl")?;
    required(&request.workload_name, "containerName")?;
    let container_name = request.workload_name.clone();
    state.deployer.spawn_from_repo(request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(DeployAccepted {
            status: "processing",
            message: "Starting repository deployment workflow".to_string(),
            container_name,
            steps: ["cloning", "detecting", "building", "deploying"],
        }),
    ))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineAccepted {
    pub message: &'static str,
    pub pipeline_id: Uuid,
    pub container_name: String,
    pub repo_url: String,
    pub branch: Option<String>,
}

/// POST /api/pipeline/execute
pub async fn execute_pipeline(
    State(state): State<AppState>,
    Json(request): Json<PipelineRequest>,
) -> ApiResult<(StatusCode, Json<PipelineAccepted>)> {
    required(&request.repo_url, "repoUrl")?;
    required(&request.workload_name, "containerName")?;
    let container_name = request.workload_name.clone();
    let repo_url = request.repo_url.clone();
    let branch = request.branch.clone();
    let ticket = state.sequencer.spawn(request)?;
    metrics::counter!("api.pipelines_started").increment(1);
    Ok((
        StatusCode::ACCEPTED,
        Json(PipelineAccepted {
            message: "Pipeline started",
            pipeline_id: ticket.pipeline_id,
            container_name,
            repo_url,
            branch,
        }),
    ))
}

/// GET /api/pipeline/runs/:id
pub async fn pipeline_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineRun>> {
    state
        .sequencer
        .get_run(id)
        .map(Json)
        .ok_or_else(|| FaultlineError::NotFound(format!("pipeline run {id}")).into())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineLogsResponse {
    pub success: bool,
    pub container_name: String,
    pub logs: Vec<String>,
    pub log_count: usize,
}

/// GET /api/pipeline/logs/:name: step log of the latest run.
pub async fn pipeline_logs(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<PipelineLogsResponse> {
    let logs = state.sequencer.latest_logs(&name).unwrap_or_default();
    Json(PipelineLogsResponse {
        success: true,
        container_name: name,
        log_count: logs.len(),
        logs,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineHistoryResponse {
    pub success: bool,
    pub container_name: String,
    pub executions: Vec<TimelineEvent>,
    pub total_executions: usize,
}

/// GET /api/pipeline/history/:name
pub async fn pipeline_history(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<PipelineHistoryResponse>> {
    let executions = state.sequencer.history(&name).await?;
    Ok(Json(PipelineHistoryResponse {
        success: true,
        container_name: name,
        total_executions: executions.len(),
        executions,
    }))
}
