//! Failure injection and timeline endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use faultline_chaos::{DetectorInfo, InjectionReceipt};
use faultline_timeline::TimelineSummary;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::rest::{required, ApiResult, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillRequest {
    #[serde(default)]
    pub container_name: String,
    #[serde(default, alias = "delayMs")]
    pub delay: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyRequest {
    #[serde(default)]
    pub container_name: String,
    pub latency_ms: Option<u64>,
    #[serde(alias = "durationMs")]
    pub duration: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRequest {
    #[serde(default)]
    pub container_name: String,
    pub memory_limit: Option<String>,
    #[serde(alias = "durationMs")]
    pub duration: Option<u64>,
}

#[derive(Serialize)]
pub struct InjectionResponse {
    pub success: bool,
    #[serde(flatten)]
    pub receipt: InjectionReceipt,
}

impl From<InjectionReceipt> for InjectionResponse {
    fn from(receipt: InjectionReceipt) -> Self {
        Self {
            success: true,
            receipt,
        }
    }
}

/// POST /api/failures/kill: waits out the delay, kills, starts detection.
pub async fn inject_kill(
    State(state): State<AppState>,
    Json(request): Json<KillRequest>,
) -> ApiResult<(StatusCode, Json<InjectionResponse>)> {
    required(&request.container_name, "containerName")?;
    let receipt = state
        .injector
        .inject_kill(&request.container_name, request.delay)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(receipt.into())))
}

/// POST /api/failures/latency
pub async fn inject_latency(
    State(state): State<AppState>,
    Json(request): Json<LatencyRequest>,
) -> ApiResult<(StatusCode, Json<InjectionResponse>)> {
    required(&request.container_name, "containerName")?;
    let receipt = state
        .injector
        .inject_latency(&request.container_name, request.latency_ms, request.duration)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(receipt.into())))
}

/// POST /api/failures/memory
pub async fn inject_memory(
    State(state): State<AppState>,
    Json(request): Json<MemoryRequest>,
) -> ApiResult<(StatusCode, Json<InjectionResponse>)> {
    required(&request.container_name, "containerName")?;
    let receipt = state
        .injector
        .inject_memory(&request.container_name, request.memory_limit, request.duration)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(receipt.into())))
}

#[derive(Serialize)]
pub struct TimelineResponse {
    pub success: bool,
    pub timeline: TimelineSummary,
}

/// GET /api/timeline/:name
pub async fn timeline(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<TimelineResponse>> {
    let timeline = state.injector.timeline(&name).await?;
    Ok(Json(TimelineResponse {
        success: true,
        timeline,
    }))
}

/// DELETE /api/timeline/:name
pub async fn clear_timeline(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.injector.clear_timeline(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelinesResponse {
    pub success: bool,
    pub timelines: BTreeMap<String, TimelineSummary>,
    pub active_detectors: Vec<DetectorInfo>,
}

/// GET /api/timelines
pub async fn all_timelines(State(state): State<AppState>) -> ApiResult<Json<TimelinesResponse>> {
    let timelines = state.injector.all_timelines().await?;
    Ok(Json(TimelinesResponse {
        success: true,
        timelines,
        active_detectors: state.injector.active_detectors(),
    }))
}
