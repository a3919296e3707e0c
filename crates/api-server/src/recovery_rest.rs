//! Auto-recovery control and reporting endpoints.

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use faultline_core::types::{RecoveryMetric, RecoveryOptions, RecoveryStrategy, TimelineEvent};
use faultline_recovery::{ProcessInfo, RecoveryReport, SliMetrics, StartOutcome};
use faultline_runtime::ContainerState;
use serde::{Deserialize, Serialize};

use crate::rest::{required, ApiResult, AppState};

/// Optional overrides of the configured recovery defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryOverrides {
    #[serde(alias = "healthCheckIntervalMs")]
    pub health_check_interval: Option<u64>,
    pub max_retries: Option<u32>,
    #[serde(alias = "retryDelayMs")]
    pub retry_delay: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRecoveryRequest {
    #[serde(default)]
    pub container_name: String,
    pub strategy: Option<String>,
    #[serde(default)]
    pub options: RecoveryOverrides,
}

impl StartRecoveryRequest {
    fn resolve(&self, defaults: RecoveryOptions) -> ApiResult<RecoveryOptions> {
        let strategy = match self.strategy.as_deref() {
            Some(s) => s.parse::<RecoveryStrategy>()?,
            None => defaults.strategy,
        };
        Ok(RecoveryOptions {
            strategy,
            health_check_interval_ms: self
                .options
                .health_check_interval
                .unwrap_or(defaults.health_check_interval_ms),
            max_retries: self.options.max_retries.unwrap_or(defaults.max_retries),
            retry_delay_ms: self.options.retry_delay.unwrap_or(defaults.retry_delay_ms),
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRecoveryResponse {
    pub success: bool,
    pub message: String,
    pub container_name: String,
    pub outcome: StartOutcome,
    pub options: RecoveryOptions,
}

/// POST /api/recovery/start: starts monitoring and records the options as the policy.
pub async fn start_recovery(
    State(state): State<AppState>,
    Json(request): Json<StartRecoveryRequest>,
) -> ApiResult<Json<StartRecoveryResponse>> {
    required(&request.container_name, "containerName")?;
    let options = request.resolve(state.controller.default_options())?;
    let name = request.container_name;

    let outcome = state.controller.start_auto_recovery(&name, options.clone())?;
    state.controller.register_policy(&name, options.clone());
    let message = match outcome {
        StartOutcome::Started => format!("Auto-recovery started for {name}"),
        StartOutcome::AlreadyActive => format!("Auto-recovery already active for {name}"),
    };
    Ok(Json(StartRecoveryResponse {
        success: true,
        message,
        container_name: name,
        outcome,
        options,
    }))
}

#[derive(Serialize)]
pub struct StopRecoveryResponse {
    pub success: bool,
    pub stopped: bool,
    pub message: String,
}

/// POST /api/recovery/stop/:name
pub async fn stop_recovery(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<StopRecoveryResponse> {
    let stopped = state.controller.stop_auto_recovery(&name);
    Json(StopRecoveryResponse {
        success: true,
        stopped,
        message: format!("Auto-recovery stopped for {name}"),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryMetricsResponse {
    pub success: bool,
    pub container_name: String,
    pub metrics: SliMetrics,
    pub history: Vec<RecoveryMetric>,
    pub report: RecoveryReport,
}

/// GET /api/recovery/metrics/:name
pub async fn recovery_metrics(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<RecoveryMetricsResponse> {
    let report = state.controller.report(&name);
    Json(RecoveryMetricsResponse {
        success: true,
        metrics: report.metrics.clone(),
        history: state.controller.metrics(&name),
        container_name: name,
        report,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRecoveriesResponse {
    pub success: bool,
    pub active_recoveries: Vec<ProcessInfo>,
    pub count: usize,
}

/// GET /api/recovery/active
pub async fn active_recoveries(State(state): State<AppState>) -> Json<ActiveRecoveriesResponse> {
    let active = state.controller.active_processes();
    Json(ActiveRecoveriesResponse {
        success: true,
        count: active.len(),
        active_recoveries: active,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryHistoryResponse {
    pub success: bool,
    pub container_name: String,
    pub recovery_events: Vec<TimelineEvent>,
    pub total_events: usize,
}

/// GET /api/recovery/history/:name
pub async fn recovery_history(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<RecoveryHistoryResponse>> {
    let events = state.controller.recovery_history(&name).await?;
    Ok(Json(RecoveryHistoryResponse {
        success: true,
        container_name: name,
        total_events: events.len(),
        recovery_events: events,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSummary {
    pub status: &'static str,
    pub success_rate: f64,
    #[serde(rename = "avgMTTRMs")]
    pub avg_mttr_ms: u64,
    pub recommendations: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringReport {
    pub container_name: String,
    pub timestamp: DateTime<Utc>,
    pub health: ContainerState,
    pub sli_metrics: SliMetrics,
    pub pipeline_executions: usize,
    pub recovery_events: usize,
    pub summary: MonitoringSummary,
}

/// GET /api/report/monitoring/:name
pub async fn monitoring_report(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<MonitoringReport>> {
    let health = state.runtime.inspect(&name).await?;
    let pipeline_executions = state.sequencer.history(&name).await?.len();
    let recovery_events = state.controller.recovery_history(&name).await?.len();
    let report = state.controller.report(&name);

    Ok(Json(MonitoringReport {
        summary: MonitoringSummary {
            status: if health.running { "running" } else { "stopped" },
            success_rate: report.metrics.success_rate,
            avg_mttr_ms: report.metrics.avg_mttr_ms,
            recommendations: report.recommendations,
        },
        container_name: name,
        timestamp: Utc::now(),
        health,
        sli_metrics: report.metrics,
        pipeline_executions,
        recovery_events,
    }))
}
