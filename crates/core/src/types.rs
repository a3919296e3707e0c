use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::FaultlineError;

// ─── Timeline events ────────────────────────────────────────────────────────

/// Kind of injected failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Kill,
    Latency,
    Memory,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Kill => "kill",
            FailureKind::Latency => "latency",
            FailureKind::Memory => "memory",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a failure event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStatus {
    Scheduled,
    Executed,
    Recovered,
    Failed,
}

/// Metadata attached to a failure event. Which fields are present depends on
/// the failure kind and lifecycle stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A failure lifecycle entry. Append-only; never mutated after write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEvent {
    pub timestamp: DateTime<Utc>,
    pub status: FailureStatus,
    #[serde(default)]
    pub metadata: FailureMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentMetadata {
    pub repo_url: String,
    pub branch: String,
    pub image_name: String,
    #[serde(default)]
    pub build_log: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A workload deployed straight from a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentEvent {
    pub timestamp: DateTime<Utc>,
    pub status: FailureStatus,
    pub metadata: DeploymentMetadata,
}

/// Pipeline outcome as recorded on the workload timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineEvent {
    pub timestamp: DateTime<Utc>,
    pub pipeline_id: Uuid,
    pub status: PipelineStatus,
    pub repo_url: String,
    pub branch: String,
    pub duration_ms: u64,
    pub steps_completed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Executed,
    Failed,
    ManualInterventionRequired,
}

/// One execution of a recovery strategy by the auto-recovery controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryAttempt {
    pub timestamp: DateTime<Utc>,
    pub strategy: RecoveryStrategy,
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub requires_manual_intervention: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Closed event taxonomy persisted on a workload's timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TimelineEvent {
    Kill(FailureEvent),
    Latency(FailureEvent),
    Memory(FailureEvent),
    GithubDeployment(DeploymentEvent),
    Pipeline(PipelineEvent),
    Recovery(RecoveryAttempt),
    Metric(RecoveryMetric),
}

impl TimelineEvent {
    pub fn failure(
        kind: FailureKind,
        timestamp: DateTime<Utc>,
        status: FailureStatus,
        metadata: FailureMetadata,
    ) -> Self {
        let event = FailureEvent {
            timestamp,
            status,
            metadata,
        };
        match kind {
            FailureKind::Kill => TimelineEvent::Kill(event),
            FailureKind::Latency => TimelineEvent::Latency(event),
            FailureKind::Memory => TimelineEvent::Memory(event),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TimelineEvent::Kill(e) | TimelineEvent::Latency(e) | TimelineEvent::Memory(e) => {
                e.timestamp
            }
            TimelineEvent::GithubDeployment(e) => e.timestamp,
            TimelineEvent::Pipeline(e) => e.timestamp,
            TimelineEvent::Recovery(e) => e.timestamp,
            TimelineEvent::Metric(e) => e.timestamp,
        }
    }

    /// Failure kind and payload, for kill/latency/memory events.
    pub fn as_failure(&self) -> Option<(FailureKind, &FailureEvent)> {
        match self {
            TimelineEvent::Kill(e) => Some((FailureKind::Kill, e)),
            TimelineEvent::Latency(e) => Some((FailureKind::Latency, e)),
            TimelineEvent::Memory(e) => Some((FailureKind::Memory, e)),
            _ => None,
        }
    }

    pub fn failure_status(&self) -> Option<FailureStatus> {
        match self {
            TimelineEvent::Kill(e) | TimelineEvent::Latency(e) | TimelineEvent::Memory(e) => {
                Some(e.status)
            }
            TimelineEvent::GithubDeployment(e) => Some(e.status),
            _ => None,
        }
    }
}

/// Every workload's timeline, keyed by workload name.
pub type Timelines = BTreeMap<String, Vec<TimelineEvent>>;

// ─── Recovery ───────────────────────────────────────────────────────────────

/// How the auto-recovery controller repairs an unhealthy workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Graceful stop (if running) then start.
    Restart,
    /// Force-remove and recreate from the same image.
    Rebuild,
    /// Record that an operator has to step in.
    Manual,
}

impl RecoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::Restart => "restart",
            RecoveryStrategy::Rebuild => "rebuild",
            RecoveryStrategy::Manual => "manual",
        }
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecoveryStrategy {
    type Err = FaultlineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "restart" => Ok(RecoveryStrategy::Restart),
            "rebuild" => Ok(RecoveryStrategy::Rebuild),
            "manual" => Ok(RecoveryStrategy::Manual),
            other => Err(FaultlineError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Outcome recorded by the auto-recovery monitor on a healthy or exhausted poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryMetric {
    pub recovered: bool,
    pub strategy: RecoveryStrategy,
    /// Absent for unsuccessful recoveries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mttr_ms: Option<u64>,
    pub attempts_needed: u32,
    pub timestamp: DateTime<Utc>,
}

/// Tunables for a monitored workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryOptions {
    pub strategy: RecoveryStrategy,
    pub health_check_interval_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            strategy: RecoveryStrategy::Restart,
            health_check_interval_ms: 5000,
            max_retries: 3,
            retry_delay_ms: 10_000,
        }
    }
}

/// Active recovery policy for a workload; last write wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryPolicy {
    pub strategy: RecoveryStrategy,
    pub options: RecoveryOptions,
    pub created_at: DateTime<Utc>,
}

// ─── Pipeline ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Success,
    Failed,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// Immutable record of one pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    pub pipeline_id: Uuid,
    pub status: PipelineStatus,
    pub repo_url: String,
    pub workload_name: String,
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub step_log: Vec<String>,
    pub steps_completed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineRun {
    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Success
    }

    /// Condensed form stored on the workload timeline.
    pub fn to_event(&self) -> PipelineEvent {
        PipelineEvent {
            timestamp: self.start_time,
            pipeline_id: self.pipeline_id,
            status: self.status,
            repo_url: self.repo_url.clone(),
            branch: self.branch.clone(),
            duration_ms: self.duration_ms,
            steps_completed: self.steps_completed,
            error: self.error.clone(),
        }
    }
}
