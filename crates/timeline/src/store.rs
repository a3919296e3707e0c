use async_trait::async_trait;
use faultline_core::config::{StorageBackend, StorageConfig};
use faultline_core::types::{FailureStatus, TimelineEvent, Timelines};
use faultline_core::FaultlineResult;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::memory::MemoryStore;
use crate::sharded::ShardedJsonStore;

/// Append-only, per-workload event log.
#[async_trait]
pub trait TimelineStore: Send + Sync {
    /// Every workload's timeline.
    async fn load(&self) -> FaultlineResult<Timelines>;

    /// Replace the whole store with `timelines`.
    async fn save(&self, timelines: &Timelines) -> FaultlineResult<()>;

    /// Append one event to the end of `workload`'s timeline.
    async fn append_event(&self, workload: &str, event: TimelineEvent) -> FaultlineResult<()>;

    /// Events for one workload in insertion order; empty if none were recorded.
    async fn events(&self, workload: &str) -> FaultlineResult<Vec<TimelineEvent>>;

    /// Drop a workload's timeline.
    async fn clear(&self, workload: &str) -> FaultlineResult<()>;
}

/// Build the store selected by configuration.
pub async fn open_store(config: &StorageConfig) -> FaultlineResult<Arc<dyn TimelineStore>> {
    match config.backend {
        StorageBackend::Sharded => {
            let store = ShardedJsonStore::open(&config.data_dir).await?;
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            info!("Using in-memory timeline store; events are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Timeline plus failure/recovery counts, as served to dashboards.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineSummary {
    pub workload: String,
    pub events: Vec<TimelineEvent>,
    pub total_failures: usize,
    pub total_recoveries: usize,
}

impl TimelineSummary {
    pub fn from_events(workload: impl Into<String>, events: Vec<TimelineEvent>) -> Self {
        let count = |status: FailureStatus| {
            events
                .iter()
                .filter(|e| e.failure_status() == Some(status))
                .count()
        };
        let total_failures = count(FailureStatus::Executed);
        let total_recoveries = count(FailureStatus::Recovered);

        Self {
            workload: workload.into(),
            events,
            total_failures,
            total_recoveries,
        }
    }
}
