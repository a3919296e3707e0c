//! Process-local timeline store for tests and throwaway runs.

use async_trait::async_trait;
use faultline_core::types::{TimelineEvent, Timelines};
use faultline_core::FaultlineResult;
use parking_lot::Mutex;

use crate::store::TimelineStore;

#[derive(Debug, Default)]
pub struct MemoryStore {
    timelines: Mutex<Timelines>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TimelineStore for MemoryStore {
    async fn load(&self) -> FaultlineResult<Timelines> {
        Ok(self.timelines.lock().clone())
    }

    async fn save(&self, timelines: &Timelines) -> FaultlineResult<()> {
        *self.timelines.lock() = timelines.clone();
        Ok(())
    }

    async fn append_event(&self, workload: &str, event: TimelineEvent) -> FaultlineResult<()> {
        self.timelines
            .lock()
            .entry(workload.to_string())
            .or_default()
            .push(event);
        Ok(())
    }

    async fn events(&self, workload: &str) -> FaultlineResult<Vec<TimelineEvent>> {
        Ok(self
            .timelines
            .lock()
            .get(workload)
            .cloned()
            .unwrap_or_default())
    }

    async fn clear(&self, workload: &str) -> FaultlineResult<()> {
        self.timelines.lock().remove(workload);
        Ok(())
    }
}
