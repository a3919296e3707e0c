use chrono::{DateTime, Utc};
use faultline_core::clock::{after, Clock, TaskHandle};
use faultline_core::config::InjectorConfig;
use faultline_core::types::{FailureKind, FailureMetadata, FailureStatus, TimelineEvent};
use faultline_core::{FaultlineError, FaultlineResult};
use faultline_runtime::ContainerRuntime;
use faultline_timeline::{TimelineStore, TimelineSummary};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::detector::{DetectorInfo, RecoveryDetector};

/// Acknowledgement returned to whoever asked for a failure.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectionReceipt {
    pub workload: String,
    pub failure: FailureKind,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub message: String,
}

pub struct FailureInjector {
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<dyn TimelineStore>,
    clock: Arc<dyn Clock>,
    detector: Arc<RecoveryDetector>,
    config: InjectorConfig,
    expiries: Mutex<Vec<TaskHandle>>,
}

impl FailureInjector {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<dyn TimelineStore>,
        clock: Arc<dyn Clock>,
        detector: Arc<RecoveryDetector>,
        config: InjectorConfig,
    ) -> Self {
        Self {
            runtime,
            store,
            clock,
            detector,
            config,
            expiries: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &InjectorConfig {
        &self.config
    }

    /// Kill `workload` after `delay_ms`, then watch for its recovery.
    ///
    /// Recovery is measured from the scheduling time, not the kill. A kill
    /// error is recorded as `failed` and returned.
    pub async fn inject_kill(&self, workload: &str, delay_ms: u64) -> FaultlineResult<InjectionReceipt> {
        validate_name(workload)?;
        let failure_time = self.clock.now();
        info!(workload = %workload, delay_ms, "Scheduling kill failure");

        self.record(
            workload,
            TimelineEvent::failure(
                FailureKind::Kill,
                failure_time,
                FailureStatus::Scheduled,
                FailureMetadata {
                    failure_time: Some(failure_time),
                    delay_ms: Some(delay_ms),
                    ..Default::default()
                },
            ),
        )
        .await;

        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        if let Err(e) = self.runtime.kill(workload).await {
            error!(workload = %workload, error = %e, "Kill failure injection failed");
            self.record(
                workload,
                TimelineEvent::failure(
                    FailureKind::Kill,
                    self.clock.now(),
                    FailureStatus::Failed,
                    FailureMetadata {
                        failure_time: Some(failure_time),
                        error: Some(e.to_string()),
                        ..Default::default()
                    },
                ),
            )
            .await;
            return Err(e);
        }

        self.record(
            workload,
            TimelineEvent::failure(
                FailureKind::Kill,
                self.clock.now(),
                FailureStatus::Executed,
                FailureMetadata {
                    failure_time: Some(failure_time),
                    ..Default::default()
                },
            ),
        )
        .await;
        metrics::counter!("chaos.failures_injected", "kind" => "kill").increment(1);

        self.detector.start(workload, failure_time);

        Ok(InjectionReceipt {
            workload: workload.to_string(),
            failure: FailureKind::Kill,
            timestamp: failure_time,
            latency_ms: None,
            memory_limit: None,
            duration_ms: None,
            message: format!("Kill failure injected on {workload}"),
        })
    }

    /// Announce a latency window. Nothing is throttled; the window simply
    /// expires after `duration_ms`.
    pub async fn inject_latency(
        &self,
        workload: &str,
        latency_ms: Option<u64>,
        duration_ms: Option<u64>,
    ) -> FaultlineResult<InjectionReceipt> {
        validate_name(workload)?;
        let latency_ms = latency_ms.unwrap_or(self.config.default_latency_ms);
        let duration_ms = duration_ms.unwrap_or(self.config.default_duration_ms);
        info!(workload = %workload, latency_ms, duration_ms, "Injecting simulated latency");

        let failure_time = self
            .schedule_window(
                workload,
                FailureKind::Latency,
                FailureMetadata {
                    latency_ms: Some(latency_ms),
                    duration_ms: Some(duration_ms),
                    ..Default::default()
                },
                duration_ms,
            )
            .await;

        Ok(InjectionReceipt {
            workload: workload.to_string(),
            failure: FailureKind::Latency,
            timestamp: failure_time,
            latency_ms: Some(latency_ms),
            memory_limit: None,
            duration_ms: Some(duration_ms),
            message: format!("Latency failure injected on {workload}"),
        })
    }

    /// Announce a memory pressure window; simulated like latency.
    pub async fn inject_memory(
        &self,
        workload: &str,
        memory_limit: Option<String>,
        duration_ms: Option<u64>,
    ) -> FaultlineResult<InjectionReceipt> {
        validate_name(workload)?;
        let memory_limit = memory_limit.unwrap_or_else(|| self.config.default_memory_limit.clone());
        let duration_ms = duration_ms.unwrap_or(self.config.default_duration_ms);
        info!(workload = %workload, memory_limit = %memory_limit, duration_ms, "Injecting simulated memory pressure");

        let failure_time = self
            .schedule_window(
                workload,
                FailureKind::Memory,
                FailureMetadata {
                    memory_limit: Some(memory_limit.clone()),
                    duration_ms: Some(duration_ms),
                    ..Default::default()
                },
                duration_ms,
            )
            .await;

        Ok(InjectionReceipt {
            workload: workload.to_string(),
            failure: FailureKind::Memory,
            timestamp: failure_time,
            latency_ms: None,
            memory_limit: Some(memory_limit),
            duration_ms: Some(duration_ms),
            message: format!("Memory failure injected on {workload}"),
        })
    }

    /// Record `scheduled` now and `recovered` after `duration_ms`.
    async fn schedule_window(
        &self,
        workload: &str,
        kind: FailureKind,
        mut metadata: FailureMetadata,
        duration_ms: u64,
    ) -> DateTime<Utc> {
        let failure_time = self.clock.now();
        metadata.failure_time = Some(failure_time);
        self.record(
            workload,
            TimelineEvent::failure(kind, failure_time, FailureStatus::Scheduled, metadata),
        )
        .await;
        metrics::counter!("chaos.failures_injected", "kind" => kind.as_str()).increment(1);

        let store = self.store.clone();
        let clock = self.clock.clone();
        let name = workload.to_string();
        let handle = after(Duration::from_millis(duration_ms), async move {
            let recovery_time = clock.now();
            let event = TimelineEvent::failure(
                kind,
                recovery_time,
                FailureStatus::Recovered,
                FailureMetadata {
                    failure_time: Some(failure_time),
                    recovery_time: Some(recovery_time),
                    recovery_duration_ms: Some(duration_ms),
                    ..Default::default()
                },
            );
            if let Err(e) = store.append_event(&name, event).await {
                warn!(workload = %name, kind = %kind, error = %e, "Failed to record failure expiry");
            } else {
                info!(workload = %name, kind = %kind, "Simulated failure window expired");
            }
        });

        let mut expiries = self.expiries.lock();
        expiries.retain(|h| !h.is_finished());
        expiries.push(handle);
        failure_time
    }

    pub async fn timeline(&self, workload: &str) -> FaultlineResult<TimelineSummary> {
        let events = self.store.events(workload).await?;
        Ok(TimelineSummary::from_events(workload, events))
    }

    pub async fn all_timelines(&self) -> FaultlineResult<BTreeMap<String, TimelineSummary>> {
        let all = self.store.load().await?;
        Ok(all
            .into_iter()
            .map(|(name, events)| {
                let summary = TimelineSummary::from_events(name.clone(), events);
                (name, summary)
            })
            .collect())
    }

    pub async fn clear_timeline(&self, workload: &str) -> FaultlineResult<()> {
        validate_name(workload)?;
        self.store.clear(workload).await
    }

    pub fn active_detectors(&self) -> Vec<DetectorInfo> {
        self.detector.active()
    }

    /// Cancel detectors and pending expiry timers.
    pub fn shutdown(&self) {
        self.detector.shutdown();
        for handle in self.expiries.lock().drain(..) {
            handle.cancel();
        }
        info!("Failure injector shut down");
    }

    /// Timeline writes never fail the caller.
    async fn record(&self, workload: &str, event: TimelineEvent) {
        if let Err(e) = self.store.append_event(workload, event).await {
            warn!(workload = %workload, error = %e, "Failed to record timeline event");
        }
    }
}

fn validate_name(workload: &str) -> FaultlineResult<()> {
    if workload.trim().is_empty() {
        return Err(FaultlineError::Validation("containerName is required".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_core::clock::MonotonicClock;
    use faultline_core::config::DetectorConfig;
    use faultline_runtime::{RuntimeCall, RuntimeOp, ScriptedRuntime};
    use faultline_timeline::MemoryStore;

    struct Harness {
        runtime: Arc<ScriptedRuntime>,
        store: Arc<MemoryStore>,
        injector: FailureInjector,
    }

    fn harness(runtime: ScriptedRuntime) -> Harness {
        let runtime = Arc::new(runtime);
        let store = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let detector = Arc::new(RecoveryDetector::new(
            runtime.clone(),
            store.clone(),
            clock.clone(),
            &DetectorConfig::default(),
        ));
        let injector = FailureInjector::new(
            runtime.clone(),
            store.clone(),
            clock,
            detector,
            InjectorConfig::default(),
        );
        Harness {
            runtime,
            store,
            injector,
        }
    }

    fn statuses(events: &[TimelineEvent]) -> Vec<(FailureKind, FailureStatus)> {
        events
            .iter()
            .filter_map(|e| e.as_failure().map(|(kind, f)| (kind, f.status)))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_records_scheduled_then_executed_and_starts_detector() {
        let h = harness(ScriptedRuntime::new().with_container("web1", "nginx", true));

        let receipt = h.injector.inject_kill("web1", 0).await.unwrap();
        let events = h.store.events("web1").await.unwrap();
        assert_eq!(
            statuses(&events),
            vec![
                (FailureKind::Kill, FailureStatus::Scheduled),
                (FailureKind::Kill, FailureStatus::Executed),
            ]
        );
        assert_eq!(events[0].timestamp(), receipt.timestamp);
        assert_eq!(h.runtime.is_running("web1"), Some(false));

        let detectors = h.injector.active_detectors();
        assert_eq!(detectors.len(), 1);
        assert_eq!(detectors[0].failure_time, receipt.timestamp);
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_recovery_measured_from_scheduled_time() {
        let h = harness(ScriptedRuntime::new().with_container("web1", "nginx", true));

        let receipt = h.injector.inject_kill("web1", 3_000).await.unwrap();
        // Back up before the first poll, so every poll is healthy.
        h.runtime.set_running("web1", true);

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        let events = h.store.events("web1").await.unwrap();
        let recovered = events
            .iter()
            .filter_map(|e| e.as_failure())
            .find(|(_, f)| f.status == FailureStatus::Recovered)
            .map(|(_, f)| f.metadata.clone())
            .unwrap();
        assert_eq!(recovered.failure_time, Some(receipt.timestamp));
        assert_eq!(recovered.recovery_duration_ms, Some(13_000));
        assert!(h.injector.active_detectors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_error_records_failed_and_propagates() {
        let h = harness(ScriptedRuntime::new());

        let err = h.injector.inject_kill("ghost", 0).await.unwrap_err();
        assert!(err.is_not_found());

        let events = h.store.events("ghost").await.unwrap();
        assert_eq!(
            statuses(&events),
            vec![
                (FailureKind::Kill, FailureStatus::Scheduled),
                (FailureKind::Kill, FailureStatus::Failed),
            ]
        );
        let (_, failed) = events[1].as_failure().unwrap();
        assert!(failed.metadata.error.is_some());
        assert!(h.injector.active_detectors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_window_expires_without_runtime_calls() {
        let h = harness(ScriptedRuntime::new().with_container("web1", "nginx", true));

        h.injector
            .inject_latency("web1", Some(1_000), Some(5_000))
            .await
            .unwrap();
        let events = h.store.events("web1").await.unwrap();
        assert_eq!(
            statuses(&events),
            vec![(FailureKind::Latency, FailureStatus::Scheduled)]
        );

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(h.store.events("web1").await.unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let events = h.store.events("web1").await.unwrap();
        assert_eq!(events.len(), 2);
        let (kind, recovered) = events[1].as_failure().unwrap();
        assert_eq!(kind, FailureKind::Latency);
        assert_eq!(recovered.status, FailureStatus::Recovered);
        assert_eq!(recovered.metadata.recovery_duration_ms, Some(5_000));
        assert_eq!(h.runtime.calls(), Vec::<RuntimeCall>::new());
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_defaults_and_shutdown_cancels_expiry() {
        let h = harness(ScriptedRuntime::new());

        let receipt = h.injector.inject_memory("web1", None, None).await.unwrap();
        assert_eq!(receipt.memory_limit.as_deref(), Some("256m"));
        assert_eq!(receipt.duration_ms, Some(60_000));

        h.injector.shutdown();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.store.events("web1").await.unwrap().len(), 1);
        assert_eq!(h.runtime.count(RuntimeOp::Kill), 0);
    }

    #[tokio::test]
    async fn test_empty_name_is_rejected() {
        let h = harness(ScriptedRuntime::new());
        let err = h.injector.inject_kill("  ", 0).await.unwrap_err();
        assert!(matches!(err, FaultlineError::Validation(_)));
        assert!(h.store.load().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeline_summaries() {
        let h = harness(ScriptedRuntime::new().with_container("web1", "nginx", true));
        h.injector.inject_kill("web1", 0).await.unwrap();
        h.injector.inject_latency("web2", None, Some(1_000)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        let summary = h.injector.timeline("web1").await.unwrap();
        assert_eq!(summary.total_failures, 1);
        assert_eq!(summary.total_recoveries, 0);

        let web2 = h.injector.timeline("web2").await.unwrap();
        assert_eq!(web2.total_failures, 0);
        assert_eq!(web2.total_recoveries, 1);

        let all = h.injector.all_timelines().await.unwrap();
        assert_eq!(all.len(), 2);

        h.injector.clear_timeline("web1").await.unwrap();
        assert!(h.injector.timeline("web1").await.unwrap().events.is_empty());
    }
}
