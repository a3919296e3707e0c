//! Sustained-health recovery detection.
//!
//! One detector per workload polls the runtime on a fixed cadence and
//! declares recovery only after `required` consecutive healthy polls. A poll
//! error counts as unhealthy. Starting a detector for a workload that
//! already has one cancels the old one.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use faultline_core::clock::{Clock, TaskHandle, Ticker};
use faultline_core::config::DetectorConfig;
use faultline_core::types::{FailureKind, FailureMetadata, FailureStatus, TimelineEvent};
use faultline_runtime::ContainerRuntime;
use faultline_timeline::TimelineStore;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Consecutive-healthy counter. Any unhealthy observation resets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthStreak {
    consecutive: u32,
    required: u32,
}

impl HealthStreak {
    pub fn new(required: u32) -> Self {
        Self {
            consecutive: 0,
            required: required.max(1),
        }
    }

    /// Feed one observation; true once the streak reaches the threshold.
    pub fn observe(&mut self, healthy: bool) -> bool {
        if healthy {
            self.consecutive = self.consecutive.saturating_add(1);
        } else {
            self.consecutive = 0;
        }
        self.consecutive >= self.required
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

/// A running detector, as listed by the API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorInfo {
    pub workload: String,
    pub failure_time: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
}

struct ActiveDetector {
    generation: u64,
    info: DetectorInfo,
    handle: TaskHandle,
}

pub struct RecoveryDetector {
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<dyn TimelineStore>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    required_healthy_checks: u32,
    active: Arc<DashMap<String, ActiveDetector>>,
    next_generation: AtomicU64,
}

impl RecoveryDetector {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<dyn TimelineStore>,
        clock: Arc<dyn Clock>,
        config: &DetectorConfig,
    ) -> Self {
        Self {
            runtime,
            store,
            clock,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            required_healthy_checks: config.required_healthy_checks,
            active: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Start watching `workload`, measuring recovery from `failure_time`.
    pub fn start(&self, workload: &str, failure_time: DateTime<Utc>) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let name = workload.to_string();

        let runtime = self.runtime.clone();
        let store = self.store.clone();
        let clock = self.clock.clone();
        let active = self.active.clone();
        let period = self.poll_interval;
        let required = self.required_healthy_checks;

        // The slot stays locked until the entry exists, so the task's own
        // removal always finds it.
        let slot = self.active.entry(name.clone());
        let handle = TaskHandle::spawn({
            let name = name.clone();
            async move {
                let mut ticker = Ticker::new(period);
                let mut streak = HealthStreak::new(required);
                loop {
                    ticker.tick().await;
                    let healthy = match runtime.inspect(&name).await {
                        Ok(state) => state.running,
                        Err(e) => {
                            debug!(workload = %name, error = %e, "Health poll failed");
                            false
                        }
                    };
                    if !streak.observe(healthy) {
                        debug!(
                            workload = %name,
                            streak = streak.consecutive(),
                            required,
                            "Waiting for sustained health"
                        );
                        continue;
                    }

                    let recovery_time = clock.now();
                    let recovery_duration_ms = clock.millis_since(failure_time);
                    let event = TimelineEvent::failure(
                        FailureKind::Kill,
                        recovery_time,
                        FailureStatus::Recovered,
                        FailureMetadata {
                            failure_time: Some(failure_time),
                            recovery_time: Some(recovery_time),
                            recovery_duration_ms: Some(recovery_duration_ms),
                            ..Default::default()
                        },
                    );
                    if let Err(e) = store.append_event(&name, event).await {
                        warn!(workload = %name, error = %e, "Failed to record recovery");
                    }
                    metrics::counter!("chaos.recoveries_detected").increment(1);
                    info!(workload = %name, recovery_duration_ms, "Workload recovered");

                    active.remove_if(&name, |_, d| d.generation == generation);
                    break;
                }
            }
        });

        let detector = ActiveDetector {
            generation,
            info: DetectorInfo {
                workload: name.clone(),
                failure_time,
                started_at: self.clock.now(),
            },
            handle,
        };
        match slot {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.insert(detector);
                previous.handle.cancel();
                info!(workload = %name, "Superseded running recovery detector");
            }
            Entry::Vacant(vacant) => {
                vacant.insert(detector);
            }
        }
        debug!(workload = %name, generation, "Recovery detector started");
    }

    /// Cancel the detector for `workload`; false if none was running.
    pub fn stop(&self, workload: &str) -> bool {
        match self.active.remove(workload) {
            Some((_, detector)) => {
                detector.handle.cancel();
                info!(workload = %workload, "Recovery detector stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, workload: &str) -> bool {
        self.active.contains_key(workload)
    }

    pub fn active(&self) -> Vec<DetectorInfo> {
        let mut list: Vec<DetectorInfo> = self.active.iter().map(|d| d.info.clone()).collect();
        list.sort_by(|a, b| a.workload.cmp(&b.workload));
        list
    }

    pub fn shutdown(&self) {
        let names: Vec<String> = self.active.iter().map(|d| d.key().clone()).collect();
        for name in names {
            self.stop(&name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_core::clock::MonotonicClock;
    use faultline_runtime::{Probe, ScriptedRuntime};
    use faultline_timeline::MemoryStore;
    use proptest::prelude::*;

    fn detector(
        runtime: Arc<ScriptedRuntime>,
        store: Arc<MemoryStore>,
        clock: Arc<MonotonicClock>,
    ) -> RecoveryDetector {
        RecoveryDetector::new(runtime, store, clock, &DetectorConfig::default())
    }

    async fn recovered(store: &MemoryStore, name: &str) -> Vec<FailureMetadata> {
        store
            .events(name)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|e| match e {
                TimelineEvent::Kill(k) if k.status == FailureStatus::Recovered => Some(k.metadata),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_streak_resets_on_unhealthy() {
        let mut streak = HealthStreak::new(3);
        assert!(!streak.observe(true));
        assert!(!streak.observe(true));
        assert!(!streak.observe(false));
        assert_eq!(streak.consecutive(), 0);
        assert!(!streak.observe(true));
        assert!(!streak.observe(true));
        assert!(streak.observe(true));
    }

    proptest! {
        #[test]
        fn prop_streak_fires_iff_last_n_healthy(polls in proptest::collection::vec(any::<bool>(), 1..60)) {
            let required = 5usize;
            let mut streak = HealthStreak::new(required as u32);
            for (i, &healthy) in polls.iter().enumerate() {
                let fired = streak.observe(healthy);
                let window_start = (i + 1).saturating_sub(required);
                let expected = i + 1 >= required && polls[window_start..=i].iter().all(|h| *h);
                prop_assert_eq!(fired, expected);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_after_five_healthy_polls() {
        let runtime = Arc::new(ScriptedRuntime::new().with_container("web1", "nginx", true));
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(MonotonicClock::new());
        let detector = detector(runtime.clone(), store.clone(), clock.clone());

        detector.start("web1", clock.now());
        assert!(detector.is_active("web1"));

        tokio::time::sleep(Duration::from_millis(9_900)).await;
        assert!(recovered(&store, "web1").await.is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let events = recovered(&store, "web1").await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].recovery_duration_ms, Some(10_000));
        assert!(!detector.is_active("web1"));
        assert_eq!(runtime.count(faultline_runtime::RuntimeOp::Inspect), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhealthy_and_error_polls_reset_streak() {
        let runtime = Arc::new(ScriptedRuntime::new().with_container("web1", "nginx", true));
        runtime.script_probes(
            "web1",
            [Probe::Running, Probe::Running, Probe::Stopped, Probe::Running, Probe::Error],
        );
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(MonotonicClock::new());
        let detector = detector(runtime, store.clone(), clock.clone());

        let failure_time = clock.now();
        detector.start("web1", failure_time);

        // Five scripted polls, then five healthy fallback polls.
        tokio::time::sleep(Duration::from_millis(19_000)).await;
        assert!(recovered(&store, "web1").await.is_empty());
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        let events = recovered(&store, "web1").await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].recovery_duration_ms, Some(20_000));
        assert_eq!(events[0].failure_time, Some(failure_time));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_supersedes_previous_detector() {
        let runtime = Arc::new(ScriptedRuntime::new().with_container("web1", "nginx", true));
        let store = Arc::new(MemoryStore::new());
        let detector = detector(runtime, store.clone(), Arc::new(MonotonicClock::new()));

        detector.start("web1", Utc::now());
        tokio::time::sleep(Duration::from_millis(5_000)).await;
        detector.start("web1", Utc::now());
        assert_eq!(detector.active().len(), 1);

        tokio::time::sleep(Duration::from_millis(30_000)).await;
        assert_eq!(recovered(&store, "web1").await.len(), 1);
        assert!(detector.active().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_poll_interval_recovers_and_clears() {
        let runtime = Arc::new(ScriptedRuntime::new().with_container("web1", "nginx", true));
        let store = Arc::new(MemoryStore::new());
        let detector = RecoveryDetector::new(
            runtime,
            store.clone(),
            Arc::new(MonotonicClock::new()),
            &DetectorConfig {
                poll_interval_ms: 0,
                required_healthy_checks: 1,
            },
        );

        detector.start("web1", Utc::now());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(recovered(&store, "web1").await.len(), 1);
        assert!(!detector.is_active("web1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_and_shutdown() {
        let runtime = Arc::new(ScriptedRuntime::new().with_container("web1", "nginx", false));
        let store = Arc::new(MemoryStore::new());
        let detector = detector(runtime, store.clone(), Arc::new(MonotonicClock::new()));

        detector.start("web1", Utc::now());
        detector.start("web2", Utc::now());
        assert!(detector.stop("web1"));
        assert!(!detector.stop("web1"));
        detector.shutdown();
        assert!(detector.active().is_empty());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(store.load().await.unwrap().is_empty());
    }
}
