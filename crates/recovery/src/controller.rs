//! Auto-recovery controller.
//!
//! Each monitored workload gets one task that polls health every
//! `health_check_interval_ms`. Every unhealthy poll triggers the configured
//! strategy until `max_retries` attempts have been spent. Every healthy poll
//! after one or more attempts records a recovered metric. An unhealthy poll
//! with the budget exhausted records a failed metric and ends the monitor
//! for good.
//! A health check error is logged and the tick is skipped.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use faultline_core::clock::{Clock, TaskHandle, Ticker};
use faultline_core::config::RecoveryConfig;
use faultline_core::types::{
    AttemptOutcome, RecoveryAttempt, RecoveryMetric, RecoveryOptions, RecoveryPolicy,
    RecoveryStrategy, TimelineEvent,
};
use faultline_core::{FaultlineError, FaultlineResult};
use faultline_runtime::ContainerRuntime;
use faultline_timeline::TimelineStore;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::report::RecoveryReport;
use crate::sli::{MetricHistory, SliMetrics};
use crate::strategy::{StrategyExecutor, StrategyOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    AlreadyActive,
}

/// A live monitor, as listed by the API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub workload: String,
    pub strategy: RecoveryStrategy,
    pub start_time: DateTime<Utc>,
    pub uptime_ms: u64,
    pub retry_count: u32,
}

struct ActiveProcess {
    generation: u64,
    strategy: RecoveryStrategy,
    start_time: DateTime<Utc>,
    retry_count: Arc<AtomicU32>,
    handle: TaskHandle,
}

/// Everything a monitor task needs, cloned out of the controller.
struct Monitor {
    workload: String,
    generation: u64,
    options: RecoveryOptions,
    start_time: DateTime<Utc>,
    retry_count: Arc<AtomicU32>,
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<dyn TimelineStore>,
    clock: Arc<dyn Clock>,
    executor: Arc<StrategyExecutor>,
    history: Arc<MetricHistory>,
    processes: Arc<DashMap<String, ActiveProcess>>,
}

pub struct RecoveryController {
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<dyn TimelineStore>,
    clock: Arc<dyn Clock>,
    executor: Arc<StrategyExecutor>,
    history: Arc<MetricHistory>,
    processes: Arc<DashMap<String, ActiveProcess>>,
    policies: DashMap<String, RecoveryPolicy>,
    defaults: RecoveryOptions,
    next_generation: AtomicU64,
}

impl RecoveryController {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<dyn TimelineStore>,
        clock: Arc<dyn Clock>,
        config: &RecoveryConfig,
    ) -> Self {
        Self {
            executor: Arc::new(StrategyExecutor::new(runtime.clone(), config.stop_grace_secs)),
            runtime,
            store,
            clock,
            history: Arc::new(MetricHistory::new(config.metric_history_cap)),
            processes: Arc::new(DashMap::new()),
            policies: DashMap::new(),
            defaults: RecoveryOptions {
                health_check_interval_ms: config.health_check_interval_ms,
                max_retries: config.max_retries,
                retry_delay_ms: config.retry_delay_ms,
                ..RecoveryOptions::default()
            },
            next_generation: AtomicU64::new(1),
        }
    }

    /// Options used for any field a caller leaves out.
    pub fn default_options(&self) -> RecoveryOptions {
        self.defaults.clone()
    }

    /// Begin monitoring `workload`. A second start for the same workload is
    /// a no-op reported as [`StartOutcome::AlreadyActive`].
    pub fn start_auto_recovery(
        &self,
        workload: &str,
        options: RecoveryOptions,
    ) -> FaultlineResult<StartOutcome> {
        if workload.trim().is_empty() {
            return Err(FaultlineError::Validation("containerName is required".into()));
        }
        if options.health_check_interval_ms == 0 {
            return Err(FaultlineError::Validation(
                "healthCheckIntervalMs must be greater than zero".into(),
            ));
        }

        match self.processes.entry(workload.to_string()) {
            Entry::Occupied(_) => {
                warn!(workload = %workload, "Auto-recovery already active");
                Ok(StartOutcome::AlreadyActive)
            }
            Entry::Vacant(slot) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let start_time = self.clock.now();
                let retry_count = Arc::new(AtomicU32::new(0));
                let strategy = options.strategy;

                let monitor = Monitor {
                    workload: workload.to_string(),
                    generation,
                    options,
                    start_time,
                    retry_count: retry_count.clone(),
                    runtime: self.runtime.clone(),
                    store: self.store.clone(),
                    clock: self.clock.clone(),
                    executor: self.executor.clone(),
                    history: self.history.clone(),
                    processes: self.processes.clone(),
                };
                let handle = TaskHandle::spawn(monitor.run());

                slot.insert(ActiveProcess {
                    generation,
                    strategy,
                    start_time,
                    retry_count,
                    handle,
                });
                info!(workload = %workload, strategy = %strategy, "Auto-recovery started");
                Ok(StartOutcome::Started)
            }
        }
    }

    /// Cancel the monitor for `workload`; false if none was running.
    pub fn stop_auto_recovery(&self, workload: &str) -> bool {
        match self.processes.remove(workload) {
            Some((_, process)) => {
                process.handle.cancel();
                info!(workload = %workload, "Auto-recovery stopped");
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let names: Vec<String> = self.processes.iter().map(|p| p.key().clone()).collect();
        for name in names {
            self.stop_auto_recovery(&name);
        }
    }

    pub fn is_active(&self, workload: &str) -> bool {
        self.processes.contains_key(workload)
    }

    pub fn active_processes(&self) -> Vec<ProcessInfo> {
        let now = self.clock.now();
        let mut list: Vec<ProcessInfo> = self
            .processes
            .iter()
            .map(|p| ProcessInfo {
                workload: p.key().clone(),
                strategy: p.strategy,
                start_time: p.start_time,
                uptime_ms: (now - p.start_time).num_milliseconds().max(0) as u64,
                retry_count: p.retry_count.load(Ordering::Relaxed),
            })
            .collect();
        list.sort_by(|a, b| a.workload.cmp(&b.workload));
        list
    }

    /// Replace the policy for `workload`.
    pub fn register_policy(&self, workload: &str, options: RecoveryOptions) -> RecoveryPolicy {
        let policy = RecoveryPolicy {
            strategy: options.strategy,
            options,
            created_at: self.clock.now(),
        };
        self.policies.insert(workload.to_string(), policy.clone());
        info!(workload = %workload, strategy = %policy.strategy, "Recovery policy registered");
        policy
    }

    pub fn policy(&self, workload: &str) -> Option<RecoveryPolicy> {
        self.policies.get(workload).map(|p| p.clone())
    }

    /// Recorded metrics, oldest first.
    pub fn metrics(&self, workload: &str) -> Vec<RecoveryMetric> {
        self.history.get(workload)
    }

    pub fn sli(&self, workload: &str) -> SliMetrics {
        self.history.sli(workload)
    }

    pub fn report(&self, workload: &str) -> RecoveryReport {
        RecoveryReport::new(workload, self.policy(workload), self.sli(workload))
    }

    /// Persisted `recovery` and `metric` events for `workload`.
    pub async fn recovery_history(&self, workload: &str) -> FaultlineResult<Vec<TimelineEvent>> {
        Ok(self
            .store
            .events(workload)
            .await?
            .into_iter()
            .filter(|e| matches!(e, TimelineEvent::Recovery(_) | TimelineEvent::Metric(_)))
            .collect())
    }
}

impl Monitor {
    async fn run(self) {
        let period = Duration::from_millis(self.options.health_check_interval_ms);
        let max_retries = self.options.max_retries;
        let strategy = self.options.strategy;

        let mut ticker = Ticker::new(period);
        let mut retry_count: u32 = 0;

        loop {
            ticker.tick().await;

            let health = match self.runtime.inspect(&self.workload).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(workload = %self.workload, error = %e, "Auto-recovery health check failed");
                    continue;
                }
            };

            if health.running {
                if retry_count > 0 {
                    let mttr_ms = self.clock.millis_since(self.start_time);
                    self.record_metric(RecoveryMetric {
                        recovered: true,
                        strategy,
                        mttr_ms: Some(mttr_ms),
                        attempts_needed: retry_count,
                        timestamp: self.clock.now(),
                    })
                    .await;
                    info!(workload = %self.workload, mttr_ms, attempts = retry_count, "Workload recovered");
                }
                continue;
            }

            if retry_count >= max_retries {
                self.record_metric(RecoveryMetric {
                    recovered: false,
                    strategy,
                    mttr_ms: None,
                    attempts_needed: retry_count,
                    timestamp: self.clock.now(),
                })
                .await;
                metrics::counter!("recovery.exhausted").increment(1);
                error!(workload = %self.workload, max_retries, "Recovery failed after exhausting retries");
                self.processes
                    .remove_if(&self.workload, |_, p| p.generation == self.generation);
                break;
            }

            retry_count += 1;
            self.retry_count.store(retry_count, Ordering::Relaxed);
            metrics::counter!("recovery.attempts", "strategy" => strategy.as_str()).increment(1);

            let result = self.executor.execute(&self.workload, strategy, &health).await;
            let attempt = match result {
                Ok(StrategyOutcome::Executed) => RecoveryAttempt {
                    timestamp: self.clock.now(),
                    strategy,
                    attempt: retry_count,
                    outcome: AttemptOutcome::Executed,
                    requires_manual_intervention: false,
                    reason: None,
                    error: None,
                },
                Ok(StrategyOutcome::ManualInterventionRequired { reason }) => RecoveryAttempt {
                    timestamp: self.clock.now(),
                    strategy,
                    attempt: retry_count,
                    outcome: AttemptOutcome::ManualInterventionRequired,
                    requires_manual_intervention: true,
                    reason: Some(reason),
                    error: None,
                },
                Err(e) => {
                    error!(workload = %self.workload, attempt = retry_count, error = %e, "Recovery attempt failed");
                    RecoveryAttempt {
                        timestamp: self.clock.now(),
                        strategy,
                        attempt: retry_count,
                        outcome: AttemptOutcome::Failed,
                        requires_manual_intervention: false,
                        reason: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            self.append(TimelineEvent::Recovery(attempt)).await;
        }
    }

    async fn record_metric(&self, metric: RecoveryMetric) {
        self.history.push(&self.workload, metric.clone());
        self.append(TimelineEvent::Metric(metric)).await;
    }

    async fn append(&self, event: TimelineEvent) {
        if let Err(e) = self.store.append_event(&self.workload, event).await {
            warn!(workload = %self.workload, error = %e, "Failed to record recovery event");
        }
    }
}
