use chrono::{DateTime, Utc};
use dashmap::DashMap;
use faultline_core::clock::Clock;
use faultline_core::config::PipelineConfig;
use faultline_core::types::{PipelineRun, PipelineStatus, TimelineEvent};
use faultline_core::{FaultlineError, FaultlineResult};
use faultline_runtime::{ContainerRuntime, CreateOptions};
use faultline_scm::{CheckCommand, Toolchain, Workspace};
use faultline_timeline::TimelineStore;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::image_name;
use crate::steps::{excerpt, StepLog};

const RUN_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRequest {
    #[serde(default)]
    pub repo_url: String,
    #[serde(default, alias = "containerName")]
    pub workload_name: String,
    #[serde(default)]
    pub branch: Option<String>,
}

impl PipelineRequest {
    pub fn new(repo_url: &str, workload_name: &str) -> Self {
        Self {
            repo_url: repo_url.to_string(),
            workload_name: workload_name.to_string(),
            branch: None,
        }
    }
}

/// Validated request with the branch resolved.
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub repo_url: String,
    pub workload: String,
    pub branch: String,
}

impl Target {
    pub(crate) fn resolve(request: &PipelineRequest, default_branch: &str) -> FaultlineResult<Self> {
        if request.repo_url.trim().is_empty() {
            return Err(FaultlineError::Validation("repoUrl is required".into()));
        }
        if request.workload_name.trim().is_empty() {
            return Err(FaultlineError::Validation("containerName is required".into()));
        }
        let branch = request
            .branch
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .unwrap_or(default_branch);
        Ok(Self {
            repo_url: request.repo_url.trim().to_string(),
            workload: request.workload_name.trim().to_string(),
            branch: branch.to_string(),
        })
    }
}

/// Handle to a pipeline running in the background.
pub struct PipelineTicket {
    pub pipeline_id: Uuid,
    pub handle: JoinHandle<PipelineRun>,
}

/// Runs the six-step build/deploy/verify sequence for a repository.
///
/// Each run is strictly sequential. Clone, validate, build and deploy are
/// fatal on failure; lint and test failures only produce warnings. Every
/// finished run is persisted to the workload timeline, kept in memory for
/// lookup and published on the run channel.
pub struct PipelineSequencer {
    toolchain: Arc<dyn Toolchain>,
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<dyn TimelineStore>,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
    runs: DashMap<Uuid, PipelineRun>,
    latest_logs: DashMap<String, Vec<String>>,
    events: broadcast::Sender<PipelineRun>,
}

impl PipelineSequencer {
    pub fn new(
        toolchain: Arc<dyn Toolchain>,
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<dyn TimelineStore>,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(RUN_CHANNEL_CAPACITY);
        Self {
            toolchain,
            runtime,
            store,
            clock,
            config,
            runs: DashMap::new(),
            latest_logs: DashMap::new(),
            events,
        }
    }

    /// Run the pipeline to completion. Invalid input is an error; a run
    /// that fails at some step is returned with status `failed`.
    pub async fn execute(&self, request: PipelineRequest) -> FaultlineResult<PipelineRun> {
        let target = Target::resolve(&request, &self.config.default_branch)?;
        Ok(self.run(Uuid::new_v4(), target).await)
    }

    /// Validate the request and continue the run on a background task.
    pub fn spawn(self: &Arc<Self>, request: PipelineRequest) -> FaultlineResult<PipelineTicket> {
        let target = Target::resolve(&request, &self.config.default_branch)?;
        let pipeline_id = Uuid::new_v4();
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run(pipeline_id, target).await });
        info!(pipeline_id = %pipeline_id, "Pipeline accepted");
        Ok(PipelineTicket { pipeline_id, handle })
    }

    /// Completed runs, in completion order.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineRun> {
        self.events.subscribe()
    }

    pub fn get_run(&self, pipeline_id: Uuid) -> Option<PipelineRun> {
        self.runs.get(&pipeline_id).map(|r| r.value().clone())
    }

    /// Step log of the most recent run for `workload`.
    pub fn latest_logs(&self, workload: &str) -> Option<Vec<String>> {
        self.latest_logs.get(workload).map(|l| l.value().clone())
    }

    /// Pipeline records persisted on the workload timeline.
    pub async fn history(&self, workload: &str) -> FaultlineResult<Vec<TimelineEvent>> {
        let events = self.store.events(workload).await?;
        Ok(events
            .into_iter()
            .filter(|e| matches!(e, TimelineEvent::Pipeline(_)))
            .collect())
    }

    async fn run(&self, pipeline_id: Uuid, target: Target) -> PipelineRun {
        let start_time = self.clock.now();
        let image = image_name(&self.config.image_prefix, &target.workload);
        info!(
            pipeline_id = %pipeline_id,
            workload = %target.workload,
            repo = %target.repo_url,
            branch = %target.branch,
            "Starting pipeline"
        );

        let mut log = StepLog::new(self.clock.clone(), pipeline_id.to_string());
        let mut completed = 0;
        let outcome = self.steps(&target, &image, &mut log, &mut completed).await;

        let run = self.finish(pipeline_id, &target, start_time, log, completed, &image, outcome);
        self.record(&run).await;
        run
    }

    async fn steps(
        &self,
        target: &Target,
        image: &str,
        log: &mut StepLog,
        completed: &mut u32,
    ) -> FaultlineResult<()> {
        let workspace = self
            .toolchain
            .clone_repo(
                &target.repo_url,
                &target.branch,
                1,
                millis(self.config.clone_timeout_ms),
            )
            .await
            .map_err(|e| fatal(&mut *log, 1, "Clone", e))?;
        log.step(1, format!("Repository cloned ({})", target.branch));
        *completed += 1;

        let descriptor = self
            .toolchain
            .locate_build_descriptor(&workspace, &self.config.descriptor_candidates)
            .await
            .map_err(|e| fatal(&mut *log, 2, "Validation", e))?;
        log.step(2, format!("Build descriptor found at {}", descriptor.display()));
        *completed += 1;

        let checks = self
            .toolchain
            .detect_checks(
                &workspace,
                self.config.lint_command.as_deref(),
                self.config.test_command.as_deref(),
            )
            .await;
        self.soft_check(&workspace, 3, "Lint", checks.lint.as_ref(), self.config.lint_timeout_ms, log)
            .await;
        *completed += 1;
        self.soft_check(&workspace, 4, "Tests", checks.test.as_ref(), self.config.test_timeout_ms, log)
            .await;
        *completed += 1;

        let built = self
            .toolchain
            .build(&workspace, &descriptor, image, millis(self.config.build_timeout_ms))
            .await
            .map_err(|e| fatal(&mut *log, 5, "Build", e))?;
        log.step(5, format!("Image built: {}", built.image_tag));
        *completed += 1;

        self.deploy_and_verify(&target.workload, image)
            .await
            .map_err(|e| fatal(&mut *log, 6, "Deploy", e))?;
        log.step(6, format!("Container {} deployed and smoke tests passed", target.workload));
        *completed += 1;

        Ok(())
    }

    /// Run an optional lint/test command; failures are downgraded to a warning.
    async fn soft_check(
        &self,
        workspace: &Workspace,
        step: u32,
        label: &str,
        check: Option<&CheckCommand>,
        timeout_ms: u64,
        log: &mut StepLog,
    ) {
        let Some(check) = check else {
            log.step(step, format!("{label}: not configured, skipped"));
            return;
        };
        match self.toolchain.run_check(workspace, check, millis(timeout_ms)).await {
            Ok(_) => log.step(step, format!("{label} passed ({check})")),
            Err(e) => {
                warn!(check = %check, error = %e, "{label} failed, continuing");
                log.step(step, format!("{label} warnings (non-fatal): {}", excerpt(&e.to_string())));
            }
        }
    }

    async fn deploy_and_verify(&self, workload: &str, image: &str) -> FaultlineResult<()> {
        self.runtime
            .create(image, workload, &CreateOptions::default())
            .await?;

        let state = self.runtime.inspect(workload).await?;
        if !state.running {
            return Err(FaultlineError::external(
                "smoke test",
                "container not running after deployment",
            ));
        }
        let logs = self
            .runtime
            .logs(workload, self.config.smoke_log_lines)
            .await?;
        if logs.trim().is_empty() {
            return Err(FaultlineError::external(
                "smoke test",
                "container produced no log output",
            ));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        pipeline_id: Uuid,
        target: &Target,
        start_time: DateTime<Utc>,
        log: StepLog,
        steps_completed: u32,
        image: &str,
        outcome: FaultlineResult<()>,
    ) -> PipelineRun {
        let end_time = self.clock.now();
        let (status, image_name, error) = match outcome {
            Ok(()) => (PipelineStatus::Success, Some(image.to_string()), None),
            Err(e) => (PipelineStatus::Failed, None, Some(e.to_string())),
        };
        PipelineRun {
            pipeline_id,
            status,
            repo_url: target.repo_url.clone(),
            workload_name: target.workload.clone(),
            branch: target.branch.clone(),
            image_name,
            start_time,
            end_time,
            duration_ms: self.clock.millis_since(start_time),
            step_log: log.into_lines(),
            steps_completed,
            error,
        }
    }

    async fn record(&self, run: &PipelineRun) {
        match &run.error {
            None => info!(
                pipeline_id = %run.pipeline_id,
                workload = %run.workload_name,
                duration_ms = run.duration_ms,
                "Pipeline succeeded"
            ),
            Some(e) => error!(
                pipeline_id = %run.pipeline_id,
                workload = %run.workload_name,
                steps_completed = run.steps_completed,
                error = %e,
                "Pipeline failed"
            ),
        }
        metrics::counter!("pipeline.runs", "status" => run.status.as_str()).increment(1);

        if let Err(e) = self
            .store
            .append_event(&run.workload_name, TimelineEvent::Pipeline(run.to_event()))
            .await
        {
            error!(pipeline_id = %run.pipeline_id, error = %e, "Failed to persist pipeline run");
        }
        self.latest_logs
            .insert(run.workload_name.clone(), run.step_log.clone());
        self.runs.insert(run.pipeline_id, run.clone());
        // No subscribers is fine.
        let _ = self.events.send(run.clone());
    }
}

fn fatal(log: &mut StepLog, step: u32, what: &str, err: FaultlineError) -> FaultlineError {
    log.step(step, format!("{what} failed: {err}"));
    err
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}
