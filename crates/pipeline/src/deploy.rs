use chrono::{DateTime, Utc};
use faultline_core::clock::Clock;
use faultline_core::config::PipelineConfig;
use faultline_core::types::{DeploymentEvent, DeploymentMetadata, FailureStatus, TimelineEvent};
use faultline_core::{FaultlineError, FaultlineResult};
use faultline_runtime::{ContainerHandle, ContainerRuntime, CreateOptions};
use faultline_scm::Toolchain;
use faultline_timeline::TimelineStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::image_name;
use crate::sequencer::{PipelineRequest, Target};

/// Result of a repository deployment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployOutcome {
    pub workload: String,
    pub container_id: String,
    pub image_name: String,
    pub repo_url: String,
    pub branch: String,
    pub timestamp: DateTime<Utc>,
}

/// Direct deployments: a prebuilt image, or a repository built without the
/// lint/test/smoke steps of the full pipeline.
pub struct Deployer {
    toolchain: Arc<dyn Toolchain>,
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<dyn TimelineStore>,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
}

impl Deployer {
    pub fn new(
        toolchain: Arc<dyn Toolchain>,
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<dyn TimelineStore>,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            toolchain,
            runtime,
            store,
            clock,
            config,
        }
    }

    /// Pull `image` and run it as `name`.
    pub async fn deploy_image(&self, image: &str, name: &str) -> FaultlineResult<ContainerHandle> {
        if image.trim().is_empty() || name.trim().is_empty() {
            return Err(FaultlineError::Validation(
                "image and containerName are required".into(),
            ));
        }
        self.ensure_free(name).await?;
        info!(workload = %name, image = %image, "Deploying image");
        self.runtime.pull(image).await?;
        let handle = self
            .runtime
            .create(image, name, &CreateOptions::default())
            .await?;
        info!(workload = %name, container_id = %handle.id, "Container deployed");
        Ok(handle)
    }

    /// Clone, build and run a repository, then record a deployment event.
    pub async fn deploy_from_repo(&self, request: PipelineRequest) -> FaultlineResult<DeployOutcome> {
        let target = Target::resolve(&request, &self.config.default_branch)?;
        self.ensure_free(&target.workload).await?;
        self.deploy_target(target).await
    }

    /// Check the name now; clone, build and deploy on a background task. A
    /// failure is logged and recorded as a `failed` deployment event.
    pub async fn spawn_from_repo(self: &Arc<Self>, request: PipelineRequest) -> FaultlineResult<()> {
        let target = Target::resolve(&request, &self.config.default_branch)?;
        self.ensure_free(&target.workload).await?;

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let workload = target.workload.clone();
            let repo_url = target.repo_url.clone();
            let branch = target.branch.clone();
            if let Err(e) = this.deploy_target(target).await {
                error!(workload = %workload, error = %e, "Repository deployment failed");
                metrics::counter!("pipeline.deploy_failures").increment(1);
                let event = TimelineEvent::GithubDeployment(DeploymentEvent {
                    timestamp: this.clock.now(),
                    status: FailureStatus::Failed,
                    metadata: DeploymentMetadata {
                        image_name: image_name(&this.config.image_prefix, &workload),
                        repo_url,
                        branch,
                        build_log: String::new(),
                        error: Some(e.to_string()),
                    },
                });
                if let Err(e) = this.store.append_event(&workload, event).await {
                    error!(workload = %workload, error = %e, "Failed to record deployment failure");
                }
            }
        });
        Ok(())
    }

    async fn deploy_target(&self, target: Target) -> FaultlineResult<DeployOutcome> {
        info!(workload = %target.workload, repo = %target.repo_url, branch = %target.branch, "Deploying from repository");
        let workspace = self
            .toolchain
            .clone_repo(
                &target.repo_url,
                &target.branch,
                1,
                Duration::from_millis(self.config.clone_timeout_ms),
            )
            .await?;
        let descriptor = self
            .toolchain
            .locate_build_descriptor(&workspace, &self.config.descriptor_candidates)
            .await?;
        let image = image_name(&self.config.image_prefix, &target.workload);
        let built = self
            .toolchain
            .build(
                &workspace,
                &descriptor,
                &image,
                Duration::from_millis(self.config.build_timeout_ms),
            )
            .await?;
        let handle = self
            .runtime
            .create(&built.image_tag, &target.workload, &CreateOptions::default())
            .await?;

        let timestamp = self.clock.now();
        let event = TimelineEvent::GithubDeployment(DeploymentEvent {
            timestamp,
            status: FailureStatus::Executed,
            metadata: DeploymentMetadata {
                repo_url: target.repo_url.clone(),
                branch: target.branch.clone(),
                image_name: built.image_tag.clone(),
                build_log: built.build_output,
                error: None,
            },
        });
        if let Err(e) = self.store.append_event(&target.workload, event).await {
            error!(workload = %target.workload, error = %e, "Failed to record deployment");
        }
        info!(workload = %target.workload, image = %built.image_tag, "Repository deployed");

        Ok(DeployOutcome {
            workload: target.workload,
            container_id: handle.id,
            image_name: built.image_tag,
            repo_url: target.repo_url,
            branch: target.branch,
            timestamp,
        })
    }

    async fn ensure_free(&self, name: &str) -> FaultlineResult<()> {
        if self.runtime.exists(name).await? {
            return Err(FaultlineError::Conflict(format!(
                "container {name} already exists"
            )));
        }
        Ok(())
    }
}
