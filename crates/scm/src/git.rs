//! `git` + `docker build` toolchain.

use async_trait::async_trait;
use faultline_core::config::{PipelineConfig, RuntimeConfig};
use faultline_core::FaultlineResult;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::checks::CheckCommand;
use crate::command::run_command;
use crate::toolchain::{BuildOutput, Toolchain, Workspace};
use crate::url::normalize_repo_url;

pub struct GitDockerToolchain {
    git_bin: String,
    docker_bin: String,
    workspace_root: PathBuf,
}

impl GitDockerToolchain {
    pub fn new(pipeline: &PipelineConfig, runtime: &RuntimeConfig) -> Self {
        Self {
            git_bin: pipeline.git_bin.clone(),
            docker_bin: runtime.docker_bin.clone(),
            workspace_root: PathBuf::from(&pipeline.workspace_root),
        }
    }
}

#[async_trait]
impl Toolchain for GitDockerToolchain {
    async fn clone_repo(
        &self,
        url: &str,
        branch: &str,
        depth: u32,
        timeout: Duration,
    ) -> FaultlineResult<Workspace> {
        let url = normalize_repo_url(url)?;
        let workspace = Workspace::create_in(&self.workspace_root)?;
        info!(url = %url, branch = %branch, path = %workspace.path().display(), "Cloning repository");

        let args = vec![
            "clone".to_string(),
            "--depth".to_string(),
            depth.to_string(),
            "--branch".to_string(),
            branch.to_string(),
            url,
            workspace.path().display().to_string(),
        ];
        run_command("git clone", &self.git_bin, &args, None, timeout).await?;
        metrics::counter!("scm.clones").increment(1);
        Ok(workspace)
    }

    async fn run_check(
        &self,
        workspace: &Workspace,
        check: &CheckCommand,
        timeout: Duration,
    ) -> FaultlineResult<String> {
        let output = run_command(
            &check.to_string(),
            &check.program,
            &check.args,
            Some(workspace.path()),
            timeout,
        )
        .await?;
        Ok(output.combined())
    }

    async fn build(
        &self,
        workspace: &Workspace,
        descriptor: &Path,
        image_tag: &str,
        timeout: Duration,
    ) -> FaultlineResult<BuildOutput> {
        info!(image = %image_tag, descriptor = %descriptor.display(), "Building image");
        let args = vec![
            "build".to_string(),
            "-t".to_string(),
            image_tag.to_string(),
            "-f".to_string(),
            descriptor.display().to_string(),
            workspace.path().display().to_string(),
        ];
        let output = run_command("docker build", &self.docker_bin, &args, None, timeout).await?;
        metrics::counter!("scm.builds").increment(1);
        Ok(BuildOutput {
            image_tag: image_tag.to_string(),
            build_output: output.combined(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_core::FaultlineError;

    fn toolchain(root: &Path) -> GitDockerToolchain {
        let mut pipeline = PipelineConfig::default();
        pipeline.git_bin = "/nonexistent/git-binary".into();
        pipeline.workspace_root = root.display().to_string();
        let mut runtime = RuntimeConfig::default();
        runtime.docker_bin = "/nonexistent/docker-binary".into();
        GitDockerToolchain::new(&pipeline, &runtime)
    }

    #[tokio::test]
    async fn test_clone_failure_cleans_workspace() {
        let root = tempfile::tempdir().unwrap();
        let tc = toolchain(root.path());
        let err = tc
            .clone_repo("acme/web", "main", 1, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("git clone failed"));

        let mut entries = std::fs::read_dir(root.path()).unwrap();
        assert!(entries.next().is_none());
    }

    #[tokio::test]
    async fn test_clone_rejects_empty_url() {
        let root = tempfile::tempdir().unwrap();
        let err = toolchain(root.path())
            .clone_repo("", "main", 1, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, FaultlineError::Validation(_)));
    }
}
