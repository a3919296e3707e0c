use async_trait::async_trait;
use faultline_core::{FaultlineError, FaultlineResult};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

use crate::checks::{CheckCommand, ProjectChecks};

/// A cloned working copy. The directory is deleted when the workspace is
/// dropped.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    _dir: TempDir,
}

impl Workspace {
    /// Fresh empty directory under `root` (created if missing).
    pub fn create_in(root: impl AsRef<Path>) -> FaultlineResult<Self> {
        std::fs::create_dir_all(root.as_ref())?;
        let dir = tempfile::Builder::new()
            .prefix("faultline-ci-")
            .tempdir_in(root)?;
        Ok(Self {
            path: dir.path().to_path_buf(),
            _dir: dir,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    pub image_tag: String,
    pub build_output: String,
}

/// First candidate (relative to the workspace) that exists, in order.
pub async fn locate_build_descriptor(
    workspace: &Workspace,
    candidates: &[String],
) -> FaultlineResult<PathBuf> {
    for candidate in candidates {
        let path = workspace.path().join(candidate);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(path);
        }
    }
    Err(FaultlineError::NotFound(format!(
        "no build descriptor found in repository (checked: {})",
        candidates.join(", ")
    )))
}

/// Source control and image build operations used by the pipeline.
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Clone `branch` of `url` into a new workspace, limited to `depth`
    /// commits.
    async fn clone_repo(
        &self,
        url: &str,
        branch: &str,
        depth: u32,
        timeout: Duration,
    ) -> FaultlineResult<Workspace>;

    async fn locate_build_descriptor(
        &self,
        workspace: &Workspace,
        candidates: &[String],
    ) -> FaultlineResult<PathBuf> {
        locate_build_descriptor(workspace, candidates).await
    }

    async fn detect_checks(
        &self,
        workspace: &Workspace,
        lint_override: Option<&str>,
        test_override: Option<&str>,
    ) -> ProjectChecks {
        ProjectChecks::detect(workspace.path(), lint_override, test_override).await
    }

    /// Run a lint or test command inside the workspace; returns its output.
    async fn run_check(
        &self,
        workspace: &Workspace,
        check: &CheckCommand,
        timeout: Duration,
    ) -> FaultlineResult<String>;

    async fn build(
        &self,
        workspace: &Workspace,
        descriptor: &Path,
        image_tag: &str,
        timeout: Duration,
    ) -> FaultlineResult<BuildOutput>;
}
