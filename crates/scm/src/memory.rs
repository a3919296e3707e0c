//! Toolchain double: "clones" by writing configured files into a temp
//! workspace and returns scripted check and build outcomes.

use async_trait::async_trait;
use faultline_core::{FaultlineError, FaultlineResult};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::checks::CheckCommand;
use crate::toolchain::{BuildOutput, Toolchain, Workspace};

#[derive(Debug, Default)]
struct Script {
    files: Vec<(String, String)>,
    clone_error: Option<String>,
    build_error: Option<String>,
    failing_checks: Vec<String>,
    clones: Vec<(String, String)>,
    checks_run: Vec<String>,
    builds: Vec<String>,
}

#[derive(Debug)]
pub struct InMemoryToolchain {
    root: PathBuf,
    script: Mutex<Script>,
}

impl InMemoryToolchain {
    /// Workspaces are created under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            script: Mutex::new(Script::default()),
        }
    }

    /// Add a file (path relative to the repository root) to every clone.
    pub fn with_file(self, path: &str, contents: &str) -> Self {
        self.script
            .lock()
            .files
            .push((path.to_string(), contents.to_string()));
        self
    }

    pub fn fail_clone(&self, message: &str) {
        self.script.lock().clone_error = Some(message.to_string());
    }

    pub fn fail_build(&self, message: &str) {
        self.script.lock().build_error = Some(message.to_string());
    }

    /// Make checks whose program is `program` exit non-zero.
    pub fn fail_check(&self, program: &str) {
        self.script.lock().failing_checks.push(program.to_string());
    }

    /// `(url, branch)` of every clone request.
    pub fn clones(&self) -> Vec<(String, String)> {
        self.script.lock().clones.clone()
    }

    pub fn checks_run(&self) -> Vec<String> {
        self.script.lock().checks_run.clone()
    }

    pub fn builds(&self) -> Vec<String> {
        self.script.lock().builds.clone()
    }
}

#[async_trait]
impl Toolchain for InMemoryToolchain {
    async fn clone_repo(
        &self,
        url: &str,
        branch: &str,
        _depth: u32,
        _timeout: Duration,
    ) -> FaultlineResult<Workspace> {
        let (files, clone_error) = {
            let mut script = self.script.lock();
            script.clones.push((url.to_string(), branch.to_string()));
            (script.files.clone(), script.clone_error.clone())
        };
        if let Some(message) = clone_error {
            return Err(FaultlineError::external("git clone", message));
        }

        let workspace = Workspace::create_in(&self.root)?;
        for (rel, contents) in files {
            let path = workspace.path().join(rel);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, contents).await?;
        }
        Ok(workspace)
    }

    async fn run_check(
        &self,
        _workspace: &Workspace,
        check: &CheckCommand,
        _timeout: Duration,
    ) -> FaultlineResult<String> {
        let mut script = self.script.lock();
        script.checks_run.push(check.to_string());
        if script.failing_checks.contains(&check.program) {
            return Err(FaultlineError::external(check.to_string(), "exit status 1"));
        }
        Ok(format!("{check}: ok"))
    }

    async fn build(
        &self,
        _workspace: &Workspace,
        _descriptor: &Path,
        image_tag: &str,
        _timeout: Duration,
    ) -> FaultlineResult<BuildOutput> {
        let mut script = self.script.lock();
        script.builds.push(image_tag.to_string());
        if let Some(message) = &script.build_error {
            return Err(FaultlineError::external("docker build", message.clone()));
        }
        Ok(BuildOutput {
            image_tag: image_tag.to_string(),
            build_output: format!("Successfully tagged {image_tag}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clone_materialises_files() {
        let root = tempfile::tempdir().unwrap();
        let tc = InMemoryToolchain::new(root.path()).with_file("docker/Dockerfile", "FROM scratch");
        let ws = tc
            .clone_repo("acme/web", "main", 1, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(ws.path().join("docker/Dockerfile").exists());
        assert_eq!(tc.clones(), vec![("acme/web".into(), "main".into())]);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let root = tempfile::tempdir().unwrap();
        let tc = InMemoryToolchain::new(root.path());
        tc.fail_check("npm");
        tc.fail_build("no space left on device");

        let ws = tc
            .clone_repo("acme/web", "main", 1, Duration::from_secs(1))
            .await
            .unwrap();
        let check = CheckCommand::new("npm", &["test"]);
        assert!(tc.run_check(&ws, &check, Duration::from_secs(1)).await.is_err());
        let err = tc
            .build(&ws, ws.path(), "faultline-web:latest", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no space left"));
        assert_eq!(tc.builds(), vec!["faultline-web:latest".to_string()]);
    }
}
