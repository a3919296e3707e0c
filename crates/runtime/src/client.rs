use async_trait::async_trait;
use chrono::{DateTime, Utc};
use faultline_core::FaultlineResult;
use serde::{Deserialize, Serialize};

/// Point-in-time state of one container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerState {
    pub id: String,
    pub name: String,
    pub status: String,
    pub running: bool,
    pub exit_code: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub image_ref: String,
}

/// One row of a container listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateOptions {
    /// `KEY=value` pairs.
    #[serde(default)]
    pub env: Vec<String>,
    /// `host:container` port mappings.
    #[serde(default)]
    pub ports: Vec<String>,
}

/// Container runtime operations. Missing containers surface as
/// `FaultlineError::NotFound`, every other runtime failure as
/// `FaultlineError::ExternalTool` (or `Timeout`).
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn inspect(&self, name: &str) -> FaultlineResult<ContainerState>;

    async fn kill(&self, name: &str) -> FaultlineResult<()>;

    async fn start(&self, name: &str) -> FaultlineResult<()>;

    async fn stop(&self, name: &str, grace_secs: u32) -> FaultlineResult<()>;

    async fn remove(&self, name: &str, force: bool) -> FaultlineResult<()>;

    /// Create and start a container named `name` from `image`.
    async fn create(
        &self,
        image: &str,
        name: &str,
        options: &CreateOptions,
    ) -> FaultlineResult<ContainerHandle>;

    /// Last `tail_lines` lines of combined stdout/stderr.
    async fn logs(&self, name: &str, tail_lines: u32) -> FaultlineResult<String>;

    async fn list(&self, all: bool) -> FaultlineResult<Vec<ContainerSummary>>;

    async fn pull(&self, image: &str) -> FaultlineResult<()>;

    async fn exists(&self, name: &str) -> FaultlineResult<bool> {
        match self.inspect(name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
