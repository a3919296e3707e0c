//! Pipeline sequencer (clone, validate, lint, test, build, deploy, smoke
//! test) and the simpler direct deployment paths.

pub mod deploy;
pub mod sequencer;
pub mod steps;

pub use deploy::{DeployOutcome, Deployer};
pub use sequencer::{PipelineRequest, PipelineSequencer, PipelineTicket};
pub use steps::StepLog;

/// `<prefix>-<workload>:latest`
pub fn image_name(prefix: &str, workload: &str) -> String {
    format!("{prefix}-{workload}:latest")
}
