//! Shallow clones, build descriptor lookup, lint/test checks and image builds.

pub mod checks;
pub mod command;
pub mod git;
pub mod memory;
pub mod toolchain;
pub mod url;

pub use checks::{CheckCommand, ProjectChecks};
pub use git::GitDockerToolchain;
pub use memory::InMemoryToolchain;
pub use toolchain::{locate_build_descriptor, BuildOutput, Toolchain, Workspace};
pub use url::{normalize_repo_url, repo_name};
