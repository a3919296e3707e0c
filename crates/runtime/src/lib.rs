//! Container runtime access.
//!
//! [`ContainerRuntime`] is the only way the engines touch containers.
//! [`DockerCli`] drives the `docker` binary; [`ScriptedRuntime`] replays
//! scripted health observations and records every call for tests.

pub mod client;
pub mod docker;
pub mod scripted;

pub use client::{ContainerHandle, ContainerRuntime, ContainerState, ContainerSummary, CreateOptions};
pub use docker::DockerCli;
pub use scripted::{Probe, RuntimeCall, RuntimeOp, ScriptedRuntime};
