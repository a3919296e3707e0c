//! `docker` CLI backed runtime client.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use faultline_core::config::RuntimeConfig;
use faultline_core::{FaultlineError, FaultlineResult};
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use crate::client::{ContainerHandle, ContainerRuntime, ContainerState, ContainerSummary, CreateOptions};

const MISSING_MARKERS: [&str; 3] = ["No such container", "No such object", "No such image"];

pub struct DockerCli {
    bin: String,
    timeout: Duration,
    restart_max_retries: u32,
}

struct CommandOutput {
    stdout: String,
    stderr: String,
}

impl DockerCli {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            bin: config.docker_bin.clone(),
            timeout: Duration::from_millis(config.command_timeout_ms),
            restart_max_retries: config.restart_max_retries,
        }
    }

    /// Run `docker <args>`; `subject` names the container or image for
    /// not-found errors.
    async fn run(&self, args: &[&str], subject: &str) -> FaultlineResult<CommandOutput> {
        let op = format!("docker {}", args.first().copied().unwrap_or_default());
        debug!(command = %op, subject = subject, "Running docker command");

        let mut cmd = Command::new(&self.bin);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.map_err(|e| {
                FaultlineError::external(&op, format!("failed to spawn {}: {e}", self.bin))
            })?,
            Err(_) => return Err(FaultlineError::timeout(op, self.timeout.as_millis() as u64)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            metrics::counter!("runtime.command_errors").increment(1);
            if MISSING_MARKERS.iter().any(|m| stderr.contains(m)) {
                return Err(FaultlineError::NotFound(format!("container {subject}")));
            }
            return Err(FaultlineError::external(op, stderr));
        }

        Ok(CommandOutput { stdout, stderr })
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn inspect(&self, name: &str) -> FaultlineResult<ContainerState> {
        let output = self
            .run(&["inspect", "--type", "container", name], name)
            .await?;
        parse_inspect(&output.stdout, name)
    }

    async fn kill(&self, name: &str) -> FaultlineResult<()> {
        self.run(&["kill", name], name).await?;
        info!(container = %name, "Container killed");
        Ok(())
    }

    async fn start(&self, name: &str) -> FaultlineResult<()> {
        self.run(&["start", name], name).await?;
        info!(container = %name, "Container started");
        Ok(())
    }

    async fn stop(&self, name: &str, grace_secs: u32) -> FaultlineResult<()> {
        let grace = grace_secs.to_string();
        self.run(&["stop", "-t", grace.as_str(), name], name).await?;
        info!(container = %name, grace_secs, "Container stopped");
        Ok(())
    }

    async fn remove(&self, name: &str, force: bool) -> FaultlineResult<()> {
        let mut args = vec!["rm"];
        if force {
            args.push("-f");
        }
        args.push(name);
        self.run(&args, name).await?;
        info!(container = %name, force, "Container removed");
        Ok(())
    }

    async fn create(
        &self,
        image: &str,
        name: &str,
        options: &CreateOptions,
    ) -> FaultlineResult<ContainerHandle> {
        let restart = format!("on-failure:{}", self.restart_max_retries);
        let mut args: Vec<&str> = vec!["run", "-d", "--name", name, "--restart", restart.as_str()];
        for env in &options.env {
            args.push("-e");
            args.push(env);
        }
        for port in &options.ports {
            args.push("-p");
            args.push(port);
        }
        args.push(image);

        let output = self.run(&args, image).await?;
        let id = output.stdout.trim().to_string();
        info!(container = %name, image = %image, id = %id, "Container created and started");
        Ok(ContainerHandle {
            id,
            name: name.to_string(),
        })
    }

    async fn logs(&self, name: &str, tail_lines: u32) -> FaultlineResult<String> {
        let tail = tail_lines.to_string();
        let output = self.run(&["logs", "--tail", tail.as_str(), name], name).await?;
        let mut logs = output.stdout;
        if !output.stderr.is_empty() {
            if !logs.is_empty() && !logs.ends_with('\n') {
                logs.push('\n');
            }
            logs.push_str(&output.stderr);
        }
        Ok(logs)
    }

    async fn list(&self, all: bool) -> FaultlineResult<Vec<ContainerSummary>> {
        let mut args = vec!["ps", "--no-trunc", "--format", "{{json .}}"];
        if all {
            args.push("-a");
        }
        let output = self.run(&args, "containers").await?;
        parse_ps(&output.stdout)
    }

    async fn pull(&self, image: &str) -> FaultlineResult<()> {
        info!(image = %image, "Pulling image");
        self.run(&["pull", image], image).await?;
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectDoc {
    id: String,
    name: String,
    state: InspectState,
    config: InspectConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
    running: bool,
    exit_code: i64,
    started_at: String,
    finished_at: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    image: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PsLine {
    #[serde(rename = "ID")]
    id: String,
    names: String,
    image: String,
    status: String,
    #[serde(default)]
    state: String,
}

fn parse_inspect(stdout: &str, name: &str) -> FaultlineResult<ContainerState> {
    let docs: Vec<InspectDoc> = serde_json::from_str(stdout)?;
    let doc = docs
        .into_iter()
        .next()
        .ok_or_else(|| FaultlineError::NotFound(format!("container {name}")))?;

    Ok(ContainerState {
        id: doc.id,
        name: doc.name.trim_start_matches('/').to_string(),
        status: doc.state.status,
        running: doc.state.running,
        exit_code: doc.state.exit_code,
        started_at: parse_docker_time(&doc.state.started_at),
        finished_at: parse_docker_time(&doc.state.finished_at),
        image_ref: doc.config.image,
    })
}

/// Docker reports unset times as `0001-01-01T00:00:00Z`.
fn parse_docker_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
        .filter(|t| t.year() > 1)
}

fn parse_ps(stdout: &str) -> FaultlineResult<Vec<ContainerSummary>> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let row: PsLine = serde_json::from_str(line)?;
            Ok(ContainerSummary {
                id: row.id,
                name: row.names.split(',').next().unwrap_or_default().to_string(),
                image: row.image,
                status: row.status,
                state: row.state,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inspect() {
        let stdout = r#"[{
            "Id": "abc123",
            "Name": "/web1",
            "State": {
                "Status": "exited",
                "Running": false,
                "ExitCode": 137,
                "StartedAt": "2024-05-01T10:00:00.123456789Z",
                "FinishedAt": "2024-05-01T10:05:00Z"
            },
            "Config": {"Image": "nginx:alpine"}
        }]"#;

        let state = parse_inspect(stdout, "web1").unwrap();
        assert_eq!(state.name, "web1");
        assert!(!state.running);
        assert_eq!(state.exit_code, 137);
        assert_eq!(state.image_ref, "nginx:alpine");
        assert!(state.started_at.is_some());
        assert!(state.finished_at.is_some());
    }

    #[test]
    fn test_zero_time_is_none() {
        assert!(parse_docker_time("0001-01-01T00:00:00Z").is_none());
        assert!(parse_docker_time("garbage").is_none());
    }

    #[test]
    fn test_empty_inspect_is_not_found() {
        let err = parse_inspect("[]", "ghost").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_parse_ps_lines() {
        let stdout = concat!(
            r#"{"ID":"a1","Names":"web1","Image":"nginx","Status":"Up 2 minutes","State":"running"}"#,
            "\n",
            r#"{"ID":"b2","Names":"db,db-alias","Image":"postgres","Status":"Exited (0)","State":"exited"}"#,
            "\n\n"
        );
        let rows = parse_ps(stdout).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].name, "db");
        assert_eq!(rows[0].state, "running");
    }

    #[tokio::test]
    async fn test_missing_binary_is_external_tool_error() {
        let cli = DockerCli::new(&RuntimeConfig {
            docker_bin: "/nonexistent/docker-binary".into(),
            command_timeout_ms: 1000,
            restart_max_retries: 5,
        });
        let err = cli.inspect("web1").await.unwrap_err();
        assert!(err.is_external_tool());
    }
}
