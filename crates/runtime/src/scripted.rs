//! Deterministic runtime for tests and dry runs.
//!
//! Containers live in a map. `inspect` first consumes any scripted
//! [`Probe`]s queued for the container and then falls back to its current
//! state. Operations can be made to fail with [`ScriptedRuntime::fail_on`].
//! Every call is recorded in order.

use async_trait::async_trait;
use chrono::Utc;
use faultline_core::{FaultlineError, FaultlineResult};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use crate::client::{ContainerHandle, ContainerRuntime, ContainerState, ContainerSummary, CreateOptions};

/// One scripted `inspect` observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Running,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeOp {
    Inspect,
    Kill,
    Start,
    Stop,
    Remove,
    Create,
    Logs,
    List,
    Pull,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Inspect(String),
    Kill(String),
    Start(String),
    Stop { name: String, grace_secs: u32 },
    Remove { name: String, force: bool },
    Create { image: String, name: String },
    Logs { name: String, tail_lines: u32 },
    List { all: bool },
    Pull(String),
}

impl RuntimeCall {
    pub fn op(&self) -> RuntimeOp {
        match self {
            Self::Inspect(_) => RuntimeOp::Inspect,
            Self::Kill(_) => RuntimeOp::Kill,
            Self::Start(_) => RuntimeOp::Start,
            Self::Stop { .. } => RuntimeOp::Stop,
            Self::Remove { .. } => RuntimeOp::Remove,
            Self::Create { .. } => RuntimeOp::Create,
            Self::Logs { .. } => RuntimeOp::Logs,
            Self::List { .. } => RuntimeOp::List,
            Self::Pull(_) => RuntimeOp::Pull,
        }
    }
}

#[derive(Debug, Clone)]
struct FakeContainer {
    id: String,
    image: String,
    running: bool,
    logs: String,
}

#[derive(Debug, Default)]
struct State {
    containers: HashMap<String, FakeContainer>,
    probes: HashMap<String, VecDeque<Probe>>,
    failures: HashMap<RuntimeOp, String>,
    calls: Vec<RuntimeCall>,
    next_id: u64,
    create_logs: String,
}

#[derive(Debug, Default)]
pub struct ScriptedRuntime {
    state: Mutex<State>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an existing container.
    pub fn with_container(self, name: &str, image: &str, running: bool) -> Self {
        {
            let mut state = self.state.lock();
            state.next_id += 1;
            let id = format!("scripted-{}", state.next_id);
            state.containers.insert(
                name.to_string(),
                FakeContainer {
                    id,
                    image: image.to_string(),
                    running,
                    logs: String::new(),
                },
            );
        }
        self
    }

    /// Queue observations returned by successive `inspect` calls.
    pub fn script_probes(&self, name: &str, probes: impl IntoIterator<Item = Probe>) {
        self.state
            .lock()
            .probes
            .entry(name.to_string())
            .or_default()
            .extend(probes);
    }

    pub fn set_running(&self, name: &str, running: bool) {
        if let Some(c) = self.state.lock().containers.get_mut(name) {
            c.running = running;
        }
    }

    pub fn set_logs(&self, name: &str, logs: &str) {
        if let Some(c) = self.state.lock().containers.get_mut(name) {
            c.logs = logs.to_string();
        }
    }

    /// Logs given to containers made by later `create` calls.
    pub fn set_create_logs(&self, logs: &str) {
        self.state.lock().create_logs = logs.to_string();
    }

    /// Make every subsequent `op` fail with an external tool error.
    pub fn fail_on(&self, op: RuntimeOp, message: &str) {
        self.state.lock().failures.insert(op, message.to_string());
    }

    pub fn clear_failure(&self, op: RuntimeOp) {
        self.state.lock().failures.remove(&op);
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, op: RuntimeOp) -> usize {
        self.state.lock().calls.iter().filter(|c| c.op() == op).count()
    }

    pub fn is_running(&self, name: &str) -> Option<bool> {
        self.state.lock().containers.get(name).map(|c| c.running)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.lock().containers.contains_key(name)
    }

    fn record(state: &mut State, call: RuntimeCall) -> FaultlineResult<()> {
        let op = call.op();
        state.calls.push(call);
        match state.failures.get(&op) {
            Some(message) => Err(FaultlineError::external(
                format!("scripted {op:?}"),
                message.clone(),
            )),
            None => Ok(()),
        }
    }

    fn container<'a>(state: &'a mut State, name: &str) -> FaultlineResult<&'a mut FakeContainer> {
        state
            .containers
            .get_mut(name)
            .ok_or_else(|| FaultlineError::NotFound(format!("container {name}")))
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn inspect(&self, name: &str) -> FaultlineResult<ContainerState> {
        let mut state = self.state.lock();
        Self::record(&mut state, RuntimeCall::Inspect(name.to_string()))?;

        let probe = state.probes.get_mut(name).and_then(|q| q.pop_front());
        if probe == Some(Probe::Error) {
            return Err(FaultlineError::external("scripted Inspect", "probe error"));
        }

        let container = Self::container(&mut state, name)?;
        let running = match probe {
            Some(Probe::Running) => true,
            Some(Probe::Stopped) => false,
            _ => container.running,
        };
        Ok(ContainerState {
            id: container.id.clone(),
            name: name.to_string(),
            status: if running { "running" } else { "exited" }.to_string(),
            running,
            exit_code: if running { 0 } else { 137 },
            started_at: Some(Utc::now()),
            finished_at: None,
            image_ref: container.image.clone(),
        })
    }

    async fn kill(&self, name: &str) -> FaultlineResult<()> {
        let mut state = self.state.lock();
        Self::record(&mut state, RuntimeCall::Kill(name.to_string()))?;
        Self::container(&mut state, name)?.running = false;
        Ok(())
    }

    async fn start(&self, name: &str) -> FaultlineResult<()> {
        let mut state = self.state.lock();
        Self::record(&mut state, RuntimeCall::Start(name.to_string()))?;
        Self::container(&mut state, name)?.running = true;
        Ok(())
    }

    async fn stop(&self, name: &str, grace_secs: u32) -> FaultlineResult<()> {
        let mut state = self.state.lock();
        Self::record(
            &mut state,
            RuntimeCall::Stop {
                name: name.to_string(),
                grace_secs,
            },
        )?;
        Self::container(&mut state, name)?.running = false;
        Ok(())
    }

    async fn remove(&self, name: &str, force: bool) -> FaultlineResult<()> {
        let mut state = self.state.lock();
        Self::record(
            &mut state,
            RuntimeCall::Remove {
                name: name.to_string(),
                force,
            },
        )?;
        let running = Self::container(&mut state, name)?.running;
        if running && !force {
            return Err(FaultlineError::external(
                "scripted Remove",
                format!("container {name} is running"),
            ));
        }
        state.containers.remove(name);
        Ok(())
    }

    async fn create(
        &self,
        image: &str,
        name: &str,
        _options: &CreateOptions,
    ) -> FaultlineResult<ContainerHandle> {
        let mut state = self.state.lock();
        Self::record(
            &mut state,
            RuntimeCall::Create {
                image: image.to_string(),
                name: name.to_string(),
            },
        )?;
        if state.containers.contains_key(name) {
            return Err(FaultlineError::external(
                "scripted Create",
                format!("container name {name} is already in use"),
            ));
        }
        state.next_id += 1;
        let id = format!("scripted-{}", state.next_id);
        let logs = state.create_logs.clone();
        state.containers.insert(
            name.to_string(),
            FakeContainer {
                id: id.clone(),
                image: image.to_string(),
                running: true,
                logs,
            },
        );
        Ok(ContainerHandle {
            id,
            name: name.to_string(),
        })
    }

    async fn logs(&self, name: &str, tail_lines: u32) -> FaultlineResult<String> {
        let mut state = self.state.lock();
        Self::record(
            &mut state,
            RuntimeCall::Logs {
                name: name.to_string(),
                tail_lines,
            },
        )?;
        let logs = &Self::container(&mut state, name)?.logs;
        let lines: Vec<&str> = logs.lines().collect();
        let skip = lines.len().saturating_sub(tail_lines as usize);
        Ok(lines[skip..].join("\n"))
    }

    async fn list(&self, all: bool) -> FaultlineResult<Vec<ContainerSummary>> {
        let mut state = self.state.lock();
        Self::record(&mut state, RuntimeCall::List { all })?;
        let mut rows: Vec<ContainerSummary> = state
            .containers
            .iter()
            .filter(|(_, c)| all || c.running)
            .map(|(name, c)| ContainerSummary {
                id: c.id.clone(),
                name: name.clone(),
                image: c.image.clone(),
                status: if c.running { "Up" } else { "Exited" }.to_string(),
                state: if c.running { "running" } else { "exited" }.to_string(),
            })
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    async fn pull(&self, image: &str) -> FaultlineResult<()> {
        let mut state = self.state.lock();
        Self::record(&mut state, RuntimeCall::Pull(image.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probes_override_then_fall_back() {
        let rt = ScriptedRuntime::new().with_container("web1", "nginx", true);
        rt.script_probes("web1", [Probe::Stopped, Probe::Error]);

        assert!(!rt.inspect("web1").await.unwrap().running);
        assert!(rt.inspect("web1").await.unwrap_err().is_external_tool());
        assert!(rt.inspect("web1").await.unwrap().running);
        assert_eq!(rt.count(RuntimeOp::Inspect), 3);
    }

    #[tokio::test]
    async fn test_kill_start_and_missing_container() {
        let rt = ScriptedRuntime::new().with_container("web1", "nginx", true);
        rt.kill("web1").await.unwrap();
        assert_eq!(rt.is_running("web1"), Some(false));
        rt.start("web1").await.unwrap();
        assert_eq!(rt.is_running("web1"), Some(true));

        assert!(rt.kill("ghost").await.unwrap_err().is_not_found());
        assert!(!rt.exists("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn test_fail_on_records_call_and_errors() {
        let rt = ScriptedRuntime::new().with_container("web1", "nginx", true);
        rt.fail_on(RuntimeOp::Kill, "permission denied");

        let err = rt.kill("web1").await.unwrap_err();
        assert!(err.to_string().contains("permission denied"));
        assert_eq!(rt.calls(), vec![RuntimeCall::Kill("web1".into())]);
        assert_eq!(rt.is_running("web1"), Some(true));
    }

    #[tokio::test]
    async fn test_remove_and_recreate() {
        let rt = ScriptedRuntime::new().with_container("web1", "nginx", true);
        assert!(rt.remove("web1", false).await.is_err());
        rt.stop("web1", 10).await.unwrap();
        rt.remove("web1", false).await.unwrap();
        assert!(!rt.contains("web1"));

        let handle = rt
            .create("nginx:latest", "web1", &CreateOptions::default())
            .await
            .unwrap();
        assert_eq!(handle.name, "web1");
        assert_eq!(rt.is_running("web1"), Some(true));
        assert!(rt
            .create("nginx:latest", "web1", &CreateOptions::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_logs_tail() {
        let rt = ScriptedRuntime::new().with_container("web1", "nginx", true);
        rt.set_logs("web1", "a\nb\nc\nd");
        assert_eq!(rt.logs("web1", 2).await.unwrap(), "c\nd");
        assert_eq!(rt.logs("web1", 10).await.unwrap(), "a\nb\nc\nd");
    }
}
