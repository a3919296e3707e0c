use faultline_core::types::RecoveryStrategy;
use faultline_core::FaultlineResult;
use faultline_runtime::{ContainerRuntime, ContainerState, CreateOptions};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyOutcome {
    /// The runtime action completed.
    Executed,
    /// Nothing was done; an operator has to step in.
    ManualInterventionRequired { reason: String },
}

/// Applies a [`RecoveryStrategy`] to one workload.
pub struct StrategyExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    stop_grace_secs: u32,
}

impl StrategyExecutor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, stop_grace_secs: u32) -> Self {
        Self {
            runtime,
            stop_grace_secs,
        }
    }

    /// `health` is the observation that triggered the attempt.
    pub async fn execute(
        &self,
        workload: &str,
        strategy: RecoveryStrategy,
        health: &ContainerState,
    ) -> FaultlineResult<StrategyOutcome> {
        info!(workload = %workload, strategy = %strategy, "Executing recovery strategy");
        match strategy {
            RecoveryStrategy::Restart => {
                self.restart(workload).await?;
                Ok(StrategyOutcome::Executed)
            }
            RecoveryStrategy::Rebuild => {
                self.rebuild(workload).await?;
                Ok(StrategyOutcome::Executed)
            }
            RecoveryStrategy::Manual => {
                let reason = format!(
                    "Container health: status={} running={} exitCode={}",
                    health.status, health.running, health.exit_code
                );
                info!(workload = %workload, "Manual recovery required");
                Ok(StrategyOutcome::ManualInterventionRequired { reason })
            }
        }
    }

    /// Graceful stop if running (errors ignored), then start.
    async fn restart(&self, workload: &str) -> FaultlineResult<()> {
        match self.runtime.inspect(workload).await {
            Ok(state) if state.running => {
                if let Err(e) = self.runtime.stop(workload, self.stop_grace_secs).await {
                    warn!(workload = %workload, error = %e, "Could not gracefully stop container");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(workload = %workload, error = %e, "Could not inspect before restart"),
        }
        self.runtime.start(workload).await?;
        info!(workload = %workload, "Container restarted");
        Ok(())
    }

    /// Recreate from the current image under the same name.
    async fn rebuild(&self, workload: &str) -> FaultlineResult<()> {
        let image = self.runtime.inspect(workload).await?.image_ref;
        if let Err(e) = self.runtime.remove(workload, true).await {
            warn!(workload = %workload, error = %e, "Could not remove old container");
        }
        self.runtime
            .create(&image, workload, &CreateOptions::default())
            .await?;
        info!(workload = %workload, image = %image, "Container rebuilt");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_runtime::{RuntimeCall, RuntimeOp, ScriptedRuntime};

    async fn health(rt: &ScriptedRuntime, name: &str) -> ContainerState {
        rt.inspect(name).await.unwrap()
    }

    #[tokio::test]
    async fn test_restart_stops_running_container_first() {
        let rt = Arc::new(ScriptedRuntime::new().with_container("web1", "nginx", true));
        let exec = StrategyExecutor::new(rt.clone(), 10);
        let state = health(&rt, "web1").await;

        let outcome = exec
            .execute("web1", RecoveryStrategy::Restart, &state)
            .await
            .unwrap();
        assert_eq!(outcome, StrategyOutcome::Executed);
        assert!(rt.calls().contains(&RuntimeCall::Stop {
            name: "web1".into(),
            grace_secs: 10
        }));
        assert_eq!(rt.is_running("web1"), Some(true));
    }

    #[tokio::test]
    async fn test_restart_swallows_stop_error_but_not_start_error() {
        let rt = Arc::new(ScriptedRuntime::new().with_container("web1", "nginx", true));
        rt.fail_on(RuntimeOp::Stop, "timeout");
        let exec = StrategyExecutor::new(rt.clone(), 10);
        let state = health(&rt, "web1").await;
        exec.execute("web1", RecoveryStrategy::Restart, &state)
            .await
            .unwrap();

        rt.fail_on(RuntimeOp::Start, "daemon unavailable");
        let err = exec
            .execute("web1", RecoveryStrategy::Restart, &state)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("daemon unavailable"));
    }

    #[tokio::test]
    async fn test_rebuild_recreates_from_same_image() {
        let rt = Arc::new(ScriptedRuntime::new().with_container("web1", "acme/web:1.2", false));
        rt.fail_on(RuntimeOp::Remove, "busy");
        let exec = StrategyExecutor::new(rt.clone(), 10);
        let state = health(&rt, "web1").await;

        // Removal failure is swallowed; create then fails on the taken name.
        assert!(exec
            .execute("web1", RecoveryStrategy::Rebuild, &state)
            .await
            .is_err());

        rt.clear_failure(RuntimeOp::Remove);
        exec.execute("web1", RecoveryStrategy::Rebuild, &state)
            .await
            .unwrap();
        assert!(rt.calls().contains(&RuntimeCall::Create {
            image: "acme/web:1.2".into(),
            name: "web1".into()
        }));
        assert_eq!(rt.is_running("web1"), Some(true));
    }

    #[tokio::test]
    async fn test_manual_touches_nothing() {
        let rt = Arc::new(ScriptedRuntime::new().with_container("web1", "nginx", false));
        let exec = StrategyExecutor::new(rt.clone(), 10);
        let state = health(&rt, "web1").await;
        let before = rt.calls().len();

        let outcome = exec
            .execute("web1", RecoveryStrategy::Manual, &state)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            StrategyOutcome::ManualInterventionRequired { .. }
        ));
        assert_eq!(rt.calls().len(), before);
    }
}
