use faultline_core::{FaultlineError, FaultlineResult};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Run `program args...` in `cwd`, killing it once `timeout` elapses.
///
/// A non-zero exit becomes `ExternalTool { tool, .. }` carrying stderr (or
/// stdout when stderr is empty); exceeding the budget becomes `Timeout`.
pub async fn run_command(
    tool: &str,
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    timeout: Duration,
) -> FaultlineResult<CommandOutput> {
    debug!(tool = %tool, program = %program, ?args, "Running command");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => result
            .map_err(|e| FaultlineError::external(tool, format!("failed to execute {program}: {e}")))?,
        Err(_) => return Err(FaultlineError::timeout(tool, timeout.as_millis() as u64)),
    };

    let out = CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    if !output.status.success() {
        let detail = if out.stderr.trim().is_empty() {
            out.stdout.trim()
        } else {
            out.stderr.trim()
        };
        return Err(FaultlineError::external(tool, detail.to_string()));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_output() {
        let out = CommandOutput {
            stdout: "built\n".into(),
            stderr: "warning".into(),
        };
        assert_eq!(out.combined(), "built\nwarning");
        assert_eq!(CommandOutput::default().combined(), "");
    }

    #[tokio::test]
    async fn test_missing_program_is_external_tool() {
        let err = run_command(
            "git clone",
            "/nonexistent/git-binary",
            &[],
            None,
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(err.is_external_tool());
        assert!(err.to_string().starts_with("git clone failed"));
    }
}
