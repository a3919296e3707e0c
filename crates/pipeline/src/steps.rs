use faultline_core::clock::Clock;
use std::sync::Arc;
use tracing::info;

/// Number of checkpoints in a full pipeline run.
pub const TOTAL_STEPS: u32 = 6;

/// Longest error excerpt kept from a soft-failing step.
const EXCERPT_CHARS: usize = 100;

/// Ordered, timestamped step log of one pipeline run.
pub struct StepLog {
    clock: Arc<dyn Clock>,
    pipeline: String,
    lines: Vec<String>,
}

impl StepLog {
    pub fn new(clock: Arc<dyn Clock>, pipeline: impl Into<String>) -> Self {
        Self {
            clock,
            pipeline: pipeline.into(),
            lines: Vec::new(),
        }
    }

    /// Append `[timestamp] [STEP n/6] message`.
    pub fn step(&mut self, step: u32, message: impl AsRef<str>) {
        let message = format!("[STEP {step}/{TOTAL_STEPS}] {}", message.as_ref());
        info!(pipeline = %self.pipeline, "{message}");
        let ts = self.clock.now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        self.lines.push(format!("[{ts}] {message}"));
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

/// First line of `text`, at most [`EXCERPT_CHARS`] characters.
pub fn excerpt(text: &str) -> String {
    let first = text.lines().next().unwrap_or_default();
    first.chars().take(EXCERPT_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_core::clock::SystemClock;

    #[test]
    fn test_step_lines_are_timestamped_and_numbered() {
        let mut log = StepLog::new(Arc::new(SystemClock), "p1");
        log.step(1, "Repository cloned");
        log.step(2, "Build descriptor found");
        let lines = log.into_lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("[STEP 1/6] Repository cloned"));
        assert!(lines[1].contains("[STEP 2/6]"));
    }

    #[test]
    fn test_excerpt() {
        assert_eq!(excerpt("boom\nstack"), "boom");
        assert_eq!(excerpt(&"x".repeat(500)).len(), 100);
        assert_eq!(excerpt(""), "");
    }
}
