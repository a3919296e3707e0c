//! Best-effort lint/test discovery.

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tracing::warn;

/// npm's placeholder when a project has no tests.
const NPM_PLACEHOLDER_TEST: &str = "echo \"Error: no test specified\"";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl CheckCommand {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Whitespace-split a configured command line. `None` for blank input.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl fmt::Display for CheckCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectChecks {
    pub lint: Option<CheckCommand>,
    pub test: Option<CheckCommand>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageJson {
    #[serde(default)]
    scripts: HashMap<String, String>,
    #[serde(default)]
    dev_dependencies: HashMap<String, serde_json::Value>,
}

impl ProjectChecks {
    /// Resolve checks for a cloned project. Configured overrides win;
    /// otherwise `package.json` decides. An unreadable manifest means no
    /// checks rather than an error.
    pub async fn detect(
        root: &Path,
        lint_override: Option<&str>,
        test_override: Option<&str>,
    ) -> Self {
        let manifest = read_package_json(root).await;

        let lint = match lint_override {
            Some(line) => CheckCommand::parse(line),
            None => manifest.as_ref().and_then(npm_lint),
        };
        let test = match test_override {
            Some(line) => CheckCommand::parse(line),
            None => manifest.as_ref().and_then(npm_test),
        };
        Self { lint, test }
    }
}

async fn read_package_json(root: &Path) -> Option<PackageJson> {
    let path = root.join("package.json");
    let bytes = tokio::fs::read(&path).await.ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(manifest) => Some(manifest),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unparseable package.json");
            None
        }
    }
}

fn npm_lint(manifest: &PackageJson) -> Option<CheckCommand> {
    let has_linter = ["eslint", "prettier"]
        .iter()
        .any(|tool| manifest.dev_dependencies.contains_key(*tool));
    has_linter.then(|| CheckCommand::new("npm", &["run", "lint"]))
}

fn npm_test(manifest: &PackageJson) -> Option<CheckCommand> {
    let script = manifest.scripts.get("test")?;
    (!script.trim().is_empty() && script.trim() != NPM_PLACEHOLDER_TEST)
        .then(|| CheckCommand::new("npm", &["test"]))
}
