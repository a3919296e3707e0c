use serde::Deserialize;
use tracing::debug;

/// Root application configuration. Loaded from environment variables
/// with the prefix `FAULTLINE__` (e.g. `FAULTLINE__API__HTTP_PORT`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub injector: InjectorConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// One JSON file per workload under `data_dir/timelines`.
    Sharded,
    /// Process-local, lost on restart.
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_required_healthy_checks")]
    pub required_healthy_checks: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u32,
    #[serde(default = "default_metric_history_cap")]
    pub metric_history_cap: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InjectorConfig {
    #[serde(default = "default_latency_ms")]
    pub default_latency_ms: u64,
    #[serde(default = "default_duration_ms")]
    pub default_duration_ms: u64,
    #[serde(default = "default_memory_limit")]
    pub default_memory_limit: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_restart_max_retries")]
    pub restart_max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_git_bin")]
    pub git_bin: String,
    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,
    #[serde(default = "default_clone_timeout_ms")]
    pub clone_timeout_ms: u64,
    #[serde(default = "default_lint_timeout_ms")]
    pub lint_timeout_ms: u64,
    #[serde(default = "default_test_timeout_ms")]
    pub test_timeout_ms: u64,
    #[serde(default = "default_build_timeout_ms")]
    pub build_timeout_ms: u64,
    #[serde(default = "default_image_prefix")]
    pub image_prefix: String,
    #[serde(default = "default_descriptor_candidates")]
    pub descriptor_candidates: Vec<String>,
    #[serde(default)]
    pub lint_command: Option<String>,
    #[serde(default)]
    pub test_command: Option<String>,
    #[serde(default = "default_smoke_log_lines")]
    pub smoke_log_lines: u32,
    #[serde(default = "default_branch")]
    pub default_branch: String,
}

// Default functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    3000
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_data_dir() -> String {
    "data".to_string()
}
fn default_storage_backend() -> StorageBackend {
    StorageBackend::Sharded
}
fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_required_healthy_checks() -> u32 {
    5
}
fn default_health_check_interval_ms() -> u64 {
    5000
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    10_000
}
fn default_stop_grace_secs() -> u32 {
    10
}
fn default_metric_history_cap() -> usize {
    100
}
fn default_latency_ms() -> u64 {
    1000
}
fn default_duration_ms() -> u64 {
    60_000
}
fn default_memory_limit() -> String {
    "256m".to_string()
}
fn default_docker_bin() -> String {
    "docker".to_string()
}
fn default_command_timeout_ms() -> u64 {
    30_000
}
fn default_restart_max_retries() -> u32 {
    5
}
fn default_git_bin() -> String {
    "git".to_string()
}
fn default_workspace_root() -> String {
    std::env::temp_dir().to_string_lossy().into_owned()
}
fn default_clone_timeout_ms() -> u64 {
    120_000
}
fn default_lint_timeout_ms() -> u64 {
    60_000
}
fn default_test_timeout_ms() -> u64 {
    120_000
}
fn default_build_timeout_ms() -> u64 {
    300_000
}
fn default_image_prefix() -> String {
    "faultline".to_string()
}
fn default_descriptor_candidates() -> Vec<String> {
    vec![
        "Dockerfile".to_string(),
        "dockerfile".to_string(),
        "docker/Dockerfile".to_string(),
    ]
}
fn default_smoke_log_lines() -> u32 {
    10
}
fn default_branch() -> String {
    "main".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backend: default_storage_backend(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            required_healthy_checks: default_required_healthy_checks(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: default_health_check_interval_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            stop_grace_secs: default_stop_grace_secs(),
            metric_history_cap: default_metric_history_cap(),
        }
    }
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            default_latency_ms: default_latency_ms(),
            default_duration_ms: default_duration_ms(),
            default_memory_limit: default_memory_limit(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            docker_bin: default_docker_bin(),
            command_timeout_ms: default_command_timeout_ms(),
            restart_max_retries: default_restart_max_retries(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            git_bin: default_git_bin(),
            workspace_root: default_workspace_root(),
            clone_timeout_ms: default_clone_timeout_ms(),
            lint_timeout_ms: default_lint_timeout_ms(),
            test_timeout_ms: default_test_timeout_ms(),
            build_timeout_ms: default_build_timeout_ms(),
            image_prefix: default_image_prefix(),
            descriptor_candidates: default_descriptor_candidates(),
            lint_command: None,
            test_command: None,
            smoke_log_lines: default_smoke_log_lines(),
            default_branch: default_branch(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("FAULTLINE")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("pipeline.descriptor_candidates"),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        debug!(
            poll_interval_ms = config.detector.poll_interval_ms,
            health_check_interval_ms = config.recovery.health_check_interval_ms,
            backend = ?config.storage.backend,
            "Configuration resolved"
        );
        Ok(config)
    }

    /// Reject values that would stall or crash a poller.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let nonzero = [
            ("detector.poll_interval_ms", self.detector.poll_interval_ms),
            (
                "detector.required_healthy_checks",
                u64::from(self.detector.required_healthy_checks),
            ),
            (
                "recovery.health_check_interval_ms",
                self.recovery.health_check_interval_ms,
            ),
        ];
        for (key, value) in nonzero {
            if value == 0 {
                return Err(config::ConfigError::Message(format!(
                    "{key} must be greater than zero"
                )));
            }
        }
        Ok(())
    }
}
