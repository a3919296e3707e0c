//! FaultLine: chaos engineering and auto-recovery for containerized
//! workloads.
//!
//! Main entry point that wires the subsystems together and starts the server.

use clap::Parser;
use faultline_api::{ApiServer, AppState};
use faultline_chaos::{FailureInjector, RecoveryDetector};
use faultline_core::clock::{Clock, MonotonicClock};
use faultline_core::config::{AppConfig, StorageBackend};
use faultline_pipeline::{Deployer, PipelineSequencer};
use faultline_recovery::RecoveryController;
use faultline_runtime::{ContainerRuntime, DockerCli};
use faultline_scm::{GitDockerToolchain, Toolchain};
use faultline_timeline::open_store;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "faultline")]
#[command(about = "Failure injection, recovery detection and auto-recovery for containers")]
#[command(version)]
struct Cli {
    /// HTTP port (overrides config)
    #[arg(long, env = "FAULTLINE__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Prometheus exporter port (overrides config)
    #[arg(long, env = "FAULTLINE__API__METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Timeline data directory (overrides config)
    #[arg(long, env = "FAULTLINE__STORAGE__DATA_DIR")]
    data_dir: Option<String>,

    /// Keep timelines in memory only
    #[arg(long, default_value_t = false)]
    ephemeral: bool,

    /// Skip the Prometheus exporter
    #[arg(long, default_value_t = false)]
    no_metrics: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "faultline=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("FaultLine starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(port) = cli.metrics_port {
        config.api.metrics_port = port;
    }
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
    }
    if cli.ephemeral {
        config.storage.backend = StorageBackend::Memory;
    }

    info!(
        http_port = config.api.http_port,
        metrics_port = config.api.metrics_port,
        data_dir = %config.storage.data_dir,
        docker = %config.runtime.docker_bin,
        "Configuration loaded"
    );

    let store = open_store(&config.storage).await?;
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerCli::new(&config.runtime));
    let toolchain: Arc<dyn Toolchain> =
        Arc::new(GitDockerToolchain::new(&config.pipeline, &config.runtime));
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());

    let detector = Arc::new(RecoveryDetector::new(
        runtime.clone(),
        store.clone(),
        clock.clone(),
        &config.detector,
    ));
    let injector = Arc::new(FailureInjector::new(
        runtime.clone(),
        store.clone(),
        clock.clone(),
        detector,
        config.injector.clone(),
    ));
    let controller = Arc::new(RecoveryController::new(
        runtime.clone(),
        store.clone(),
        clock.clone(),
        &config.recovery,
    ));
    let sequencer = Arc::new(PipelineSequencer::new(
        toolchain.clone(),
        runtime.clone(),
        store.clone(),
        clock.clone(),
        config.pipeline.clone(),
    ));
    let deployer = Arc::new(Deployer::new(
        toolchain,
        runtime.clone(),
        store,
        clock,
        config.pipeline.clone(),
    ));

    // Surface every finished pipeline run
    let mut runs = sequencer.subscribe();
    tokio::spawn(async move {
        loop {
            match runs.recv().await {
                Ok(run) => info!(
                    pipeline_id = %run.pipeline_id,
                    workload = %run.workload_name,
                    status = run.status.as_str(),
                    steps_completed = run.steps_completed,
                    "Pipeline run finished"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Pipeline run listener lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let state = AppState {
        runtime,
        injector: injector.clone(),
        controller: controller.clone(),
        sequencer,
        deployer,
        start_time: Instant::now(),
    };
    let api_server = ApiServer::new(config.api.clone(), state);

    // Start metrics exporter
    if !cli.no_metrics {
        if let Err(e) = api_server.start_metrics() {
            error!(error = %e, "Failed to start metrics exporter");
        }
    }

    info!("FaultLine is ready to serve traffic");

    // Start HTTP server (blocks until shutdown)
    api_server.start_http(shutdown_signal()).await?;

    info!("Shutting down background monitors");
    injector.shutdown();
    controller.stop_all();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
