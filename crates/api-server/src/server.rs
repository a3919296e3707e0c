//! API server: REST router plus the Prometheus exporter.

use crate::rest::{self, AppState};
use crate::{chaos_rest, pipeline_rest, recovery_rest};
use axum::routing::{get, post};
use axum::Router;
use faultline_core::config::ApiConfig;
use std::future::Future;
use std::net::SocketAddr;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the full router over `state`.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        // Containers
        .route("/deploy", post(rest::deploy))
        .route("/containers", get(rest::list_containers))
        .route("/health/:name", get(rest::container_health))
        .route("/logs/:name", get(rest::container_logs))
        // Failure injection
        .route("/failures/kill", post(chaos_rest::inject_kill))
        .route("/failures/latency", post(chaos_rest::inject_latency))
        .route("/failures/memory", post(chaos_rest::inject_memory))
        .route(
            "/timeline/:name",
            get(chaos_rest::timeline).delete(chaos_rest::clear_timeline),
        )
        .route("/timelines", get(chaos_rest::all_timelines))
        // Repository deployments and pipelines
        .route("/deploy-from-github", post(pipeline_rest::deploy_from_github))
        .route("/pipeline/execute", post(pipeline_rest::execute_pipeline))
        .route("/pipeline/runs/:id", get(pipeline_rest::pipeline_run))
        .route("/pipeline/logs/:name", get(pipeline_rest::pipeline_logs))
        .route("/pipeline/history/:name", get(pipeline_rest::pipeline_history))
        // Auto-recovery
        .route("/recovery/start", post(recovery_rest::start_recovery))
        .route("/recovery/stop/:name", post(recovery_rest::stop_recovery))
        .route("/recovery/metrics/:name", get(recovery_rest::recovery_metrics))
        .route("/recovery/active", get(recovery_rest::active_recoveries))
        .route("/recovery/history/:name", get(recovery_rest::recovery_history))
        .route("/report/monitoring/:name", get(recovery_rest::monitoring_report));

    Router::new()
        .route("/", get(rest::service_info))
        .route("/ping", get(rest::ping))
        .nest("/api", api)
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: ApiConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: ApiConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Serve HTTP until `shutdown` resolves.
    pub async fn start_http(&self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let app = router(self.state.clone());
        let addr = SocketAddr::new(self.config.host.parse()?, self.config.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }

    /// Install the Prometheus recorder with its own HTTP listener.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.host.parse()?,
                self.config.metrics_port,
            ))
            .install()?;

        info!(port = self.config.metrics_port, "Metrics exporter started");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use faultline_chaos::{FailureInjector, RecoveryDetector};
    use faultline_core::clock::MonotonicClock;
    use faultline_core::config::{DetectorConfig, InjectorConfig, PipelineConfig, RecoveryConfig};
    use faultline_core::types::FailureStatus;
    use faultline_core::Clock;
    use faultline_pipeline::{Deployer, PipelineSequencer};
    use faultline_recovery::RecoveryController;
    use faultline_runtime::ScriptedRuntime;
    use faultline_scm::InMemoryToolchain;
    use faultline_timeline::{MemoryStore, TimelineStore};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Instant;
    use tower::ServiceExt;

    struct TestApp {
        _dir: tempfile::TempDir,
        runtime: Arc<ScriptedRuntime>,
        store: Arc<MemoryStore>,
        state: AppState,
    }

    fn app(runtime: ScriptedRuntime) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(runtime);
        runtime.set_create_logs("ready");
        let store = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let toolchain =
            Arc::new(InMemoryToolchain::new(dir.path()).with_file("Dockerfile", "FROM nginx"));

        let detector = Arc::new(RecoveryDetector::new(
            runtime.clone(),
            store.clone(),
            clock.clone(),
            &DetectorConfig::default(),
        ));
        let injector = Arc::new(FailureInjector::new(
            runtime.clone(),
            store.clone(),
            clock.clone(),
            detector,
            InjectorConfig::default(),
        ));
        let controller = Arc::new(RecoveryController::new(
            runtime.clone(),
            store.clone(),
            clock.clone(),
            &RecoveryConfig::default(),
        ));
        let sequencer = Arc::new(PipelineSequencer::new(
            toolchain.clone(),
            runtime.clone(),
            store.clone(),
            clock.clone(),
            PipelineConfig::default(),
        ));
        let deployer = Arc::new(Deployer::new(
            toolchain,
            runtime.clone(),
            store.clone(),
            clock,
            PipelineConfig::default(),
        ));
        let state = AppState {
            runtime: runtime.clone(),
            injector,
            controller,
            sequencer,
            deployer,
            start_time: Instant::now(),
        };
        TestApp {
            _dir: dir,
            runtime,
            store,
            state,
        }
    }

    async fn call(state: &AppState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_ping_and_root() {
        let t = app(ScriptedRuntime::new());
        let (status, body) = call(&t.state, "GET", "/ping", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        let (status, body) = call(&t.state, "GET", "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["api"], "/api");
    }

    #[tokio::test]
    async fn test_deploy_created_then_conflict() {
        let t = app(ScriptedRuntime::new());
        let body = json!({"image": "nginx:alpine", "containerName": "web1"});

        let (status, resp) = call(&t.state, "POST", "/api/deploy", Some(body.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(resp["container"]["name"], "web1");

        let (status, resp) = call(&t.state, "POST", "/api/deploy", Some(body)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(resp["error"], "conflict");
    }

    #[tokio::test]
    async fn test_missing_fields_are_bad_requests() {
        let t = app(ScriptedRuntime::new());
        for (uri, body) in [
            ("/api/deploy", json!({"image": "nginx"})),
            ("/api/failures/kill", json!({})),
            ("/api/failures/latency", json!({"latencyMs": 10})),
            ("/api/deploy-from-github", json!({"containerName": "web1"})),
            ("/api/pipeline/execute", json!({"repoUrl": "acme/web"})),
            ("/api/recovery/start", json!({"strategy": "restart"})),
        ] {
            let (status, resp) = call(&t.state, "POST", uri, Some(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(resp["error"], "validation_error", "{uri}");
        }
    }

    #[tokio::test]
    async fn test_health_of_unknown_container_is_not_found() {
        let t = app(ScriptedRuntime::new());
        let (status, _) = call(&t.state, "GET", "/api/health/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_containers_health_and_logs() {
        let t = app(ScriptedRuntime::new().with_container("web1", "nginx", true));
        t.runtime.set_logs("web1", "a\nb\nc");

        let (status, body) = call(&t.state, "GET", "/api/containers", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);

        let (_, body) = call(&t.state, "GET", "/api/health/web1", None).await;
        assert_eq!(body["health"]["running"], true);

        let (_, body) = call(&t.state, "GET", "/api/logs/web1?tail=2", None).await;
        assert_eq!(body["logs"], "b\nc");
    }

    #[tokio::test]
    async fn test_kill_is_accepted_and_recorded() {
        let t = app(ScriptedRuntime::new().with_container("web1", "nginx", true));
        let (status, body) = call(
            &t.state,
            "POST",
            "/api/failures/kill",
            Some(json!({"containerName": "web1"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["success"], true);
        assert_eq!(body["failure"], "kill");
        assert_eq!(t.runtime.is_running("web1"), Some(false));

        let (_, body) = call(&t.state, "GET", "/api/timeline/web1", None).await;
        assert_eq!(body["timeline"]["totalFailures"], 1);

        let (_, body) = call(&t.state, "GET", "/api/timelines", None).await;
        assert_eq!(body["activeDetectors"][0]["workload"], "web1");
        t.state.injector.shutdown();

        let (status, _) = call(&t.state, "DELETE", "/api/timeline/web1", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(t.store.events("web1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_kill_of_unknown_container_fails() {
        let t = app(ScriptedRuntime::new());
        let (status, _) = call(
            &t.state,
            "POST",
            "/api/failures/kill",
            Some(json!({"containerName": "ghost"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let events = t.store.events("ghost").await.unwrap();
        assert_eq!(events.last().and_then(|e| e.failure_status()), Some(FailureStatus::Failed));
    }

    #[tokio::test]
    async fn test_recovery_start_registers_policy() {
        let t = app(ScriptedRuntime::new().with_container("web1", "nginx", true));
        let (status, body) = call(
            &t.state,
            "POST",
            "/api/recovery/start",
            Some(json!({"containerName": "web1", "strategy": "rebuild", "options": {"maxRetries": 5}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "started");
        assert_eq!(body["options"]["maxRetries"], 5);
        assert_eq!(body["options"]["retryDelayMs"], 10_000);

        let (_, body) = call(&t.state, "GET", "/api/recovery/active", None).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["activeRecoveries"][0]["strategy"], "rebuild");

        let (_, body) = call(&t.state, "GET", "/api/recovery/metrics/web1", None).await;
        assert_eq!(body["metrics"]["successRate"], 100.0);
        assert_eq!(body["report"]["policy"]["strategy"], "rebuild");

        let (_, body) = call(&t.state, "POST", "/api/recovery/stop/web1", None).await;
        assert_eq!(body["stopped"], true);
        assert!(!t.state.controller.is_active("web1"));
    }

    #[tokio::test]
    async fn test_unknown_strategy_is_rejected() {
        let t = app(ScriptedRuntime::new().with_container("web1", "nginx", true));
        let (status, body) = call(
            &t.state,
            "POST",
            "/api/recovery/start",
            Some(json!({"containerName": "web1", "strategy": "reboot"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "unknown_strategy");
        assert!(t.state.controller.policy("web1").is_none());
    }

    #[tokio::test]
    async fn test_pipeline_execute_then_lookup() {
        let t = app(ScriptedRuntime::new());
        let mut runs = t.state.sequencer.subscribe();
        let (status, body) = call(
            &t.state,
            "POST",
            "/api/pipeline/execute",
            Some(json!({"repoUrl": "acme/web", "containerName": "web1"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let id = body["pipelineId"].as_str().unwrap().to_string();

        let run = runs.recv().await.unwrap();
        assert_eq!(run.pipeline_id.to_string(), id);

        let (status, body) = call(&t.state, "GET", &format!("/api/pipeline/runs/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");

        let (_, body) = call(&t.state, "GET", "/api/pipeline/logs/web1", None).await;
        assert_eq!(body["logCount"], 6);
        let (_, body) = call(&t.state, "GET", "/api/pipeline/history/web1", None).await;
        assert_eq!(body["totalExecutions"], 1);

        let (_, body) = call(&t.state, "GET", "/api/report/monitoring/web1", None).await;
        assert_eq!(body["pipelineExecutions"], 1);
        assert_eq!(body["summary"]["status"], "running");
        assert_eq!(body["recoveryEvents"], 0);

        let (status, _) = call(
            &t.state,
            "GET",
            &format!("/api/pipeline/runs/{}", uuid::Uuid::new_v4()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_deploy_from_github_conflict_and_accept() {
        let t = app(ScriptedRuntime::new().with_container("web1", "nginx", true));
        let (status, _) = call(
            &t.state,
            "POST",
            "/api/deploy-from-github",
            Some(json!({"repoUrl": "acme/web", "containerName": "web1"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(
            &t.state,
            "POST",
            "/api/deploy-from-github",
            Some(json!({"repoUrl": "acme/web", "containerName": "web2"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "processing");
    }
}
