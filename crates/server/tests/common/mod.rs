//! Common test utilities for driving the router in-process.
//!
//! The fixture wires the real plan sequencer, registrar, document
//! finalizer, SQLite stores and event writer over a temp directory.
//! Only the task endpoint is replaced by a scripted invoker.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use tierflow_core::{
    events::{create_event_system, EventStore, SqliteEventStore},
    finalizer::DocumentFinalizer,
    identity::PlanRegistrar,
    load_config_from_str,
    progress::BroadcastProgressPublisher,
    sequencer::{PlanLayout, PlanSequencer, PLAN_FILE},
    status::{SqliteStatusStore, StatusStore},
    testing::ScriptedInvoker,
    RunOrchestrator, RunPhase, RunService,
};

/// Re-export fixtures for test convenience
pub use tierflow_core::testing::fixtures;

/// Test fixture with an in-process router.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_run_creation() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture.post("/api/v1/runs", json!({ "client_id": "acme" })).await;
///
///     assert_eq!(response.status, StatusCode::ACCEPTED);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Run service behind the router
    pub service: Arc<RunService>,
    /// Scripted task endpoint
    pub invoker: Arc<ScriptedInvoker>,
    /// Progress channel behind the WebSocket endpoint
    pub progress: Arc<BroadcastProgressPublisher>,
    /// Temporary directory for the database, plans and artifacts
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub text: String,
}

/// Configuration for test fixture.
#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Tiers in the shared plan
    pub tiers: usize,
    /// Items per tier
    pub items: usize,
    /// Delay of every task invocation
    pub item_delay: Option<Duration>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            tiers: 2,
            items: 2,
            item_delay: None,
        }
    }
}

impl TestFixture {
    /// Create a new test fixture with default settings.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    /// Create a test fixture with custom configuration.
    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        let plan_root = temp_dir.path().join("plans");
        let output_dir = temp_dir.path().join("artifacts");

        // Shared plan used by runs without a plan name
        std::fs::create_dir_all(&plan_root).expect("Failed to create plan root");
        std::fs::write(
            plan_root.join(PLAN_FILE),
            serde_json::to_vec(&fixtures::plan_document(
                test_config.tiers,
                test_config.items,
            ))
            .unwrap(),
        )
        .expect("Failed to write plan");

        let config = load_config_from_str(&format!(
            r#"
[server]
host = "127.0.0.1"
port = 8080

[database]
path = "{}"

[plan]
root = "{}"

[finalizer]
output_dir = "{}"

[invoker]
url = "http://127.0.0.1:9/tasks"

[invoker.headers]
authorization = "Bearer top-secret"
"#,
            db_path.display(),
            plan_root.display(),
            output_dir.display()
        ))
        .expect("Failed to build config");

        let status_store: Arc<dyn StatusStore> = Arc::new(
            SqliteStatusStore::new(&db_path).expect("Failed to create status store"),
        );
        let event_store: Arc<dyn EventStore> =
            Arc::new(SqliteEventStore::new(&db_path).expect("Failed to create event store"));

        let (event_handle, event_writer) = create_event_system(Arc::clone(&event_store), 100);
        tokio::spawn(event_writer.run());

        let mut invoker = ScriptedInvoker::new();
        if let Some(delay) = test_config.item_delay {
            invoker = invoker.with_default_delay(delay);
        }
        let invoker = Arc::new(invoker);
        let progress = Arc::new(BroadcastProgressPublisher::new(64));

        let layout = PlanLayout::new(&plan_root);
        let orchestrator = RunOrchestrator::new(
            config.orchestrator.clone(),
            fixtures::fast_policies(2),
            Arc::new(PlanSequencer::new(layout.clone(), Arc::clone(&status_store))),
            invoker.clone(),
            Arc::new(DocumentFinalizer::new(&output_dir)),
            Arc::clone(&status_store),
            Arc::new(event_handle),
        )
        .with_registrar(Arc::new(PlanRegistrar::new(layout)))
        .with_progress(progress.clone());

        let service = Arc::new(RunService::new(Arc::new(orchestrator), 0));

        let state = Arc::new(tierflow_server::state::AppState::new(
            config,
            Arc::clone(&service),
            event_store,
            progress.clone(),
        ));
        let router = tierflow_server::api::create_router(state);

        Self {
            router,
            service,
            invoker,
            progress,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Start a run for `client_id` and return its id.
    pub async fn start_run(&self, client_id: &str) -> String {
        let response = self
            .post(
                "/api/v1/runs",
                serde_json::json!({ "client_id": client_id, "payload": { "topic": "tests" } }),
            )
            .await;
        assert_eq!(response.status, StatusCode::ACCEPTED, "{:?}", response.body);
        response.body["run_id"]
            .as_str()
            .expect("run_id missing")
            .to_string()
    }

    /// Poll the run until it reaches `phase`.
    pub async fn wait_for_phase(&self, run_id: &str, phase: RunPhase) -> Value {
        let path = format!("/api/v1/runs/{}", run_id);
        for _ in 0..200 {
            let response = self.get(&path).await;
            if response.body["phase"] == phase.as_str() {
                return response.body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {} never reached {}", run_id, phase);
    }

    /// Poll the run's events until at least `count` are stored.
    pub async fn wait_for_events(&self, run_id: &str, count: usize) -> Value {
        let path = format!("/api/v1/runs/{}/events", run_id);
        for _ in 0..200 {
            let response = self.get(&path).await;
            if response.body["events"]
                .as_array()
                .is_some_and(|e| e.len() >= count)
            {
                return response.body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {} never stored {} events", run_id, count);
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        self.send(request_builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body_bytes).into_owned();
        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body, text }
    }
}
