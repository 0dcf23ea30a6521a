//! Common test utilities for API testing with mocks.
//!
//! This module provides a test fixture that builds the full engine in-process
//! with mock collaborators injected, so the HTTP surface can be exercised
//! without a pipeline, a watched directory or a notification target.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use archivist_core::config::{DatabaseConfig, EngineConfig, NotificationsConfig, ServerConfig};
use archivist_core::{
    AdmissionController, AsyncDecisionController, BulkOperationWorkflow, Config,
    ContinuationRegistry, Job, JobService, JobStatus, JobStore, MonitorHub, Notifier, Pipeline,
    PipelineRegistry, ProcessingWorkflow, SqliteJobStore, WorkflowHost,
    testing::{MockBundler, MockNotifier, MockPipelineClient, MockSourceStore},
};
use archivist_server::state::AppState;

/// Re-export fixtures for test convenience
pub use archivist_core::testing::fixtures;

/// Test fixture for API testing with mock dependencies.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_submit() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture.post("/api/v1/jobs", json!({
///         "watcher_name": "dropbox",
///         "pipeline_names": ["am"],
///         "key": "item.zip"
///     })).await;
///
///     assert_eq!(response.status, 201);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Engine behind the router
    pub service: JobService,
    /// Mock pipeline client - script transfer and ingest statuses
    pub client: Arc<MockPipelineClient>,
    /// Mock notifier - script delivery failures
    pub notifier: Arc<MockNotifier>,
    /// Temporary directory for the test database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a new test fixture with default mocks.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    /// Create a test fixture with custom configuration.
    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let config = Config {
            server: ServerConfig {
                host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                port: 0, // Not used for in-process testing
            },
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            engine: EngineConfig {
                decision_ceiling_secs: test_config.decision_ceiling_secs,
                ..Default::default()
            },
            pipelines: vec![fixtures::pipeline_config("am", test_config.capacity)],
            watchers: Vec::new(),
            notifications: NotificationsConfig::default(),
        };

        let store: Arc<dyn JobStore> =
            Arc::new(SqliteJobStore::new(&db_path).expect("Failed to create job store"));
        let client = Arc::new(MockPipelineClient::new());
        let notifier = Arc::new(MockNotifier::new());

        let registry = PipelineRegistry::new(vec![Pipeline::new(
            config.pipelines[0].clone(),
            Arc::clone(&client) as _,
        )]);
        let admission = Arc::new(AdmissionController::new(&registry));
        let monitor = MonitorHub::default();
        let decisions = AsyncDecisionController::new(
            Arc::clone(&store),
            ContinuationRegistry::new(),
            monitor.clone(),
            Duration::from_secs(test_config.decision_ceiling_secs),
        );
        let processing = ProcessingWorkflow::new(
            Arc::clone(&store),
            Arc::new(registry),
            admission,
            Arc::new(MockSourceStore::new()),
            Arc::new(MockBundler::new()),
            decisions,
            monitor,
        )
        .with_notifiers(vec![Arc::clone(&notifier) as Arc<dyn Notifier>]);
        let bulk = BulkOperationWorkflow::new(Arc::clone(&store))
            .with_page_size(test_config.bulk_page_size)
            .with_pause(Duration::from_millis(1));

        let service = JobService::new(
            Arc::new(WorkflowHost::new()),
            Arc::new(processing),
            Arc::new(bulk),
        );

        let state = Arc::new(AppState::new(config, service.clone()));
        let router = archivist_server::api::create_router(state);

        Self {
            router,
            service,
            client,
            notifier,
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

    /// Send a GET request and return the raw text body.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Send a request to the test server.
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

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }

    /// Wait until the job's workflow run has closed and return the job.
    pub async fn wait_job(&self, job_id: i64) -> Job {
        let job = self.service.get(job_id).expect("job exists");
        self.service
            .host()
            .wait(&job.workflow.instance_id)
            .await
            .expect("instance exists");
        self.service.get(job_id).expect("job exists")
    }

    /// Poll until the job reaches `status`.
    pub async fn wait_for_status(&self, job_id: i64, status: JobStatus) -> Job {
        for _ in 0..1000 {
            let job = self.service.get(job_id).expect("job exists");
            if job.status == status {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached {}", job_id, status);
    }
}

/// Configuration for test fixture.
#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Slots of the `am` pipeline
    pub capacity: usize,
    pub decision_ceiling_secs: u64,
    pub bulk_page_size: u32,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            capacity: 1,
            decision_ceiling_secs: 3600,
            bulk_page_size: 20,
        }
    }
}
