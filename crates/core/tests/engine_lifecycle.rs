//! Engine lifecycle integration tests.
//!
//! These tests drive the whole engine through [`JobService`] with mock
//! collaborators:
//! - Admission keeps each pipeline within its capacity across many jobs
//! - Bulk retry walks every page of failed jobs
//! - Escalated failures wait for an operator decision
//! - Jobs interrupted by a restart are recovered and can be retried

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use archivist_core::{
    AdmissionController, AsyncDecisionController, BulkOperation, BulkOperationWorkflow,
    BulkRequest, ContinuationRegistry, Job, JobService, JobStatus, JobStore, MonitorEvent,
    MonitorHub, Notifier, NotifyError, Pipeline, PipelineRegistry, ProcessingWorkflow,
    SqliteJobStore, WorkflowHost, BULK_INSTANCE_ID,
    job::{CreateJobRequest, StatusUpdate, WorkflowHandle},
    pipeline::UnitStatus,
    testing::{
        fixtures::{job_event, pipeline_config},
        MockBundler, MockNotifier, MockPipelineClient, MockSourceStore,
    },
    workflow::INTERRUPTED_BY_RESTART,
};

/// Test helper wiring the engine around mocks.
struct TestHarness {
    service: JobService,
    client: Arc<MockPipelineClient>,
    notifier: Arc<MockNotifier>,
    admission: Arc<AdmissionController>,
}

impl TestHarness {
    fn new(db_path: &Path, capacity: usize) -> Self {
        let store: Arc<dyn JobStore> =
            Arc::new(SqliteJobStore::new(db_path).expect("Failed to create job store"));
        let client = Arc::new(MockPipelineClient::new());
        let notifier = Arc::new(MockNotifier::new());

        let registry = PipelineRegistry::new(vec![Pipeline::new(
            pipeline_config("am", capacity),
            Arc::clone(&client) as _,
        )]);
        let admission = Arc::new(AdmissionController::new(&registry));
        let monitor = MonitorHub::new(256);
        let decisions = AsyncDecisionController::new(
            Arc::clone(&store),
            ContinuationRegistry::new(),
            monitor.clone(),
            Duration::from_secs(3600),
        );
        let processing = ProcessingWorkflow::new(
            Arc::clone(&store),
            Arc::new(registry),
            Arc::clone(&admission),
            Arc::new(MockSourceStore::new()),
            Arc::new(MockBundler::new()),
            decisions,
            monitor,
        )
        .with_notifiers(vec![Arc::clone(&notifier) as Arc<dyn Notifier>]);
        let bulk = BulkOperationWorkflow::new(Arc::clone(&store))
            .with_page_size(20)
            .with_pause(Duration::from_millis(5));

        Self {
            service: JobService::new(
                Arc::new(WorkflowHost::new()),
                Arc::new(processing),
                Arc::new(bulk),
            ),
            client,
            notifier,
            admission,
        }
    }

    fn submit(&self, key: &str) -> i64 {
        self.service
            .submit_event(job_event(key, &["am"]))
            .expect("submit failed")
            .remove(0)
            .job_id
    }

    fn in_use(&self) -> usize {
        self.admission.usage("am").unwrap().in_use
    }

    async fn wait_job(&self, job_id: i64) -> Job {
        let job = self.service.get(job_id).unwrap();
        self.service
            .host()
            .wait(&job.workflow.instance_id)
            .await
            .unwrap();
        self.service.get(job_id).unwrap()
    }

    async fn wait_for_status(&self, job_id: i64, status: JobStatus) -> Job {
        for _ in 0..1000 {
            let job = self.service.get(job_id).unwrap();
            if job.status == status {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached {}", job_id, status);
    }
}

#[tokio::test(start_paused = true)]
async fn test_admission_bounds_concurrent_jobs() {
    let temp_dir = TempDir::new().unwrap();
    let h = TestHarness::new(&temp_dir.path().join("test.db"), 2);
    h.client
        .set_default_transfer_status(UnitStatus::new("PROCESSING"))
        .await;

    let ids: Vec<i64> = (0..6).map(|n| h.submit(&format!("item-{}.zip", n))).collect();

    // Two jobs hold the slots, the rest wait in the queue
    for _ in 0..1000 {
        if h.service.store().count(Some(JobStatus::Queued)).unwrap() == 4 && h.in_use() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.in_use(), 2);
    assert_eq!(h.service.store().count(Some(JobStatus::Queued)).unwrap(), 4);
    assert_eq!(h.service.store().count(Some(JobStatus::InProgress)).unwrap(), 2);

    h.client
        .set_default_transfer_status(UnitStatus::new("COMPLETE").with_sip_id("sip-shared"))
        .await;

    let admission = Arc::clone(&h.admission);
    let sampler = tokio::spawn(async move {
        let mut max_in_use = 0;
        loop {
            let usage = admission.usage("am").unwrap();
            max_in_use = max_in_use.max(usage.in_use);
            if usage.in_use == 0 {
                return max_in_use;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    });

    for id in ids {
        let job = h.wait_job(id).await;
        assert_eq!(job.status, JobStatus::Done);
        assert!(job.started_at.is_some());
    }
    assert!(sampler.await.unwrap() <= 2);
    assert_eq!(h.in_use(), 0);
    assert_eq!(h.client.submissions().await.len(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_bulk_retry_walks_every_page() {
    let temp_dir = TempDir::new().unwrap();
    let h = TestHarness::new(&temp_dir.path().join("test.db"), 3);

    // 45 failed jobs, as left behind by an outage
    let store = Arc::clone(h.service.store());
    let mut ids = Vec::new();
    for n in 0..45 {
        let key = format!("item-{}.zip", n);
        let job = store
            .create(CreateJobRequest {
                name: key.clone(),
                workflow: WorkflowHandle {
                    instance_id: format!("processing-workflow-{}", n),
                    run_id: String::new(),
                },
                pipeline_name: "am".to_string(),
                origin_id: None,
                event: job_event(&key, &["am"]),
            })
            .unwrap();
        store
            .update_status(
                job.id,
                StatusUpdate::new(JobStatus::Error).with_error("pipeline unreachable"),
            )
            .unwrap();
        ids.push(job.id);
    }

    h.service
        .bulk(BulkRequest {
            status: JobStatus::Error,
            operation: BulkOperation::Retry,
            size: 45,
        })
        .unwrap();
    h.service.host().wait(BULK_INSTANCE_ID).await.unwrap();

    let status = h.service.bulk_status().unwrap();
    assert!(!status.running);
    assert_eq!(status.status, "completed");
    assert_eq!(status.error, None);

    for id in ids {
        let job = h.wait_job(id).await;
        assert_eq!(job.status, JobStatus::Done, "job {}", id);
        assert_eq!(job.last_error, None);
    }
    assert_eq!(h.client.submissions().await.len(), 45);
    assert_eq!(h.service.store().count(Some(JobStatus::Error)).unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_escalated_failure_waits_for_operator() {
    let temp_dir = TempDir::new().unwrap();
    let h = TestHarness::new(&temp_dir.path().join("test.db"), 1);
    h.notifier
        .push_failure(NotifyError::Http {
            status: 422,
            message: "unknown collection".to_string(),
        })
        .await;
    let mut events = h.service.monitor().subscribe();

    let id = h.submit("item.zip");
    let pending = h.wait_for_status(id, JobStatus::Pending).await;

    assert!(pending.decision_token.is_some());
    assert!(pending
        .last_error
        .as_deref()
        .unwrap()
        .contains("unknown collection"));
    // The slot is released before receipts are delivered
    assert_eq!(h.in_use(), 0);

    // A second job can use the pipeline while the first one waits
    let other = h.submit("other.zip");
    assert_eq!(h.wait_job(other).await.status, JobStatus::Done);

    h.service.decide(id, "abandon").unwrap();
    let job = h.wait_job(id).await;
    assert_eq!(job.status, JobStatus::Abandoned);
    assert!(job.completed_at.is_some());
    assert_eq!(job.aip_id.as_deref(), Some("sip-transfer-1"));

    let mut statuses = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.job_id() != id {
            continue;
        }
        let job = match event {
            MonitorEvent::JobCreated { job, .. } | MonitorEvent::JobUpdated { job, .. } => job,
        };
        if statuses.last() != Some(&job.status) {
            statuses.push(job.status);
        }
    }
    assert_eq!(statuses.first(), Some(&JobStatus::New));
    assert!(statuses.contains(&JobStatus::Pending));
    assert_eq!(statuses.last(), Some(&JobStatus::Abandoned));
}

#[tokio::test(start_paused = true)]
async fn test_restart_recovers_interrupted_jobs() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    // Rows left behind by a process that died mid-flight
    let (running, waiting) = {
        let store = SqliteJobStore::new(&db_path).unwrap();
        let mut ids = Vec::new();
        for key in ["running.zip", "waiting.zip"] {
            let job = store
                .create(CreateJobRequest {
                    name: key.to_string(),
                    workflow: WorkflowHandle {
                        instance_id: format!("processing-workflow-{}", key),
                        run_id: "run-1".to_string(),
                    },
                    pipeline_name: "am".to_string(),
                    origin_id: None,
                    event: job_event(key, &["am"]),
                })
                .unwrap();
            ids.push(job.id);
        }
        store.set_status_in_progress(ids[0], None).unwrap();
        store
            .set_status_pending(ids[1], "token-1", "receipt rejected")
            .unwrap();
        (ids[0], ids[1])
    };

    let h = TestHarness::new(&db_path, 1);
    assert_eq!(h.service.recover().unwrap(), 2);

    for id in [running, waiting] {
        let job = h.service.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.last_error.as_deref(), Some(INTERRUPTED_BY_RESTART));
        assert_eq!(job.decision_token, None);
    }
    assert_eq!(h.service.recover().unwrap(), 0);

    let execution = h.service.retry(running).unwrap();
    assert_eq!(execution.instance_id, "processing-workflow-running.zip");
    let job = h.wait_job(running).await;
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.last_error, None);
}
