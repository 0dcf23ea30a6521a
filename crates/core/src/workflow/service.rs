//! Operator-facing operations on jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::events::MonitorHub;
use crate::host::{Execution, HostError, InstanceStatus, WorkflowHost};
use crate::job::{
    parse_name, CreateJobRequest, Job, JobEvent, JobFilter, JobPage, JobStatus, JobStore,
    JobStoreError, ProcessingAction, StatusUpdate, WorkflowHandle,
};

use super::bulk::JobOperator;
use super::{
    BulkOperationWorkflow, BulkProgress, BulkRequest, ProcessingInput, ProcessingWorkflow,
    BULK_INSTANCE_ID,
};

/// Last error recorded on jobs found unfinished at startup.
pub const INTERRUPTED_BY_RESTART: &str = "interrupted by restart";

const RECOVERY_PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("job not found: {0}")]
    NotFound(i64),

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    NotRunning(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Store(#[from] JobStoreError),
}

/// A job and the workflow run started for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobWorkflowHandle {
    pub job_id: i64,
    pub instance_id: String,
    pub run_id: String,
}

/// State of the bulk workflow as shown to operators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkStatus {
    pub running: bool,
    /// Progress summary while running, the close status afterwards.
    pub status: String,
    pub workflow_id: String,
    pub run_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Entry point for everything an operator can do to jobs.
#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn JobStore>,
    host: Arc<WorkflowHost>,
    processing: Arc<ProcessingWorkflow>,
    bulk: Arc<BulkOperationWorkflow>,
    monitor: MonitorHub,
}

impl JobService {
    pub fn new(
        host: Arc<WorkflowHost>,
        processing: Arc<ProcessingWorkflow>,
        bulk: Arc<BulkOperationWorkflow>,
    ) -> Self {
        Self {
            store: Arc::clone(processing.store()),
            monitor: processing.monitor().clone(),
            host,
            processing,
            bulk,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn monitor(&self) -> &MonitorHub {
        &self.monitor
    }

    pub fn host(&self) -> &Arc<WorkflowHost> {
        &self.host
    }

    pub fn processing(&self) -> &Arc<ProcessingWorkflow> {
        &self.processing
    }

    /// Create one job per target pipeline and start its workflow.
    pub fn submit_event(&self, event: JobEvent) -> Result<Vec<JobWorkflowHandle>, ServiceError> {
        if event.key.trim().is_empty() {
            return Err(ServiceError::InvalidInput("event key is empty".to_string()));
        }
        if event.pipeline_names.is_empty() {
            return Err(ServiceError::InvalidInput(
                "event has no target pipelines".to_string(),
            ));
        }
        for name in &event.pipeline_names {
            self.processing
                .registry()
                .by_name(name)
                .map_err(|e| ServiceError::InvalidInput(e.to_string()))?;
        }

        let origin_id = parse_name(&event.key).map(|info| info.uuid);
        let mut handles = Vec::with_capacity(event.pipeline_names.len());
        for pipeline_name in &event.pipeline_names {
            let instance_id = format!("processing-workflow-{}", uuid::Uuid::new_v4());
            let job = self.store.create(CreateJobRequest {
                name: event.key.clone(),
                workflow: WorkflowHandle {
                    instance_id: instance_id.clone(),
                    run_id: String::new(),
                },
                pipeline_name: pipeline_name.clone(),
                origin_id: origin_id.clone(),
                event: event.clone(),
            })?;
            self.monitor.job_created(&job);

            let execution = self.start_processing(
                &instance_id,
                ProcessingInput {
                    job_id: job.id,
                    pipeline_name: pipeline_name.clone(),
                    event: event.clone(),
                },
            )?;
            info!(job_id = job.id, pipeline = %pipeline_name, key = %event.key, "Job submitted");
            handles.push(JobWorkflowHandle {
                job_id: job.id,
                instance_id: execution.instance_id,
                run_id: execution.run_id,
            });
        }
        Ok(handles)
    }

    fn start_processing(
        &self,
        instance_id: &str,
        input: ProcessingInput,
    ) -> Result<Execution, HostError> {
        let workflow = Arc::clone(&self.processing);
        self.host
            .start(instance_id, move |ctx| async move { workflow.run(ctx, input).await })
    }

    pub fn get(&self, job_id: i64) -> Result<Job, ServiceError> {
        self.store
            .get(job_id)?
            .ok_or(ServiceError::NotFound(job_id))
    }

    pub fn list(&self, filter: &JobFilter) -> Result<JobPage, ServiceError> {
        Ok(self.store.list(filter)?)
    }

    pub fn actions(&self, job_id: i64) -> Result<Vec<ProcessingAction>, ServiceError> {
        self.get(job_id)?;
        Ok(self.store.list_actions(job_id)?)
    }

    /// Start a new run of a finished job from its persisted event.
    pub fn retry(&self, job_id: i64) -> Result<Execution, ServiceError> {
        let job = self.get(job_id)?;
        if !job.status.is_terminal() {
            return Err(ServiceError::InvalidState(format!(
                "job {} is {}; only finished jobs can be retried",
                job_id, job.status
            )));
        }

        let instance_id = if job.workflow.instance_id.is_empty() {
            format!("processing-workflow-{}", uuid::Uuid::new_v4())
        } else {
            job.workflow.instance_id.clone()
        };
        let event = self
            .store
            .workflow_input(job_id)?
            .ok_or_else(|| HostError::HistoryNotFound(instance_id.clone()))?;

        let execution = self.start_processing(
            &instance_id,
            ProcessingInput {
                job_id,
                pipeline_name: job.pipeline_name.clone(),
                event,
            },
        )?;
        info!(job_id, run_id = %execution.run_id, "Job retried");
        Ok(execution)
    }

    /// Cancel the running workflow of a job.
    pub fn cancel(&self, job_id: i64) -> Result<(), ServiceError> {
        let job = self.get(job_id)?;
        match self.host.cancel(&job.workflow.instance_id) {
            Ok(()) => Ok(()),
            Err(HostError::NotFound(_) | HostError::NotRunning(_)) => Err(
                ServiceError::NotRunning(format!("job {} is not running", job_id)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    /// Deliver an operator decision to a job waiting for one.
    ///
    /// The option is passed through as given; the waiting workflow decides
    /// what it means.
    pub fn decide(&self, job_id: i64, option: &str) -> Result<(), ServiceError> {
        let option = option.trim();
        if option.is_empty() {
            return Err(ServiceError::InvalidInput(
                "missing decision option".to_string(),
            ));
        }

        let job = self.get(job_id)?;
        let not_waiting =
            || ServiceError::InvalidState("job is not awaiting a decision".to_string());
        let token = match (&job.status, &job.decision_token) {
            (JobStatus::Pending, Some(token)) => token.clone(),
            _ => return Err(not_waiting()),
        };

        self.processing
            .decisions()
            .continuations()
            .complete(&token, option)
            .map_err(|_| not_waiting())?;
        info!(job_id, option, "Decision delivered");
        Ok(())
    }

    /// Start the bulk workflow.
    pub fn bulk(&self, request: BulkRequest) -> Result<Execution, ServiceError> {
        if request.size == 0 {
            return Err(ServiceError::InvalidInput(
                "size must be greater than zero".to_string(),
            ));
        }

        let service = self.clone();
        let bulk = Arc::clone(&self.bulk);
        let started = self.host.start(BULK_INSTANCE_ID, move |ctx| async move {
            bulk.run(&ctx, request, &service).await.map(|_| ())
        });
        match started {
            Ok(execution) => Ok(execution),
            Err(HostError::AlreadyStarted { .. }) => Err(ServiceError::Conflict(
                "operation is already in progress".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    pub fn bulk_status(&self) -> Result<BulkStatus, ServiceError> {
        let description = match self.host.describe(BULK_INSTANCE_ID) {
            Ok(description) => description,
            Err(HostError::NotFound(_)) => return Ok(BulkStatus::default()),
            Err(e) => return Err(e.into()),
        };

        let running = description.status == InstanceStatus::Running;
        let status = if running {
            description
                .last_heartbeat
                .and_then(|value| serde_json::from_value::<BulkProgress>(value).ok())
                .map(|p| {
                    format!("Processing job {} (done: {})", p.current_job_id, p.processed_count)
                })
                .unwrap_or_else(|| InstanceStatus::Running.as_str().to_string())
        } else {
            description.status.as_str().to_string()
        };

        Ok(BulkStatus {
            running,
            status,
            workflow_id: description.instance_id,
            run_id: description.run_id,
            started_at: Some(description.started_at),
            closed_at: description.closed_at,
            error: description.error,
        })
    }

    /// Fail jobs left unfinished by a previous process so they can be retried.
    pub fn recover(&self) -> Result<usize, ServiceError> {
        let mut recovered = 0;
        for status in [JobStatus::Queued, JobStatus::InProgress, JobStatus::Pending] {
            let filter = JobFilter::new()
                .with_status(status)
                .with_limit(RECOVERY_PAGE_SIZE);
            loop {
                // Updated jobs leave the filter, so the first page is always fresh.
                let page = self.store.list(&filter)?;
                if page.jobs.is_empty() {
                    break;
                }
                for job in page.jobs {
                    let job = self.store.update_status(
                        job.id,
                        StatusUpdate::new(JobStatus::Error).with_error(INTERRUPTED_BY_RESTART),
                    )?;
                    self.monitor.job_updated(&job);
                    recovered += 1;
                }
            }
        }
        if recovered > 0 {
            warn!(count = recovered, "Recovered jobs interrupted by restart");
        }
        Ok(recovered)
    }

    /// Cancel running workflows and wait for their compensation to finish.
    pub async fn shutdown(&self, timeout: Duration) {
        self.host.shutdown(timeout).await;
    }
}

impl JobOperator for JobService {
    fn retry_job(&self, job_id: i64) -> Result<(), ServiceError> {
        self.retry(job_id).map(|_| ())
    }
}
