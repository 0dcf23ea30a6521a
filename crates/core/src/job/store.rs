//! Job storage trait and types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{Job, JobEvent, JobStatus, NewProcessingAction, ProcessingAction, WorkflowHandle};

/// Error type for job store operations.
#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("Job not found: {0}")]
    NotFound(i64),

    #[error("Database error: {0}")]
    Database(String),
}

/// Request to create a new job.
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    pub name: String,
    pub workflow: WorkflowHandle,
    pub pipeline_name: String,
    pub origin_id: Option<String>,
    /// Workflow input, kept so the job can be retried.
    pub event: JobEvent,
}

/// Filter for paginated job listings, ordered by id descending.
#[derive(Debug, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    /// Only jobs with `id <= cursor`.
    pub cursor: Option<i64>,
    pub limit: u32,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            status: None,
            cursor: None,
            limit: 20,
        }
    }
}

impl JobFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_cursor(mut self, cursor: i64) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }
}

/// One page of jobs.
#[derive(Debug, Clone)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    /// Cursor of the next page, `None` when this is the last one.
    pub next_cursor: Option<i64>,
}

/// A status transition.
///
/// `completed_at` is derived from the status: terminal statuses store the given
/// time (or now), every other status clears it. Optional fields left as `None`
/// keep their stored value.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: JobStatus,
    pub workflow: Option<WorkflowHandle>,
    pub transfer_id: Option<String>,
    pub aip_id: Option<String>,
    pub pipeline_id: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Replaces the stored last error; `None` clears it.
    pub last_error: Option<String>,
}

impl StatusUpdate {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            workflow: None,
            transfer_id: None,
            aip_id: None,
            pipeline_id: None,
            completed_at: None,
            last_error: None,
        }
    }

    pub fn with_workflow(mut self, workflow: WorkflowHandle) -> Self {
        self.workflow = Some(workflow);
        self
    }

    pub fn with_transfer_id(mut self, transfer_id: impl Into<String>) -> Self {
        self.transfer_id = Some(transfer_id.into());
        self
    }

    pub fn with_aip_id(mut self, aip_id: impl Into<String>) -> Self {
        self.aip_id = Some(aip_id.into());
        self
    }

    pub fn with_pipeline_id(mut self, pipeline_id: impl Into<String>) -> Self {
        self.pipeline_id = Some(pipeline_id.into());
        self
    }

    pub fn with_completed_at(mut self, completed_at: DateTime<Utc>) -> Self {
        self.completed_at = Some(completed_at);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }
}

/// Persistence for jobs and their processing actions.
///
/// The orchestration engine is the only writer.
pub trait JobStore: Send + Sync {
    /// Create a job in status `New`.
    fn create(&self, request: CreateJobRequest) -> Result<Job, JobStoreError>;

    fn get(&self, id: i64) -> Result<Option<Job>, JobStoreError>;

    /// The event the job was created from.
    fn workflow_input(&self, id: i64) -> Result<Option<JobEvent>, JobStoreError>;

    fn list(&self, filter: &JobFilter) -> Result<JobPage, JobStoreError>;

    fn count(&self, status: Option<JobStatus>) -> Result<i64, JobStoreError>;

    fn update_status(&self, id: i64, update: StatusUpdate) -> Result<Job, JobStoreError>;

    /// Move to `InProgress`, clearing any decision token and completion time.
    fn set_status_in_progress(
        &self,
        id: i64,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<Job, JobStoreError>;

    /// Move to `Pending`, storing the continuation token to resume the job.
    fn set_status_pending(
        &self,
        id: i64,
        decision_token: &str,
        reason: &str,
    ) -> Result<Job, JobStoreError>;

    /// Record a pipeline sub-step. Returns `false` if it was already recorded.
    fn append_action(&self, action: NewProcessingAction) -> Result<bool, JobStoreError>;

    fn list_actions(&self, job_id: i64) -> Result<Vec<ProcessingAction>, JobStoreError>;
}
