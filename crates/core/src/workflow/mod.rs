//! Workflows driving jobs through pipelines, and the operator service on top.
//!
//! - [`ProcessingWorkflow`]: the per-job state machine.
//! - [`AsyncDecisionController`]: turns persistent failures into operator decisions.
//! - [`BulkOperationWorkflow`]: re-applies an operation across many jobs.
//! - [`JobService`]: the operations exposed to operators.

mod bulk;
mod decision;
pub mod policies;
mod processing;
mod service;

pub use bulk::{
    BulkOperation, BulkOperationWorkflow, BulkProgress, BulkRequest, JobOperator, BULK_INSTANCE_ID,
    DEFAULT_PAGE_SIZE,
};
pub use decision::{AsyncDecisionController, Decision};
pub use processing::{ProcessingInput, ProcessingWorkflow};
pub use service::{
    BulkStatus, JobService, JobWorkflowHandle, ServiceError, INTERRUPTED_BY_RESTART,
};

use std::sync::Arc;

use thiserror::Error;

use crate::events::MonitorHub;
use crate::host::{ActivityError, WorkflowContext};
use crate::job::{Job, JobStore, JobStoreError};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{0}")]
    Activity(ActivityError),

    /// An operator, or the decision ceiling, gave up on the job.
    #[error("abandoned: {0}")]
    Abandoned(String),

    /// A decision value no handler understands.
    #[error("unknown decision option: {0:?}")]
    UnknownDecision(String),

    #[error("workflow cancelled")]
    Cancelled,

    #[error("{0}")]
    Unsupported(String),

    #[error(transparent)]
    Store(#[from] JobStoreError),
}

impl From<ActivityError> for WorkflowError {
    fn from(err: ActivityError) -> Self {
        match err {
            ActivityError::Cancelled => WorkflowError::Cancelled,
            other => WorkflowError::Activity(other),
        }
    }
}

/// Apply a job transition as a local activity and publish the result.
pub(crate) async fn persist<F>(
    ctx: &WorkflowContext,
    store: &Arc<dyn JobStore>,
    monitor: &MonitorHub,
    op: F,
) -> Result<Job, WorkflowError>
where
    F: Fn(&dyn JobStore) -> Result<Job, JobStoreError> + Send + Sync,
{
    let job = ctx
        .execute_activity("update-job", &policies::local(), |_| {
            let result = op(store.as_ref()).map_err(|e| match e {
                JobStoreError::NotFound(_) => ActivityError::non_retryable(e),
                other => ActivityError::retryable(other),
            });
            std::future::ready(result)
        })
        .await?;
    monitor.job_updated(&job);
    Ok(job)
}
