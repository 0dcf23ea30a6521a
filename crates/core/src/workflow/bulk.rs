//! Batch re-application of an operation across many jobs.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::host::{ActivityError, HostError, WorkflowContext};
use crate::job::{JobFilter, JobPage, JobStatus, JobStore, JobStoreError};

use super::{policies, ServiceError, WorkflowError};

/// Instance id of the bulk workflow. Only one may run at a time.
pub const BULK_INSTANCE_ID: &str = "job-bulk-workflow";

/// Default number of jobs fetched per page.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkOperation {
    Retry,
    Cancel,
    Abandon,
}

impl BulkOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkOperation::Retry => "retry",
            BulkOperation::Cancel => "cancel",
            BulkOperation::Abandon => "abandon",
        }
    }
}

impl fmt::Display for BulkOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BulkOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "retry" => Ok(BulkOperation::Retry),
            "cancel" => Ok(BulkOperation::Cancel),
            "abandon" => Ok(BulkOperation::Abandon),
            other => Err(format!("unknown bulk operation: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkRequest {
    /// Jobs in this status are operated on.
    pub status: JobStatus,
    pub operation: BulkOperation,
    /// Maximum number of jobs to process.
    pub size: u64,
}

/// Live progress of a bulk run, reported through the instance's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkProgress {
    pub current_job_id: i64,
    pub processed_count: u64,
    pub cap: u64,
}

/// Applies single-job operations on behalf of a bulk run.
pub trait JobOperator: Send + Sync {
    fn retry_job(&self, job_id: i64) -> Result<(), ServiceError>;
}

/// Errors meaning the job is already moving again through another path.
fn is_tolerated(err: &ServiceError) -> bool {
    matches!(
        err,
        ServiceError::Host(HostError::AlreadyStarted { .. } | HostError::HistoryNotFound(_))
    )
}

pub struct BulkOperationWorkflow {
    store: Arc<dyn JobStore>,
    page_size: u32,
    /// Pause between two jobs, bounding the request rate against pipelines.
    pause: Duration,
}

impl BulkOperationWorkflow {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            page_size: DEFAULT_PAGE_SIZE,
            pause: Duration::from_millis(50),
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Run the batch. Returns the number of jobs processed.
    pub async fn run(
        &self,
        ctx: &WorkflowContext,
        request: BulkRequest,
        operator: &dyn JobOperator,
    ) -> Result<u64, WorkflowError> {
        match request.operation {
            BulkOperation::Retry => {}
            BulkOperation::Cancel => {
                return Err(WorkflowError::Unsupported(
                    "bulk cancel not supported yet".to_string(),
                ))
            }
            BulkOperation::Abandon => {
                return Err(WorkflowError::Unsupported(
                    "bulk abandon not supported yet".to_string(),
                ))
            }
        }

        info!(
            status = %request.status,
            operation = %request.operation,
            cap = request.size,
            "Bulk operation started"
        );

        let mut cursor = None;
        let mut processed: u64 = 0;
        loop {
            let page = self.fetch_page(ctx, request.status, cursor).await?;
            debug!(jobs = page.jobs.len(), cursor = ?cursor, "Fetched bulk page");

            for job in &page.jobs {
                if ctx.is_cancelled() {
                    return Err(WorkflowError::Cancelled);
                }

                match operator.retry_job(job.id) {
                    Ok(()) => {}
                    Err(e) if is_tolerated(&e) => {
                        debug!(job_id = job.id, error = %e, "Job already resumed, skipping");
                    }
                    Err(e) => {
                        warn!(job_id = job.id, error = %e, "Bulk operation aborted");
                        return Err(WorkflowError::Activity(ActivityError::non_retryable(
                            format!("error retrying job {}: {}", job.id, e),
                        )));
                    }
                }

                processed += 1;
                ctx.record_progress(&BulkProgress {
                    current_job_id: job.id,
                    processed_count: processed,
                    cap: request.size,
                });

                if request.size > 0 && processed >= request.size {
                    info!(processed, "Bulk operation reached its cap");
                    return Ok(processed);
                }
                ctx.sleep(self.pause).await?;
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => {
                    info!(processed, "Bulk operation finished");
                    return Ok(processed);
                }
            }
        }
    }

    async fn fetch_page(
        &self,
        ctx: &WorkflowContext,
        status: JobStatus,
        cursor: Option<i64>,
    ) -> Result<JobPage, WorkflowError> {
        let mut filter = JobFilter::new()
            .with_status(status)
            .with_limit(self.page_size);
        if let Some(cursor) = cursor {
            filter = filter.with_cursor(cursor);
        }

        let page = ctx
            .execute_activity("list-jobs", &policies::local(), |_| {
                let result = self
                    .store
                    .list(&filter)
                    .map_err(|e: JobStoreError| ActivityError::retryable(e));
                std::future::ready(result)
            })
            .await?;
        Ok(page)
    }
}
