//! Workflow instance registry.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Execution, WorkflowContext};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("workflow {instance_id} is already started (run {run_id})")]
    AlreadyStarted { instance_id: String, run_id: String },

    #[error("workflow not found: {0}")]
    NotFound(String),

    /// The input needed to restart a workflow is gone.
    #[error("workflow {0} history does not exist")]
    HistoryNotFound(String),

    #[error("workflow {0} is not running")]
    NotRunning(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Running => "running",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Failed => "failed",
            InstanceStatus::Cancelled => "cancelled",
        }
    }
}

/// Snapshot of an instance, as returned by [`WorkflowHost::describe`].
#[derive(Debug, Clone, Serialize)]
pub struct InstanceDescription {
    pub instance_id: String,
    pub run_id: String,
    pub status: InstanceStatus,
    pub started_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Latest heartbeat or progress details.
    pub last_heartbeat: Option<Value>,
}

#[derive(Debug, Clone)]
struct Outcome {
    status: InstanceStatus,
    closed_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

struct Instance {
    run_id: String,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    outcome: watch::Receiver<Outcome>,
    progress: watch::Receiver<Option<Value>>,
}

impl Instance {
    fn outcome(&self) -> Outcome {
        let closed = self.outcome.has_changed().is_err();
        let outcome = self.outcome.borrow().clone();
        // A body that panicked never reports back.
        if closed && outcome.status == InstanceStatus::Running {
            return Outcome {
                status: InstanceStatus::Failed,
                closed_at: None,
                error: Some("workflow task aborted".to_string()),
            };
        }
        outcome
    }

    fn is_running(&self) -> bool {
        self.outcome().status == InstanceStatus::Running
    }
}

/// Starts workflow instances and tracks the latest run of each instance id.
///
/// At most one run per instance id is running at any time.
#[derive(Default)]
pub struct WorkflowHost {
    instances: Mutex<HashMap<String, Instance>>,
}

impl WorkflowHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn instances(&self) -> MutexGuard<'_, HashMap<String, Instance>> {
        // The map holds no invariants a panicking holder could break.
        self.instances
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a new run of `instance_id`.
    pub fn start<F, Fut, E>(&self, instance_id: &str, body: F) -> Result<Execution, HostError>
    where
        F: FnOnce(WorkflowContext) -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let mut instances = self.instances();
        if let Some(existing) = instances.get(instance_id) {
            if existing.is_running() {
                return Err(HostError::AlreadyStarted {
                    instance_id: instance_id.to_string(),
                    run_id: existing.run_id.clone(),
                });
            }
        }

        let execution = Execution {
            instance_id: instance_id.to_string(),
            run_id: uuid::Uuid::new_v4().to_string(),
        };
        let cancel = CancellationToken::new();
        let (progress_tx, progress_rx) = watch::channel(None);
        let (outcome_tx, outcome_rx) = watch::channel(Outcome {
            status: InstanceStatus::Running,
            closed_at: None,
            error: None,
        });

        let ctx =
            WorkflowContext::attached(execution.clone(), cancel.clone(), Arc::new(progress_tx));
        let future = body(ctx);
        let task_cancel = cancel.clone();
        let task_execution = execution.clone();

        tokio::spawn(async move {
            let result = future.await;
            let outcome = match result {
                Ok(()) => Outcome {
                    status: InstanceStatus::Completed,
                    closed_at: Some(Utc::now()),
                    error: None,
                },
                Err(e) => Outcome {
                    status: if task_cancel.is_cancelled() {
                        InstanceStatus::Cancelled
                    } else {
                        InstanceStatus::Failed
                    },
                    closed_at: Some(Utc::now()),
                    error: Some(e.to_string()),
                },
            };
            debug!(
                instance_id = %task_execution.instance_id,
                run_id = %task_execution.run_id,
                status = outcome.status.as_str(),
                "Workflow instance closed"
            );
            outcome_tx.send_replace(outcome);
        });

        info!(
            instance_id = %execution.instance_id,
            run_id = %execution.run_id,
            "Workflow instance started"
        );

        instances.insert(
            instance_id.to_string(),
            Instance {
                run_id: execution.run_id.clone(),
                started_at: Utc::now(),
                cancel,
                outcome: outcome_rx,
                progress: progress_rx,
            },
        );

        Ok(execution)
    }

    pub fn describe(&self, instance_id: &str) -> Result<InstanceDescription, HostError> {
        let instances = self.instances();
        let instance = instances
            .get(instance_id)
            .ok_or_else(|| HostError::NotFound(instance_id.to_string()))?;
        Ok(Self::description(instance_id, instance))
    }

    fn description(instance_id: &str, instance: &Instance) -> InstanceDescription {
        let outcome = instance.outcome();
        InstanceDescription {
            instance_id: instance_id.to_string(),
            run_id: instance.run_id.clone(),
            status: outcome.status,
            started_at: instance.started_at,
            closed_at: outcome.closed_at,
            error: outcome.error,
            last_heartbeat: instance.progress.borrow().clone(),
        }
    }

    pub fn is_running(&self, instance_id: &str) -> bool {
        self.instances()
            .get(instance_id)
            .map(Instance::is_running)
            .unwrap_or(false)
    }

    pub fn running_count(&self) -> usize {
        self.instances().values().filter(|i| i.is_running()).count()
    }

    /// Request cooperative cancellation of a running instance.
    pub fn cancel(&self, instance_id: &str) -> Result<(), HostError> {
        let instances = self.instances();
        let instance = instances
            .get(instance_id)
            .ok_or_else(|| HostError::NotFound(instance_id.to_string()))?;
        if !instance.is_running() {
            return Err(HostError::NotRunning(instance_id.to_string()));
        }
        info!(instance_id, run_id = %instance.run_id, "Cancelling workflow instance");
        instance.cancel.cancel();
        Ok(())
    }

    /// Wait until the current run of `instance_id` closes.
    pub async fn wait(&self, instance_id: &str) -> Result<InstanceDescription, HostError> {
        let mut outcome = {
            let instances = self.instances();
            let instance = instances
                .get(instance_id)
                .ok_or_else(|| HostError::NotFound(instance_id.to_string()))?;
            instance.outcome.clone()
        };

        while outcome.borrow().status == InstanceStatus::Running {
            if outcome.changed().await.is_err() {
                break;
            }
        }

        self.describe(instance_id)
    }

    /// Cancel every running instance and wait up to `timeout` for them to close.
    pub async fn shutdown(&self, timeout: Duration) {
        let running: Vec<String> = {
            let instances = self.instances();
            instances
                .iter()
                .filter(|(_, i)| i.is_running())
                .map(|(id, i)| {
                    i.cancel.cancel();
                    id.clone()
                })
                .collect()
        };
        if running.is_empty() {
            return;
        }

        info!(count = running.len(), "Waiting for workflow instances to close");
        let wait_all = futures::future::join_all(running.iter().map(|id| self.wait(id)));
        if tokio::time::timeout(timeout, wait_all).await.is_err() {
            warn!("Timed out waiting for workflow instances to close");
        }
    }
}
