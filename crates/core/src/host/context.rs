//! The view a workflow instance has of the host.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::activity::heartbeat_watchdog;
use super::{ActivityContext, ActivityError, ActivityOptions};

/// Identity of one run of a workflow instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub instance_id: String,
    pub run_id: String,
}

/// Execution context of a workflow instance.
///
/// Cheap to clone; clones share cancellation and progress.
#[derive(Clone)]
pub struct WorkflowContext {
    execution: Execution,
    cancel: CancellationToken,
    progress: Arc<watch::Sender<Option<Value>>>,
}

impl WorkflowContext {
    /// Context that is not attached to any host instance.
    pub fn new(execution: Execution) -> Self {
        let (progress, _) = watch::channel(None);
        Self::attached(execution, CancellationToken::new(), Arc::new(progress))
    }

    pub(crate) fn attached(
        execution: Execution,
        cancel: CancellationToken,
        progress: Arc<watch::Sender<Option<Value>>>,
    ) -> Self {
        Self {
            execution,
            cancel,
            progress,
        }
    }

    pub fn execution(&self) -> &Execution {
        &self.execution
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A context for compensation work: same instance, not cancelled by the
    /// instance's cancellation.
    pub fn disconnected(&self) -> Self {
        Self {
            execution: self.execution.clone(),
            cancel: CancellationToken::new(),
            progress: Arc::clone(&self.progress),
        }
    }

    /// Durable timer. Fails with [`ActivityError::Cancelled`] when the
    /// instance is cancelled first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), ActivityError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ActivityError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Publish query-visible progress details for this instance.
    pub fn record_progress<T: Serialize>(&self, details: &T) {
        if let Ok(value) = serde_json::to_value(details) {
            self.progress.send_replace(Some(value));
        }
    }

    /// Latest progress recorded by the instance or one of its activities.
    pub fn progress(&self) -> Option<Value> {
        self.progress.borrow().clone()
    }

    /// Run an activity, retrying failed attempts according to `options`.
    pub async fn execute_activity<T, F, Fut>(
        &self,
        name: &str,
        options: &ActivityOptions,
        mut activity: F,
    ) -> Result<T, ActivityError>
    where
        F: FnMut(ActivityContext) -> Fut,
        Fut: Future<Output = Result<T, ActivityError>>,
    {
        let started = Instant::now();
        let mut attempt = 1;

        loop {
            let err = match self.run_attempt(name, options, attempt, &mut activity).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let delay = match &options.retry {
                Some(policy) if err.is_retryable() => policy.next_delay(attempt, started.elapsed()),
                _ => None,
            };
            let Some(delay) = delay else {
                debug!(activity = name, attempt, error = %err, "Activity failed");
                return Err(err);
            };

            warn!(
                activity = name,
                attempt,
                error = %err,
                retry_in_ms = delay.as_millis() as u64,
                "Activity attempt failed, retrying"
            );
            self.sleep(delay).await?;
            attempt += 1;
        }
    }

    async fn run_attempt<T, F, Fut>(
        &self,
        name: &str,
        options: &ActivityOptions,
        attempt: u32,
        activity: &mut F,
    ) -> Result<T, ActivityError>
    where
        F: FnMut(ActivityContext) -> Fut,
        Fut: Future<Output = Result<T, ActivityError>>,
    {
        let (beats, beats_rx) = watch::channel(());
        let beats = Arc::new(beats);
        let token = self.cancel.child_token();
        let ctx = ActivityContext::new(
            name,
            attempt,
            token.clone(),
            Arc::clone(&beats),
            Arc::clone(&self.progress),
        );

        let start_to_close = async {
            match options.start_to_close {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ActivityError::Cancelled),
            result = activity(ctx) => result,
            _ = heartbeat_watchdog(beats_rx, options.heartbeat_timeout) => {
                Err(ActivityError::HeartbeatTimeout)
            }
            _ = start_to_close => Err(ActivityError::StartToCloseTimeout),
        };

        // Anything the attempt spawned must stop with it.
        token.cancel();
        result
    }
}
