//! Operator escalation of persistently failing work.
//!
//! [`AsyncDecisionController::run`] executes a unit of work under its retry
//! policy. When the policy gives up, the job is parked in `Pending` with a
//! continuation token and the controller waits for an operator decision
//! delivered through [`ContinuationRegistry::complete`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::events::MonitorHub;
use crate::host::{
    ActivityContext, ActivityError, ActivityOptions, ContinuationError, ContinuationRegistry,
    WorkflowContext,
};
use crate::job::JobStore;
use crate::metrics::DECISIONS;

use super::{persist, WorkflowError};

/// Operator answer to a failed unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Run the unit again under its full retry policy.
    Retry,
    /// Run the unit exactly once more, without retries.
    RetryOnce,
    Abandon,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Retry => "retry",
            Decision::RetryOnce => "retry_once",
            Decision::Abandon => "abandon",
        }
    }

    /// Parse free text such as `Retry`, `retry once` or `retry-once`.
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "retry" => Some(Decision::Retry),
            "retry_once" => Some(Decision::RetryOnce),
            "abandon" => Some(Decision::Abandon),
            _ => None,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
pub struct AsyncDecisionController {
    store: Arc<dyn JobStore>,
    continuations: ContinuationRegistry,
    monitor: MonitorHub,
    /// Longest wait for a decision before the job is abandoned.
    ceiling: Duration,
}

impl AsyncDecisionController {
    pub fn new(
        store: Arc<dyn JobStore>,
        continuations: ContinuationRegistry,
        monitor: MonitorHub,
        ceiling: Duration,
    ) -> Self {
        Self {
            store,
            continuations,
            monitor,
            ceiling,
        }
    }

    pub fn continuations(&self) -> &ContinuationRegistry {
        &self.continuations
    }

    /// Run `unit` for `job_id`, escalating to an operator whenever it fails.
    pub async fn run<T, F, Fut>(
        &self,
        ctx: &WorkflowContext,
        job_id: i64,
        name: &str,
        options: &ActivityOptions,
        mut unit: F,
    ) -> Result<T, WorkflowError>
    where
        F: FnMut(ActivityContext) -> Fut,
        Fut: Future<Output = Result<T, ActivityError>>,
    {
        let mut current = options.clone();
        loop {
            let err = match ctx.execute_activity(name, &current, &mut unit).await {
                Ok(value) => return Ok(value),
                Err(ActivityError::Cancelled) => return Err(WorkflowError::Cancelled),
                Err(err) => err,
            };

            warn!(job_id, activity = name, error = %err, "Activity failed, waiting for a decision");
            let decision = self.request_decision(ctx, job_id, &err).await?;
            info!(job_id, activity = name, decision = %decision, "Decision received");

            current = match decision {
                Decision::Retry => options.clone(),
                Decision::RetryOnce => options.clone().without_retry(),
                Decision::Abandon => return Err(WorkflowError::Abandoned(err.to_string())),
            };
            persist(ctx, &self.store, &self.monitor, |store| {
                store.set_status_in_progress(job_id, None)
            })
            .await?;
        }
    }

    async fn request_decision(
        &self,
        ctx: &WorkflowContext,
        job_id: i64,
        err: &ActivityError,
    ) -> Result<Decision, WorkflowError> {
        let continuation = self.continuations.register();
        let token = continuation.token().to_string();
        let reason = err.to_string();
        persist(ctx, &self.store, &self.monitor, |store| {
            store.set_status_pending(job_id, &token, &reason)
        })
        .await?;

        match continuation.wait(self.ceiling, ctx.cancellation()).await {
            Ok(raw) => match Decision::parse(&raw) {
                Some(decision) => {
                    DECISIONS.with_label_values(&[decision.as_str()]).inc();
                    Ok(decision)
                }
                None => Err(WorkflowError::UnknownDecision(raw)),
            },
            Err(ContinuationError::TimedOut) => {
                warn!(job_id, "No decision before the ceiling, abandoning");
                DECISIONS.with_label_values(&["timeout"]).inc();
                Ok(Decision::Abandon)
            }
            Err(ContinuationError::Cancelled) => Err(WorkflowError::Cancelled),
            Err(e @ ContinuationError::UnknownToken) => {
                Err(WorkflowError::Activity(ActivityError::non_retryable(e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Execution, RetryPolicy};
    use crate::job::{CreateJobRequest, JobStatus, SqliteJobStore, WorkflowHandle};
    use crate::testing::fixtures::job_event;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Harness {
        store: Arc<SqliteJobStore>,
        controller: AsyncDecisionController,
        ctx: WorkflowContext,
        job_id: i64,
        calls: Arc<AtomicU32>,
    }

    fn harness(ceiling: Duration) -> Harness {
        let store = Arc::new(SqliteJobStore::in_memory().unwrap());
        let job = store
            .create(CreateJobRequest {
                name: "item.zip".to_string(),
                workflow: WorkflowHandle::default(),
                pipeline_name: "am".to_string(),
                origin_id: None,
                event: job_event("item.zip", &["am"]),
            })
            .unwrap();
        store.set_status_in_progress(job.id, None).unwrap();

        let dyn_store: Arc<dyn JobStore> = store.clone();
        let controller = AsyncDecisionController::new(
            dyn_store,
            ContinuationRegistry::new(),
            MonitorHub::default(),
            ceiling,
        );
        Harness {
            store,
            controller,
            ctx: WorkflowContext::new(Execution {
                instance_id: "processing-workflow-test".to_string(),
                run_id: "run".to_string(),
            }),
            job_id: job.id,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    fn two_attempts() -> ActivityOptions {
        ActivityOptions::new().with_retry(RetryPolicy {
            initial_interval: Duration::from_millis(10),
            backoff_coefficient: 1.0,
            maximum_interval: Duration::from_millis(10),
            expiration: None,
            maximum_attempts: 2,
        })
    }

    /// Run the controller in the background with a unit that fails until
    /// call number `succeed_on`.
    fn spawn_run(
        h: &Harness,
        succeed_on: u32,
    ) -> tokio::task::JoinHandle<Result<u32, WorkflowError>> {
        let controller = h.controller.clone();
        let ctx = h.ctx.clone();
        let job_id = h.job_id;
        let calls = Arc::clone(&h.calls);
        tokio::spawn(async move {
            controller
                .run(&ctx, job_id, "notify", &two_attempts(), move |_| {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n >= succeed_on {
                            Ok(n)
                        } else {
                            Err(ActivityError::retryable(format!("delivery {} failed", n)))
                        }
                    }
                })
                .await
        })
    }

    /// Wait until the job is pending on a token other than `previous`.
    async fn next_token(h: &Harness, previous: Option<&str>) -> String {
        loop {
            let job = h.store.get(h.job_id).unwrap().unwrap();
            if let (JobStatus::Pending, Some(token)) = (job.status, job.decision_token.as_deref()) {
                if Some(token) != previous {
                    assert!(job.completed_at.is_none());
                    return token.to_string();
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn decide(h: &Harness, token: &str, option: &str) {
        h.controller
            .continuations()
            .complete(token, option)
            .unwrap();
    }

    #[test]
    fn test_parse_decisions() {
        assert_eq!(Decision::parse("Retry"), Some(Decision::Retry));
        assert_eq!(Decision::parse(" retry once "), Some(Decision::RetryOnce));
        assert_eq!(Decision::parse("RETRY-ONCE"), Some(Decision::RetryOnce));
        assert_eq!(Decision::parse("retry_once"), Some(Decision::RetryOnce));
        assert_eq!(Decision::parse("abandon"), Some(Decision::Abandon));
        assert_eq!(Decision::parse("later"), None);
        assert_eq!(Decision::parse(""), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_needs_no_decision() {
        let h = harness(Duration::from_secs(3600));
        let result = spawn_run(&h, 2).await.unwrap();
        assert_eq!(result.unwrap(), 2);
        assert_eq!(
            h.store.get(h.job_id).unwrap().unwrap().status,
            JobStatus::InProgress
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_reapplies_full_policy() {
        let h = harness(Duration::from_secs(3600));
        let run = spawn_run(&h, 4);

        let token = next_token(&h, None).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
        decide(&h, &token, "retry");

        // Call 3 fails and is retried by the policy; call 4 succeeds.
        assert_eq!(run.await.unwrap().unwrap(), 4);
        let job = h.store.get(h.job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::InProgress);
        assert!(job.decision_token.is_none());
        assert!(job.completed_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_once_failure_requests_another_decision() {
        let h = harness(Duration::from_secs(3600));
        let run = spawn_run(&h, 4);

        let first = next_token(&h, None).await;
        decide(&h, &first, "retry once");

        let second = next_token(&h, Some(&first)).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 3);
        let job = h.store.get(h.job_id).unwrap().unwrap();
        assert_eq!(job.last_error.as_deref(), Some("delivery 3 failed"));

        decide(&h, &second, "retry_once");
        assert_eq!(run.await.unwrap().unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_stops_attempts() {
        let h = harness(Duration::from_secs(3600));
        let run = spawn_run(&h, u32::MAX);

        let token = next_token(&h, None).await;
        decide(&h, &token, "abandon");

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, WorkflowError::Abandoned(ref msg) if msg == "delivery 2 failed"));
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_expiry_abandons() {
        let h = harness(Duration::from_secs(7 * 24 * 3600));
        let err = spawn_run(&h, u32::MAX).await.unwrap().unwrap_err();
        assert!(matches!(err, WorkflowError::Abandoned(_)));
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_decision_is_fatal() {
        let h = harness(Duration::from_secs(3600));
        let run = spawn_run(&h, u32::MAX);

        let token = next_token(&h, None).await;
        decide(&h, &token, "maybe");

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownDecision(ref raw) if raw == "maybe"));
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_while_waiting() {
        let h = harness(Duration::from_secs(3600));
        let run = spawn_run(&h, u32::MAX);

        let token = next_token(&h, None).await;
        h.ctx.cancellation().cancel();

        assert!(matches!(
            run.await.unwrap(),
            Err(WorkflowError::Cancelled)
        ));
        assert!(!h.controller.continuations().is_pending(&token));
    }
}
