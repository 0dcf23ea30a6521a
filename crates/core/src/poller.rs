//! Bounded watcher for asynchronous external status.
//!
//! [`PollingRetryEngine::run`] drives a status check on a fixed interval until
//! it reports success or a terminal failure. Transient failures are tolerated
//! for a bounded time: the deadline clock starts at the first transient failure
//! and is reset whenever the check reports work in progress, so a long-running
//! but healthy unit never trips it.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::host::{ActivityContext, ActivityError};
use crate::metrics::POLL_ATTEMPTS;

/// Default time transient failures are tolerated.
pub const DEFAULT_RETRY_DEADLINE: Duration = Duration::from_secs(10 * 60);

/// Default interval between two status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Classified result of one status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Success(T),
    /// The external unit is still being worked on.
    InProgress,
    /// The check failed in a way that may resolve itself (timeouts, 5xx).
    Transient(String),
    /// The check failed in a way retrying cannot fix.
    Terminal(String),
}

impl<T> PollOutcome<T> {
    fn label(&self) -> &'static str {
        match self {
            PollOutcome::Success(_) => "success",
            PollOutcome::InProgress => "in_progress",
            PollOutcome::Transient(_) => "transient",
            PollOutcome::Terminal(_) => "terminal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    #[error("{0}")]
    Terminal(String),

    #[error("retry deadline exceeded after {}s: {last_error}", elapsed.as_secs())]
    DeadlineExceeded { last_error: String, elapsed: Duration },

    #[error("polling cancelled")]
    Cancelled,
}

impl From<PollError> for ActivityError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::Cancelled => ActivityError::Cancelled,
            other => ActivityError::NonRetryable(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    /// How long an unbroken run of transient failures is tolerated.
    pub deadline: Duration,
    /// Budget of a single status check; exceeding it counts as transient.
    pub attempt_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            deadline: DEFAULT_RETRY_DEADLINE,
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Serialize)]
struct PollProgress<'a> {
    attempt: u32,
    last_outcome: Option<&'a str>,
}

pub struct PollingRetryEngine {
    config: PollConfig,
}

impl PollingRetryEngine {
    pub fn new(config: PollConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Run `check` until it succeeds, fails terminally, or transient failures
    /// outlast the deadline. Heartbeats through `ctx` on every attempt.
    pub async fn run<T, F, Fut>(&self, ctx: &ActivityContext, mut check: F) -> Result<T, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PollOutcome<T>>,
    {
        let mut failing_since: Option<Instant> = None;
        let mut last_outcome: Option<String> = None;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            ctx.heartbeat(&PollProgress {
                attempt,
                last_outcome: last_outcome.as_deref(),
            });

            let outcome = tokio::select! {
                _ = ctx.cancellation().cancelled() => return Err(PollError::Cancelled),
                result = tokio::time::timeout(self.config.attempt_timeout, check()) => {
                    result.unwrap_or_else(|_| {
                        PollOutcome::Transient("status check timed out".to_string())
                    })
                }
            };
            POLL_ATTEMPTS.with_label_values(&[outcome.label()]).inc();

            match outcome {
                PollOutcome::Success(value) => {
                    debug!(activity = ctx.name(), attempt, "Poll succeeded");
                    return Ok(value);
                }
                PollOutcome::Terminal(err) => {
                    warn!(activity = ctx.name(), attempt, error = %err, "Poll failed terminally");
                    return Err(PollError::Terminal(err));
                }
                PollOutcome::InProgress => {
                    failing_since = None;
                    last_outcome = Some("in progress".to_string());
                }
                PollOutcome::Transient(err) => {
                    let since = *failing_since.get_or_insert_with(Instant::now);
                    let elapsed = since.elapsed();
                    if elapsed > self.config.deadline {
                        warn!(
                            activity = ctx.name(),
                            attempt,
                            error = %err,
                            elapsed_secs = elapsed.as_secs(),
                            "Poll retry deadline exceeded"
                        );
                        return Err(PollError::DeadlineExceeded {
                            last_error: err,
                            elapsed,
                        });
                    }
                    debug!(activity = ctx.name(), attempt, error = %err, "Transient poll failure");
                    last_outcome = Some(err);
                }
            }

            tokio::select! {
                _ = ctx.cancellation().cancelled() => return Err(PollError::Cancelled),
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn engine(interval_secs: u64, deadline_secs: u64) -> PollingRetryEngine {
        PollingRetryEngine::new(PollConfig {
            interval: Duration::from_secs(interval_secs),
            deadline: Duration::from_secs(deadline_secs),
            attempt_timeout: Duration::from_secs(10),
        })
    }

    fn scripted(
        outcomes: Vec<PollOutcome<&'static str>>,
    ) -> (
        std::sync::Arc<std::sync::Mutex<u32>>,
        impl FnMut() -> std::future::Ready<PollOutcome<&'static str>>,
    ) {
        let calls = std::sync::Arc::new(std::sync::Mutex::new(0));
        let counter = std::sync::Arc::clone(&calls);
        let mut script: VecDeque<_> = outcomes.into();
        let check = move || {
            *counter.lock().unwrap() += 1;
            let next = script
                .pop_front()
                .unwrap_or(PollOutcome::Transient("exhausted".to_string()));
            std::future::ready(next)
        };
        (calls, check)
    }

    #[tokio::test(start_paused = true)]
    async fn test_converges_after_in_progress_observations() {
        let ctx = ActivityContext::detached("poll-transfer");
        let (calls, check) = scripted(vec![
            PollOutcome::InProgress,
            PollOutcome::InProgress,
            PollOutcome::Success("sip-1"),
        ]);

        let result = engine(5, 1).run(&ctx, check).await;

        assert_eq!(result, Ok("sip-1"));
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_progress_resets_deadline_clock() {
        let ctx = ActivityContext::detached("poll-ingest");
        let start = Instant::now();
        let (calls, check) = scripted(vec![
            PollOutcome::Transient("502".to_string()),
            PollOutcome::InProgress,
            PollOutcome::Transient("502".to_string()),
            PollOutcome::InProgress,
            PollOutcome::Transient("502".to_string()),
            PollOutcome::Success("done"),
        ]);

        // Total elapsed time (25s) exceeds the 8s deadline several times over.
        let result = engine(5, 8).run(&ctx, check).await;

        assert_eq!(result, Ok("done"));
        assert_eq!(*calls.lock().unwrap(), 6);
        assert!(start.elapsed() > Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_converts_transient_into_terminal() {
        let ctx = ActivityContext::detached("poll-transfer");
        let start = Instant::now();
        let (calls, check) = scripted(vec![]);

        let result = engine(5, 600).run(&ctx, check).await;

        match result {
            Err(PollError::DeadlineExceeded { elapsed, .. }) => {
                assert!(elapsed > Duration::from_secs(600));
            }
            other => panic!("expected deadline error, got {:?}", other),
        }
        // Attempts at t = 0, 5, ..., 600 are tolerated; t = 605 is the first past the deadline.
        assert_eq!(*calls.lock().unwrap(), 122);
        assert!(start.elapsed() >= Duration::from_secs(605));
        assert!(start.elapsed() < Duration::from_secs(606));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_aborts_immediately() {
        let ctx = ActivityContext::detached("poll-transfer");
        let (calls, check) = scripted(vec![
            PollOutcome::InProgress,
            PollOutcome::Terminal(
                "transfer is in a state that we can't handle: FAILED".to_string(),
            ),
            PollOutcome::Success("never"),
        ]);

        let result = engine(5, 600).run(&ctx, check).await;

        assert!(matches!(result, Err(PollError::Terminal(_))));
        assert_eq!(*calls.lock().unwrap(), 2);
        assert_eq!(
            ActivityError::from(result.unwrap_err()),
            ActivityError::NonRetryable(
                "transfer is in a state that we can't handle: FAILED".to_string()
            )
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_on_every_attempt() {
        let ctx = ActivityContext::detached("poll-transfer");
        let (_, check) = scripted(vec![
            PollOutcome::InProgress,
            PollOutcome::Transient("timeout".to_string()),
            PollOutcome::Success("sip"),
        ]);

        engine(1, 60).run(&ctx, check).await.unwrap();

        assert_eq!(
            ctx.last_heartbeat(),
            Some(serde_json::json!({"attempt": 3, "last_outcome": "timeout"}))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_polling() {
        let ctx = ActivityContext::detached("poll-transfer");
        ctx.cancellation().cancel();
        let (_, check) = scripted(vec![PollOutcome::InProgress]);

        let result = engine(5, 60).run(&ctx, check).await;
        assert_eq!(result, Err(PollError::Cancelled));
    }
}
