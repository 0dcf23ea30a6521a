//! Activity attempts, heartbeats and retry policies.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Failure of an activity attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActivityError {
    /// Never retried, whatever the policy says.
    #[error("{0}")]
    NonRetryable(String),

    #[error("{0}")]
    Retryable(String),

    /// No heartbeat arrived within the heartbeat timeout.
    #[error("activity heartbeat timed out")]
    HeartbeatTimeout,

    #[error("activity exceeded its start-to-close timeout")]
    StartToCloseTimeout,

    #[error("activity cancelled")]
    Cancelled,
}

impl ActivityError {
    pub fn non_retryable(msg: impl fmt::Display) -> Self {
        ActivityError::NonRetryable(msg.to_string())
    }

    pub fn retryable(msg: impl fmt::Display) -> Self {
        ActivityError::Retryable(msg.to_string())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ActivityError::Retryable(_)
                | ActivityError::HeartbeatTimeout
                | ActivityError::StartToCloseTimeout
        )
    }
}

/// Exponential backoff between activity attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub maximum_interval: Duration,
    /// Total time after which no more attempts are scheduled.
    pub expiration: Option<Duration>,
    /// Zero means unlimited.
    pub maximum_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(100),
            expiration: None,
            maximum_attempts: 0,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based), or `None` when
    /// the policy is exhausted.
    pub fn next_delay(&self, attempt: u32, elapsed: Duration) -> Option<Duration> {
        if self.maximum_attempts > 0 && attempt >= self.maximum_attempts {
            return None;
        }

        let factor = self
            .backoff_coefficient
            .max(1.0)
            .powi(attempt.saturating_sub(1).min(i32::MAX as u32) as i32);
        let secs = (self.initial_interval.as_secs_f64() * factor)
            .min(self.maximum_interval.as_secs_f64());
        let delay = Duration::from_secs_f64(secs);

        match self.expiration {
            Some(expiration) if elapsed + delay > expiration => None,
            _ => Some(delay),
        }
    }
}

/// Per-activity execution options.
#[derive(Debug, Clone, Default)]
pub struct ActivityOptions {
    /// Budget of a single attempt.
    pub start_to_close: Option<Duration>,
    /// Maximum gap between two heartbeats of an attempt.
    pub heartbeat_timeout: Option<Duration>,
    /// Without a policy exactly one attempt is made.
    pub retry: Option<RetryPolicy>,
}

impl ActivityOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_start_to_close(mut self, timeout: Duration) -> Self {
        self.start_to_close = Some(timeout);
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Same options with retries disabled.
    pub fn without_retry(mut self) -> Self {
        self.retry = None;
        self
    }
}

/// Handle given to each activity attempt.
pub struct ActivityContext {
    name: String,
    attempt: u32,
    cancel: CancellationToken,
    beats: Arc<watch::Sender<()>>,
    progress: Arc<watch::Sender<Option<Value>>>,
}

impl ActivityContext {
    pub(crate) fn new(
        name: &str,
        attempt: u32,
        cancel: CancellationToken,
        beats: Arc<watch::Sender<()>>,
        progress: Arc<watch::Sender<Option<Value>>>,
    ) -> Self {
        Self {
            name: name.to_string(),
            attempt,
            cancel,
            beats,
            progress,
        }
    }

    /// A context that belongs to no workflow instance.
    #[cfg(test)]
    pub(crate) fn detached(name: &str) -> Self {
        let (beats, _) = watch::channel(());
        let (progress, _) = watch::channel(None);
        Self::new(
            name,
            1,
            CancellationToken::new(),
            Arc::new(beats),
            Arc::new(progress),
        )
    }

    #[cfg(test)]
    pub(crate) fn last_heartbeat(&self) -> Option<Value> {
        self.progress.borrow().clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Signal liveness. The details become the instance's latest progress.
    pub fn heartbeat<T: Serialize>(&self, details: &T) {
        self.beats.send_replace(());
        if let Ok(value) = serde_json::to_value(details) {
            self.progress.send_replace(Some(value));
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Completes when no heartbeat arrived within `timeout`; never completes without one.
pub(crate) async fn heartbeat_watchdog(mut beats: watch::Receiver<()>, timeout: Option<Duration>) {
    let Some(timeout) = timeout else {
        return std::future::pending().await;
    };

    loop {
        match tokio::time::timeout(timeout, beats.changed()).await {
            Ok(Ok(())) => continue,
            Ok(Err(_)) => return std::future::pending().await,
            Err(_) => return,
        }
    }
}
