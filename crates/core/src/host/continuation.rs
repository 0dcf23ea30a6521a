//! Out-of-band completion of suspended work.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContinuationError {
    #[error("unknown continuation token")]
    UnknownToken,

    #[error("timed out waiting for completion")]
    TimedOut,

    #[error("wait cancelled")]
    Cancelled,
}

type PendingMap = HashMap<String, oneshot::Sender<String>>;

/// Registry of continuations waiting to be completed.
#[derive(Clone, Default)]
pub struct ContinuationRegistry {
    pending: Arc<Mutex<PendingMap>>,
}

impl ContinuationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, PendingMap> {
        lock(&self.pending)
    }

    /// Create a continuation identified by a fresh token.
    pub fn register(&self) -> Continuation {
        let token = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending().insert(token.clone(), tx);
        Continuation {
            token,
            rx,
            pending: Arc::clone(&self.pending),
        }
    }

    /// Resume the continuation waiting on `token` with `value`.
    pub fn complete(&self, token: &str, value: impl Into<String>) -> Result<(), ContinuationError> {
        let sender = self
            .pending()
            .remove(token)
            .ok_or(ContinuationError::UnknownToken)?;
        sender
            .send(value.into())
            .map_err(|_| ContinuationError::UnknownToken)
    }

    pub fn is_pending(&self, token: &str) -> bool {
        self.pending().contains_key(token)
    }
}

fn lock(pending: &Mutex<PendingMap>) -> MutexGuard<'_, PendingMap> {
    pending
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A registered continuation. Dropping it unregisters the token.
pub struct Continuation {
    token: String,
    rx: oneshot::Receiver<String>,
    pending: Arc<Mutex<PendingMap>>,
}

impl Continuation {
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Wait for the completion value, at most `ceiling`.
    pub async fn wait(
        mut self,
        ceiling: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, ContinuationError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ContinuationError::Cancelled),
            _ = tokio::time::sleep(ceiling) => Err(ContinuationError::TimedOut),
            value = &mut self.rx => value.map_err(|_| ContinuationError::UnknownToken),
        }
    }
}

impl Drop for Continuation {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.token);
    }
}
