//! Mock notifier for testing.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::notify::{Notifier, NotifyError, Receipt};

/// Mock implementation of the Notifier trait.
///
/// Fails with scripted errors first, then succeeds.
#[derive(Debug, Default)]
pub struct MockNotifier {
    receipts: Arc<RwLock<Vec<Receipt>>>,
    failures: Arc<RwLock<VecDeque<NotifyError>>>,
    attempts: Arc<RwLock<u32>>,
    requires_name_info: bool,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requiring_name_info() -> Self {
        Self {
            requires_name_info: true,
            ..Self::default()
        }
    }

    /// Make the next `count` deliveries fail with a retryable network error.
    pub async fn fail_times(&self, count: usize) {
        let mut failures = self.failures.write().await;
        for _ in 0..count {
            failures.push_back(NotifyError::Network("connection reset".to_string()));
        }
    }

    /// Make the next delivery fail with `error`.
    pub async fn push_failure(&self, error: NotifyError) {
        self.failures.write().await.push_back(error);
    }

    /// Receipts delivered successfully.
    pub async fn receipts(&self) -> Vec<Receipt> {
        self.receipts.read().await.clone()
    }

    /// All delivery attempts, failed ones included.
    pub async fn attempts(&self) -> u32 {
        *self.attempts.read().await
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    fn name(&self) -> &str {
        "mock"
    }

    fn requires_name_info(&self) -> bool {
        self.requires_name_info
    }

    async fn notify(&self, receipt: &Receipt) -> Result<(), NotifyError> {
        *self.attempts.write().await += 1;
        if let Some(err) = self.failures.write().await.pop_front() {
            return Err(err);
        }
        self.receipts.write().await.push(receipt.clone());
        Ok(())
    }
}
