//! Delivery of completion receipts to interested systems.
//!
//! Each notifier is enabled by the presence of its section under
//! `[notifications]` and runs as one step after a job reaches `Done`.

mod receipt_file;
mod webhook;

pub use receipt_file::ReceiptFileNotifier;
pub use webhook::WebhookNotifier;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::NotificationsConfig;
use crate::host::ActivityError;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("receipt rejected with HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to write receipt {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} requires an identifier parsed from the item name")]
    MissingNameInfo(String),

    #[error("invalid notifier configuration: {0}")]
    Config(String),
}

impl From<NotifyError> for ActivityError {
    fn from(err: NotifyError) -> Self {
        match &err {
            NotifyError::Http { status, .. } if *status >= 500 => ActivityError::retryable(err),
            NotifyError::Network(_) | NotifyError::Io { .. } => ActivityError::retryable(err),
            _ => ActivityError::non_retryable(err),
        }
    }
}

/// What is delivered about a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub job_id: i64,
    pub name: String,
    /// Identifier parsed from the item name.
    pub origin_id: Option<String>,
    pub kind: Option<String>,
    pub aip_id: String,
    pub pipeline: String,
    pub completed_at: DateTime<Utc>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    /// Whether receipts must carry name metadata for this notifier.
    fn requires_name_info(&self) -> bool {
        false
    }

    async fn notify(&self, receipt: &Receipt) -> Result<(), NotifyError>;
}

/// Build the notifiers enabled in `config`, in a fixed order.
pub fn build_notifiers(
    config: &NotificationsConfig,
) -> Result<Vec<Arc<dyn Notifier>>, NotifyError> {
    let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();
    if let Some(webhook) = &config.webhook {
        notifiers.push(Arc::new(WebhookNotifier::new(webhook)?));
    }
    if let Some(receipt_file) = &config.receipt_file {
        notifiers.push(Arc::new(ReceiptFileNotifier::new(receipt_file.dir.clone())));
    }
    Ok(notifiers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReceiptFileConfig, WebhookConfig};

    #[test]
    fn test_build_notifiers_from_config() {
        assert!(build_notifiers(&NotificationsConfig::default())
            .unwrap()
            .is_empty());

        let config = NotificationsConfig {
            webhook: Some(WebhookConfig {
                url: "http://127.0.0.1:1/hook".to_string(),
                timeout_secs: 5,
            }),
            receipt_file: Some(ReceiptFileConfig {
                dir: PathBuf::from("/tmp/receipts"),
            }),
        };
        let names: Vec<_> = build_notifiers(&config)
            .unwrap()
            .iter()
            .map(|n| n.name().to_string())
            .collect();
        assert_eq!(names, vec!["webhook", "receipt-file"]);
    }

    #[test]
    fn test_error_classification() {
        let server = NotifyError::Http {
            status: 503,
            message: String::new(),
        };
        let client = NotifyError::Http {
            status: 422,
            message: String::new(),
        };
        assert!(ActivityError::from(server).is_retryable());
        assert!(!ActivityError::from(client).is_retryable());
        assert!(ActivityError::from(NotifyError::Network("reset".into())).is_retryable());
        assert!(
            !ActivityError::from(NotifyError::MissingNameInfo("webhook".into())).is_retryable()
        );
    }
}
