//! Receipt file notifier.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::{Notifier, NotifyError, Receipt};

/// Writes each receipt to `<dir>/<job_id>.json`.
pub struct ReceiptFileNotifier {
    dir: PathBuf,
}

impl ReceiptFileNotifier {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl Notifier for ReceiptFileNotifier {
    fn name(&self) -> &str {
        "receipt-file"
    }

    async fn notify(&self, receipt: &Receipt) -> Result<(), NotifyError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| NotifyError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let path = self.dir.join(format!("{}.json", receipt.job_id));
        let body = serde_json::to_vec_pretty(receipt)
            .map_err(|e| NotifyError::Config(format!("unserializable receipt: {}", e)))?;
        fs::write(&path, body)
            .await
            .map_err(|source| NotifyError::Io {
                path: path.clone(),
                source,
            })?;

        debug!(job_id = receipt.job_id, path = %path.display(), "Receipt written");
        Ok(())
    }
}
