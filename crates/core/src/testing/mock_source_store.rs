//! Mock source store for testing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::job::JobEvent;
use crate::source::{SourceError, SourceStore};

/// Mock implementation of the SourceStore trait. Touches no filesystem.
#[derive(Debug, Default)]
pub struct MockSourceStore {
    downloads: Arc<RwLock<Vec<String>>>,
    deleted: Arc<RwLock<Vec<String>>>,
    /// If set, the next download fails with a missing-item error.
    fail_next_download: Arc<RwLock<bool>>,
}

impl MockSourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_next_download(&self) {
        *self.fail_next_download.write().await = true;
    }

    /// Keys downloaded so far.
    pub async fn downloads(&self) -> Vec<String> {
        self.downloads.read().await.clone()
    }

    /// Keys whose originals were deleted.
    pub async fn deleted(&self) -> Vec<String> {
        self.deleted.read().await.clone()
    }
}

#[async_trait]
impl SourceStore for MockSourceStore {
    async fn download(&self, event: &JobEvent, dest_dir: &Path) -> Result<PathBuf, SourceError> {
        if std::mem::take(&mut *self.fail_next_download.write().await) {
            return Err(SourceError::NotFound(PathBuf::from(&event.key)));
        }
        self.downloads.write().await.push(event.key.clone());
        Ok(dest_dir.join(&event.key))
    }

    async fn delete_original(&self, event: &JobEvent) -> Result<(), SourceError> {
        self.deleted.write().await.push(event.key.clone());
        Ok(())
    }
}
