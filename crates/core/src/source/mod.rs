//! Access to the source items discovered by watchers.
//!
//! A [`SourceStore`] hands the engine a local copy of a discovered item and
//! deletes the original once its retention period has elapsed.

mod fs_store;

pub use fs_store::FsSourceStore;
pub(crate) use fs_store::{copy_tree, discard};

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::host::ActivityError;
use crate::job::JobEvent;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("unknown watcher: {0}")]
    UnknownWatcher(String),

    /// The key is absolute or walks out of the watched directory.
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("source item not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SourceError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        SourceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<SourceError> for ActivityError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Io { .. } => ActivityError::retryable(err),
            _ => ActivityError::non_retryable(err),
        }
    }
}

/// Watcher-side collaborator of the processing workflow.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Copy the item described by `event` into a fresh directory under
    /// `dest_dir` and return the path of the copy.
    async fn download(&self, event: &JobEvent, dest_dir: &Path) -> Result<PathBuf, SourceError>;

    /// Delete the original item. Deleting an item that is already gone succeeds.
    async fn delete_original(&self, event: &JobEvent) -> Result<(), SourceError>;
}
