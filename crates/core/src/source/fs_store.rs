//! Filesystem-backed source store.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::WatcherConfig;
use crate::job::JobEvent;

use super::{SourceError, SourceStore};

/// Source store reading items from one local directory per watcher.
pub struct FsSourceStore {
    roots: HashMap<String, PathBuf>,
}

impl FsSourceStore {
    pub fn new(watchers: &[WatcherConfig]) -> Self {
        Self {
            roots: watchers
                .iter()
                .map(|w| (w.name.clone(), w.path.clone()))
                .collect(),
        }
    }

    fn resolve(&self, event: &JobEvent) -> Result<PathBuf, SourceError> {
        let root = self
            .roots
            .get(&event.watcher_name)
            .ok_or_else(|| SourceError::UnknownWatcher(event.watcher_name.clone()))?;

        let key = Path::new(&event.key);
        let contained = !event.key.is_empty()
            && key
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !contained {
            return Err(SourceError::InvalidKey(event.key.clone()));
        }
        Ok(root.join(key))
    }
}

#[async_trait]
impl SourceStore for FsSourceStore {
    async fn download(&self, event: &JobEvent, dest_dir: &Path) -> Result<PathBuf, SourceError> {
        let source = self.resolve(event)?;
        let meta = fs::metadata(&source).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                SourceError::NotFound(source.clone())
            } else {
                SourceError::io(&source, e)
            }
        })?;

        let file_name = source
            .file_name()
            .ok_or_else(|| SourceError::InvalidKey(event.key.clone()))?;
        let staging = dest_dir.join(uuid::Uuid::new_v4().to_string());
        let target = staging.join(file_name);

        fs::create_dir_all(&staging)
            .await
            .map_err(|e| SourceError::io(&staging, e))?;
        let copied = if meta.is_dir() {
            copy_tree(&source, &target).await.map(drop)
        } else {
            fs::copy(&source, &target).await.map(drop)
        };
        if let Err(e) = copied {
            discard(&staging).await;
            return Err(SourceError::io(&source, e));
        }

        debug!(
            watcher = %event.watcher_name,
            key = %event.key,
            target = %target.display(),
            "Downloaded source item"
        );
        Ok(target)
    }

    async fn delete_original(&self, event: &JobEvent) -> Result<(), SourceError> {
        let source = self.resolve(event)?;
        let meta = match fs::metadata(&source).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(key = %event.key, "Original already deleted");
                return Ok(());
            }
            Err(e) => return Err(SourceError::io(&source, e)),
        };

        let result = if meta.is_dir() {
            fs::remove_dir_all(&source).await
        } else {
            fs::remove_file(&source).await
        };
        result.map_err(|e| SourceError::io(&source, e))?;

        info!(watcher = %event.watcher_name, key = %event.key, "Deleted original source item");
        Ok(())
    }
}

/// Remove a partially written directory. Failures are only logged.
pub(crate) async fn discard(path: &Path) {
    match fs::remove_dir_all(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial copy"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial copy"),
    }
}

/// Copy a directory tree. Returns the copied files relative to `dst`.
pub(crate) async fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut copied = Vec::new();
    let mut pending = vec![PathBuf::new()];

    while let Some(rel) = pending.pop() {
        fs::create_dir_all(dst.join(&rel)).await?;
        let mut entries = fs::read_dir(src.join(&rel)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let child = rel.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push(child);
            } else {
                fs::copy(entry.path(), dst.join(&child)).await?;
                copied.push(child);
            }
        }
    }

    copied.sort();
    Ok(copied)
}
