//! Transfer package assembly.
//!
//! A bundle is a directory under the pipeline's transfer directory laid out
//! the way the pipeline expects a standard transfer:
//!
//! ```text
//! <transfer_dir>/<uuid>-<name>/
//!     objects/...
//!     metadata/checksums.sha256
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, BufReader};
use tracing::{debug, warn};

use crate::host::ActivityError;
use crate::source::{copy_tree, discard};

const BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("bundle source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BundleError {
    fn io(path: &Path) -> impl FnOnce(std::io::Error) -> BundleError + '_ {
        move |source| BundleError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<BundleError> for ActivityError {
    fn from(err: BundleError) -> Self {
        match err {
            BundleError::SourceNotFound(_) => ActivityError::non_retryable(err),
            BundleError::Io { .. } => ActivityError::retryable(err),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BundleRequest {
    /// Downloaded copy of the source item, a file or a directory.
    pub source: PathBuf,
    pub transfer_dir: PathBuf,
    /// Object key of the source item; names the bundle.
    pub key: String,
    /// Copy the contents of a lone top-level directory instead of the directory itself.
    pub strip_top_level_dir: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub full_path: PathBuf,
    /// Path relative to the transfer directory, as submitted to the pipeline.
    pub rel_path: String,
}

#[async_trait]
pub trait Bundler: Send + Sync {
    async fn bundle(&self, request: &BundleRequest) -> Result<Bundle, BundleError>;

    /// Remove the given files or directories. Missing paths are skipped.
    async fn cleanup(&self, paths: &[PathBuf]) -> Result<(), BundleError>;
}

/// Bundler writing standard transfers to the local filesystem.
#[derive(Debug, Default)]
pub struct FsBundler;

impl FsBundler {
    pub fn new() -> Self {
        Self
    }

    fn bundle_name(key: &str) -> String {
        let base = Path::new(key)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "transfer".to_string());
        format!("{}-{}", uuid::Uuid::new_v4(), base)
    }

    /// Directory whose contents become the objects of the bundle.
    async fn objects_root(source: &Path, strip: bool) -> Result<PathBuf, BundleError> {
        if !strip {
            return Ok(source.to_path_buf());
        }
        let mut entries = fs::read_dir(source).await.map_err(BundleError::io(source))?;
        let mut only: Option<PathBuf> = None;
        while let Some(entry) = entries.next_entry().await.map_err(BundleError::io(source))? {
            if only.is_some() {
                return Ok(source.to_path_buf());
            }
            only = Some(entry.path());
        }
        match only {
            Some(dir) if fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) => Ok(dir),
            _ => Ok(source.to_path_buf()),
        }
    }

    async fn sha256(path: &Path) -> Result<String, BundleError> {
        let file = File::open(path).await.map_err(BundleError::io(path))?;
        let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; BUFFER_SIZE];
        loop {
            let read = reader.read(&mut buffer).await.map_err(BundleError::io(path))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Copy the objects into `bundle` and write the manifest. Returns the
    /// object files relative to `objects/`.
    async fn fill(
        bundle: &Path,
        request: &BundleRequest,
        is_dir: bool,
    ) -> Result<Vec<PathBuf>, BundleError> {
        let objects = bundle.join("objects");
        fs::create_dir_all(&objects)
            .await
            .map_err(BundleError::io(&objects))?;

        let files = if is_dir {
            let root = Self::objects_root(&request.source, request.strip_top_level_dir).await?;
            copy_tree(&root, &objects)
                .await
                .map_err(BundleError::io(&root))?
        } else {
            let name = PathBuf::from(request.source.file_name().unwrap_or_default());
            fs::copy(&request.source, objects.join(&name))
                .await
                .map_err(BundleError::io(&request.source))?;
            vec![name]
        };

        Self::write_checksums(bundle, &files).await?;
        Ok(files)
    }

    async fn write_checksums(bundle: &Path, files: &[PathBuf]) -> Result<(), BundleError> {
        let metadata = bundle.join("metadata");
        fs::create_dir_all(&metadata)
            .await
            .map_err(BundleError::io(&metadata))?;

        let mut manifest = String::new();
        for rel in files {
            let digest = Self::sha256(&bundle.join("objects").join(rel)).await?;
            manifest.push_str(&format!("{}  ../objects/{}\n", digest, rel.display()));
        }

        let path = metadata.join("checksums.sha256");
        fs::write(&path, manifest).await.map_err(BundleError::io(&path))
    }
}

#[async_trait]
impl Bundler for FsBundler {
    async fn bundle(&self, request: &BundleRequest) -> Result<Bundle, BundleError> {
        let meta = fs::metadata(&request.source).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                BundleError::SourceNotFound(request.source.clone())
            } else {
                BundleError::io(&request.source)(e)
            }
        })?;

        let rel_path = Self::bundle_name(&request.key);
        let full_path = request.transfer_dir.join(&rel_path);
        let files = match Self::fill(&full_path, request, meta.is_dir()).await {
            Ok(files) => files,
            Err(e) => {
                discard(&full_path).await;
                return Err(e);
            }
        };
        debug!(bundle = %full_path.display(), files = files.len(), "Transfer bundled");

        Ok(Bundle {
            full_path,
            rel_path,
        })
    }

    async fn cleanup(&self, paths: &[PathBuf]) -> Result<(), BundleError> {
        for path in paths {
            let meta = match fs::metadata(path).await {
                Ok(meta) => meta,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(BundleError::io(path)(e)),
            };
            let result = if meta.is_dir() {
                fs::remove_dir_all(path).await
            } else {
                fs::remove_file(path).await
            };
            if let Err(e) = result {
                warn!(path = %path.display(), error = %e, "Failed to remove path during cleanup");
                return Err(BundleError::io(path)(e));
            }
        }
        Ok(())
    }
}
