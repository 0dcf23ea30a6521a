//! Mock bundler for testing.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::bundler::{Bundle, BundleError, BundleRequest, Bundler};

/// Mock implementation of the Bundler trait. Touches no filesystem.
#[derive(Debug, Default)]
pub struct MockBundler {
    bundles: Arc<RwLock<Vec<BundleRequest>>>,
    cleaned: Arc<RwLock<Vec<PathBuf>>>,
}

impl MockBundler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn bundles(&self) -> Vec<BundleRequest> {
        self.bundles.read().await.clone()
    }

    /// Every path passed to cleanup, in call order.
    pub async fn cleaned(&self) -> Vec<PathBuf> {
        self.cleaned.read().await.clone()
    }
}

#[async_trait]
impl Bundler for MockBundler {
    async fn bundle(&self, request: &BundleRequest) -> Result<Bundle, BundleError> {
        let mut bundles = self.bundles.write().await;
        bundles.push(request.clone());
        let rel_path = format!("bundle-{}", bundles.len());
        Ok(Bundle {
            full_path: request.transfer_dir.join(&rel_path),
            rel_path,
        })
    }

    async fn cleanup(&self, paths: &[PathBuf]) -> Result<(), BundleError> {
        self.cleaned.write().await.extend_from_slice(paths);
        Ok(())
    }
}
