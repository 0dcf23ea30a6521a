//! Mock pipeline client for testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::pipeline::{
    PipelineClient, PipelineClientError, PipelineJob, SubmitRequest, UnitStatus, UnitType,
};

type StatusScript = VecDeque<Result<UnitStatus, PipelineClientError>>;

/// Mock implementation of the PipelineClient trait.
///
/// Status calls pop scripted responses first and fall back to a configurable
/// default. Without configuration every transfer completes with SIP
/// `sip-<transfer id>` and every ingest completes.
#[derive(Debug)]
pub struct MockPipelineClient {
    submissions: Arc<RwLock<Vec<SubmitRequest>>>,
    hidden: Arc<RwLock<Vec<(String, UnitType)>>>,
    transfer_script: Arc<RwLock<StatusScript>>,
    ingest_script: Arc<RwLock<StatusScript>>,
    default_transfer: Arc<RwLock<Option<UnitStatus>>>,
    default_ingest: Arc<RwLock<UnitStatus>>,
    jobs: Arc<RwLock<Vec<PipelineJob>>>,
    /// If set, the next submit fails with this error.
    next_submit_error: Arc<RwLock<Option<PipelineClientError>>>,
    status_calls: AtomicU64,
    next_id: AtomicU64,
}

impl Default for MockPipelineClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPipelineClient {
    pub fn new() -> Self {
        Self {
            submissions: Arc::new(RwLock::new(Vec::new())),
            hidden: Arc::new(RwLock::new(Vec::new())),
            transfer_script: Arc::new(RwLock::new(VecDeque::new())),
            ingest_script: Arc::new(RwLock::new(VecDeque::new())),
            default_transfer: Arc::new(RwLock::new(None)),
            default_ingest: Arc::new(RwLock::new(UnitStatus::new("COMPLETE"))),
            jobs: Arc::new(RwLock::new(Vec::new())),
            next_submit_error: Arc::new(RwLock::new(None)),
            status_calls: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    /// Queue a transfer status response.
    pub async fn push_transfer_status(&self, status: Result<UnitStatus, PipelineClientError>) {
        self.transfer_script.write().await.push_back(status);
    }

    /// Queue an ingest status response.
    pub async fn push_ingest_status(&self, status: Result<UnitStatus, PipelineClientError>) {
        self.ingest_script.write().await.push_back(status);
    }

    /// Response used once the transfer script is exhausted.
    pub async fn set_default_transfer_status(&self, status: UnitStatus) {
        *self.default_transfer.write().await = Some(status);
    }

    pub async fn set_default_ingest_status(&self, status: UnitStatus) {
        *self.default_ingest.write().await = status;
    }

    pub async fn set_jobs(&self, jobs: Vec<PipelineJob>) {
        *self.jobs.write().await = jobs;
    }

    pub async fn set_next_submit_error(&self, error: PipelineClientError) {
        *self.next_submit_error.write().await = Some(error);
    }

    pub async fn submissions(&self) -> Vec<SubmitRequest> {
        self.submissions.read().await.clone()
    }

    pub async fn hidden(&self) -> Vec<(String, UnitType)> {
        self.hidden.read().await.clone()
    }

    /// Number of transfer and ingest status calls received.
    pub fn status_calls(&self) -> u64 {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PipelineClient for MockPipelineClient {
    async fn submit(&self, request: SubmitRequest) -> Result<String, PipelineClientError> {
        if let Some(err) = self.next_submit_error.write().await.take() {
            return Err(err);
        }
        self.submissions.write().await.push(request);
        Ok(format!(
            "transfer-{}",
            self.next_id.fetch_add(1, Ordering::SeqCst)
        ))
    }

    async fn transfer_status(&self, transfer_id: &str) -> Result<UnitStatus, PipelineClientError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.transfer_script.write().await.pop_front() {
            return scripted;
        }
        match self.default_transfer.read().await.clone() {
            Some(status) => Ok(status),
            None => Ok(UnitStatus::new("COMPLETE").with_sip_id(&format!("sip-{}", transfer_id))),
        }
    }

    async fn ingest_status(&self, _sip_id: &str) -> Result<UnitStatus, PipelineClientError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.ingest_script.write().await.pop_front() {
            return scripted;
        }
        Ok(self.default_ingest.read().await.clone())
    }

    async fn jobs(&self, _unit_id: &str) -> Result<Vec<PipelineJob>, PipelineClientError> {
        Ok(self.jobs.read().await.clone())
    }

    async fn hide(&self, unit_id: &str, unit_type: UnitType) -> Result<(), PipelineClientError> {
        self.hidden
            .write()
            .await
            .push((unit_id.to_string(), unit_type));
        Ok(())
    }
}
