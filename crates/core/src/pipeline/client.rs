//! Pipeline client abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineClientError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Connection failed: {0}")]
    Network(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Authentication error")]
    Authentication,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Request to start a transfer from a bundle already placed in the transfer directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitRequest {
    pub name: String,
    /// Path of the bundle as seen by the pipeline.
    pub path: String,
    #[serde(rename = "type")]
    pub transfer_type: String,
    pub processing_config: String,
    pub auto_approve: bool,
}

/// Raw status of a transfer or ingest unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct UnitStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub name: String,
    /// SIP produced by a completed transfer.
    #[serde(default, rename = "sip_uuid")]
    pub sip_id: String,
    #[serde(default)]
    pub microservice: String,
    #[serde(default)]
    pub message: String,
}

impl UnitStatus {
    pub fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
            ..Default::default()
        }
    }

    pub fn with_sip_id(mut self, sip_id: &str) -> Self {
        self.sip_id = sip_id.to_string();
        self
    }
}

/// A pipeline-reported processing step.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PipelineJob {
    #[serde(rename = "uuid")]
    pub id: String,
    pub name: String,
    /// `PROCESSING`, `COMPLETE`, `FAILED`, `USER_INPUT` or `UNKNOWN`.
    pub status: String,
    #[serde(default)]
    pub microservice: String,
    /// When the pipeline started the job, if it reports it.
    #[serde(default, rename = "start_time")]
    pub started_at: Option<DateTime<Utc>>,
}

/// Kind of unit that can be hidden from the pipeline dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    Transfer,
    Ingest,
}

impl UnitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitType::Transfer => "transfer",
            UnitType::Ingest => "ingest",
        }
    }
}

/// Operations the engine needs from a processing pipeline.
#[async_trait]
pub trait PipelineClient: Send + Sync {
    /// Start a transfer, returning its identifier.
    async fn submit(&self, request: SubmitRequest) -> Result<String, PipelineClientError>;

    async fn transfer_status(&self, transfer_id: &str) -> Result<UnitStatus, PipelineClientError>;

    async fn ingest_status(&self, sip_id: &str) -> Result<UnitStatus, PipelineClientError>;

    /// Processing steps the pipeline ran for a unit.
    async fn jobs(&self, unit_id: &str) -> Result<Vec<PipelineJob>, PipelineClientError>;

    /// Remove a unit from the pipeline dashboard.
    async fn hide(&self, unit_id: &str, unit_type: UnitType) -> Result<(), PipelineClientError>;
}
