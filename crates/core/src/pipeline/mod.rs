//! Processing pipelines: configuration, clients and admission control.

mod admission;
mod client;
mod http_client;
mod registry;
pub mod status;

pub use admission::{AdmissionController, AdmissionPermit, SlotUsage};
pub use client::{
    PipelineClient, PipelineClientError, PipelineJob, SubmitRequest, UnitStatus, UnitType,
};
pub use http_client::HttpPipelineClient;
pub use registry::{Pipeline, PipelineRegistry};

use thiserror::Error;

use crate::host::ActivityError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("unknown pipeline: {0}")]
    UnknownPipeline(String),

    #[error("admission to pipeline {0} is closed")]
    Closed(String),

    #[error("admission wait cancelled")]
    Cancelled,

    #[error(transparent)]
    Client(#[from] PipelineClientError),
}

impl From<PipelineClientError> for ActivityError {
    fn from(err: PipelineClientError) -> Self {
        match &err {
            PipelineClientError::Authentication => {
                ActivityError::non_retryable("authentication error")
            }
            PipelineClientError::Http { status, .. } if *status < 500 => {
                ActivityError::non_retryable(err)
            }
            PipelineClientError::InvalidResponse(_) => ActivityError::non_retryable(err),
            _ => ActivityError::retryable(err),
        }
    }
}

impl From<PipelineError> for ActivityError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Cancelled => ActivityError::Cancelled,
            PipelineError::Client(e) => e.into(),
            other => ActivityError::non_retryable(other),
        }
    }
}
