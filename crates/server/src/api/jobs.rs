//! Job endpoints: listing, submission and the operator actions on one job.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use archivist_core::{
    Execution, Job, JobEvent, JobFilter, JobStatus, JobWorkflowHandle, ProcessingAction,
};

use super::handlers::{service_error, ApiError, ErrorResponse};
use crate::state::AppState;

/// Maximum jobs per page.
const MAX_LIMIT: u32 = 100;

/// Default jobs per page.
const DEFAULT_LIMIT: u32 = 20;

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    pub status: Option<String>,
    /// Only jobs with an id lower or equal to this one.
    pub cursor: Option<i64>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<Job>,
    pub next_cursor: Option<i64>,
    pub limit: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub jobs: Vec<JobWorkflowHandle>,
}

#[derive(Debug, Deserialize)]
pub struct DecisionBody {
    #[serde(default)]
    pub option: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AcceptedResponse {
    pub job_id: i64,
    pub accepted: bool,
}

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// List jobs, newest first.
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<ListJobsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let mut filter = JobFilter::new().with_limit(limit);

    if let Some(status) = params.status.as_deref().filter(|s| !s.is_empty()) {
        let status: JobStatus = status.parse().map_err(bad_request)?;
        filter = filter.with_status(status);
    }
    if let Some(cursor) = params.cursor {
        filter = filter.with_cursor(cursor);
    }

    let page = state.service().list(&filter).map_err(service_error)?;
    Ok(Json(ListJobsResponse {
        jobs: page.jobs,
        next_cursor: page.next_cursor,
        limit,
    }))
}

/// Create one job per target pipeline of the event and start processing.
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(event): Json<JobEvent>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let jobs = state.service().submit_event(event).map_err(service_error)?;
    Ok((StatusCode::CREATED, Json(SubmitResponse { jobs })))
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Job>, ApiError> {
    state.service().get(id).map(Json).map_err(service_error)
}

pub async fn list_actions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<ProcessingAction>>, ApiError> {
    state.service().actions(id).map(Json).map_err(service_error)
}

/// Start a new run of a finished job.
pub async fn retry_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<Execution>), ApiError> {
    let execution = state.service().retry(id).map_err(service_error)?;
    Ok((StatusCode::ACCEPTED, Json(execution)))
}

pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    state.service().cancel(id).map_err(service_error)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            job_id: id,
            accepted: true,
        }),
    ))
}

/// Deliver an operator decision to a job waiting in `pending`.
pub async fn decide_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<DecisionBody>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    state
        .service()
        .decide(id, &body.option)
        .map_err(service_error)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            job_id: id,
            accepted: true,
        }),
    ))
}
