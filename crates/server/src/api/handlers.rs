use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use archivist_core::{HostError, SanitizedConfig, ServiceError};

use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Error body shared by every handler.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map an operator-operation failure to its HTTP status.
pub fn service_error(err: ServiceError) -> ApiError {
    let status = match &err {
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::InvalidState(_)
        | ServiceError::InvalidInput(_)
        | ServiceError::NotRunning(_) => StatusCode::BAD_REQUEST,
        ServiceError::Conflict(_) => StatusCode::CONFLICT,
        ServiceError::Host(HostError::AlreadyStarted { .. }) => StatusCode::CONFLICT,
        ServiceError::Host(HostError::NotFound(_) | HostError::HistoryNotFound(_)) => {
            StatusCode::NOT_FOUND
        }
        ServiceError::Host(HostError::NotRunning(_)) => StatusCode::BAD_REQUEST,
        ServiceError::Store(_) => {
            error!(error = %err, "Job store failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PipelineResponse {
    pub name: String,
    pub capacity: usize,
    pub in_use: usize,
}

/// Configured pipelines with their live slot usage.
pub async fn list_pipelines(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<PipelineResponse>>, ApiError> {
    let processing = state.service().processing();
    let admission = processing.admission();

    let mut pipelines = Vec::new();
    for pipeline in processing.registry().iter() {
        let usage = admission.usage(pipeline.name()).map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
        })?;
        pipelines.push(PipelineResponse {
            name: pipeline.name().to_string(),
            capacity: usage.capacity,
            in_use: usage.in_use,
        });
    }
    Ok(Json(pipelines))
}

/// Prometheus scrape endpoint.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state);
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}
