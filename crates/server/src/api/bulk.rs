//! Bulk operation endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use archivist_core::{BulkOperation, BulkRequest, BulkStatus, JobStatus};

use super::handlers::{service_error, ApiError, ErrorResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct BulkBody {
    pub status: String,
    pub operation: String,
    pub size: u64,
}

impl BulkBody {
    fn into_request(self) -> Result<BulkRequest, String> {
        Ok(BulkRequest {
            status: self.status.trim().parse::<JobStatus>()?,
            operation: self.operation.parse::<BulkOperation>()?,
            size: self.size,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BulkStartedResponse {
    pub workflow_id: String,
    pub run_id: String,
}

/// Start the bulk workflow. Only one may run at a time.
pub async fn start_bulk(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BulkBody>,
) -> Result<(StatusCode, Json<BulkStartedResponse>), ApiError> {
    let request = body.into_request().map_err(|error| {
        (StatusCode::BAD_REQUEST, Json(ErrorResponse { error }))
    })?;

    let execution = state.service().bulk(request).map_err(service_error)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(BulkStartedResponse {
            workflow_id: execution.instance_id,
            run_id: execution.run_id,
        }),
    ))
}

pub async fn bulk_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BulkStatus>, ApiError> {
    state.service().bulk_status().map(Json).map_err(service_error)
}
