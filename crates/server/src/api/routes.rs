use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{bulk, handlers, jobs, middleware::metrics_middleware, ws};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/pipelines", get(handlers::list_pipelines))
        // Jobs
        .route("/jobs", get(jobs::list_jobs).post(jobs::submit_job))
        .route("/jobs/bulk", get(bulk::bulk_status).post(bulk::start_bulk))
        .route("/jobs/monitor", get(ws::monitor_handler))
        .route("/jobs/{id}", get(jobs::get_job))
        .route("/jobs/{id}/actions", get(jobs::list_actions))
        .route("/jobs/{id}/retry", post(jobs::retry_job))
        .route("/jobs/{id}/cancel", post(jobs::cancel_job))
        .route("/jobs/{id}/decision", post(jobs::decide_job))
        .with_state(Arc::clone(&state));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
