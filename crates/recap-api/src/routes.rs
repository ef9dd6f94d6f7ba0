//! API routes.

use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{create_course, get_course, get_job, health, queue_status, ready};
use crate::state::AppState;
use crate::webhook::transcription_webhook;

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/courses", post(create_course))
        .route("/courses/:course_id", get(get_course))
        .route("/jobs/:job_id", get(get_job))
        .route("/queue/status", get(queue_status));

    let webhook_routes = Router::new().route("/transcription", post(transcription_webhook));

    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .nest("/api", api_routes)
        .nest("/webhooks", webhook_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
