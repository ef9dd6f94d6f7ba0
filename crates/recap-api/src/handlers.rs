//! Request handlers: course ingest and status reads.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use recap_models::{Course, CourseId, Job, JobId};
use recap_queue::pipeline::enqueue_initial_steps;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Liveness probe.
pub async fn health() -> &'static str {
    "ok"
}

/// Readiness probe: verifies the job store answers.
pub async fn ready(State(state): State<AppState>) -> ApiResult<&'static str> {
    state.store.pending_len().await?;
    Ok("ready")
}

#[derive(Debug, Deserialize)]
pub struct CreateCourseRequest {
    pub title: String,
    pub source_url: String,
}

#[derive(Debug, Serialize)]
pub struct CreateCourseResponse {
    pub course_id: CourseId,
    pub job_ids: Vec<JobId>,
}

/// Ingest a course: persist the record and enqueue the sibling first steps
/// (transcription and frame extraction run in parallel).
pub async fn create_course(
    State(state): State<AppState>,
    Json(request): Json<CreateCourseRequest>,
) -> ApiResult<(StatusCode, Json<CreateCourseResponse>)> {
    if request.title.trim().is_empty() {
        return Err(ApiError::bad_request("title must not be empty"));
    }
    if request.source_url.trim().is_empty() {
        return Err(ApiError::bad_request("source_url must not be empty"));
    }

    let course = Course::new(request.title, request.source_url);
    state.courses.put(&course).await?;

    let job_ids = enqueue_initial_steps(&state.store, &course.id).await?;

    info!(course_id = %course.id, jobs = job_ids.len(), "Course ingested");

    Ok((
        StatusCode::CREATED,
        Json(CreateCourseResponse {
            course_id: course.id,
            job_ids,
        }),
    ))
}

/// Read a course record.
pub async fn get_course(
    State(state): State<AppState>,
    Path(course_id): Path<String>,
) -> ApiResult<Json<Course>> {
    let id = CourseId::from_string(course_id);
    let course = state
        .courses
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("course {id}")))?;
    Ok(Json(course))
}

/// Read a job record (operator visibility into retries and escalations).
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    let id = JobId::from_string(job_id);
    let job = state
        .store
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("job {id}")))?;
    Ok(Json(job))
}

#[derive(Debug, Serialize)]
pub struct QueueStatusResponse {
    pub pending: u64,
    pub processing: u64,
    pub manual_review: u64,
}

/// Queue depth counters for operators.
pub async fn queue_status(State(state): State<AppState>) -> ApiResult<Json<QueueStatusResponse>> {
    Ok(Json(QueueStatusResponse {
        pending: state.store.pending_len().await?,
        processing: state.store.processing_len().await?,
        manual_review: state.store.review_len().await?,
    }))
}
