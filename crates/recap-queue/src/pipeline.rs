//! Pipeline continuation helpers.
//!
//! Shared by the Step Executor and the webhook continuation handler so
//! "enqueue the next step exactly once, once every prerequisite settled"
//! lives in one place. Idempotency comes from the store's dedup guard plus
//! the per-course step map: a second enqueue of the same (course, step) is
//! a no-op ack.

use tracing::{debug, info};

use recap_models::{CourseId, Job, JobId, JobStatus, PipelineStep};

use crate::courses::CourseStore;
use crate::error::QueueResult;
use crate::store::JobStore;

/// Enqueue a job for a course step, idempotently.
///
/// Returns the new job id, or `None` when a job for this (course, step)
/// already exists.
pub async fn enqueue_step(
    store: &JobStore,
    course_id: &CourseId,
    step: PipelineStep,
) -> QueueResult<Option<JobId>> {
    if let Some(existing) = store.job_for_step(course_id, step).await? {
        debug!(course_id = %course_id, step = %step, job_id = %existing.id, "Step already enqueued");
        return Ok(None);
    }

    let job = Job::new(course_id.clone(), step);
    let id = job.id.clone();
    if store.create(&job).await? {
        Ok(Some(id))
    } else {
        Ok(None)
    }
}

/// Enqueue the sibling first steps for a freshly ingested course.
pub async fn enqueue_initial_steps(
    store: &JobStore,
    course_id: &CourseId,
) -> QueueResult<Vec<JobId>> {
    let mut ids = Vec::new();
    for step in [PipelineStep::Transcribe, PipelineStep::ExtractFrames] {
        if let Some(id) = enqueue_step(store, course_id, step).await? {
            ids.push(id);
        }
    }
    info!(course_id = %course_id, jobs = ids.len(), "Enqueued initial pipeline steps");
    Ok(ids)
}

/// Whether every prerequisite for the analysis step has settled:
/// frame extraction completed, and the transcript either delivered or
/// explicitly degraded.
pub async fn analysis_prerequisites_settled(
    store: &JobStore,
    courses: &CourseStore,
    course_id: &CourseId,
) -> QueueResult<bool> {
    let frames_done = store
        .job_for_step(course_id, PipelineStep::ExtractFrames)
        .await?
        .map(|job| job.status == JobStatus::Completed)
        .unwrap_or(false);
    if !frames_done {
        return Ok(false);
    }

    let course = courses.require(course_id).await?;
    Ok(course.transcript_settled())
}

/// Enqueue the analysis step once all of its prerequisites are settled.
///
/// Returns `true` when the step was enqueued by this call. Safe to invoke
/// from both sibling completion paths and from duplicate webhook
/// deliveries.
pub async fn maybe_enqueue_analysis(
    store: &JobStore,
    courses: &CourseStore,
    course_id: &CourseId,
) -> QueueResult<bool> {
    if !analysis_prerequisites_settled(store, courses, course_id).await? {
        debug!(course_id = %course_id, "Analysis prerequisites not yet settled");
        return Ok(false);
    }

    match enqueue_step(store, course_id, PipelineStep::Analyze).await? {
        Some(job_id) => {
            info!(course_id = %course_id, job_id = %job_id, "Enqueued analysis step");
            Ok(true)
        }
        None => Ok(false),
    }
}
