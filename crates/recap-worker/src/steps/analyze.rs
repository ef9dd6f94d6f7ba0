//! Analysis step.
//!
//! Runs once both prerequisites settled: frames extracted, and the
//! transcript either delivered or explicitly degraded. A degraded course
//! analyzes frames-only rather than blocking forever.

use std::sync::Arc;

use tracing::info;

use recap_models::{CourseStatus, Job};

use crate::error::{WorkerError, WorkerResult};
use crate::executor::{ProcessingContext, StepOutcome};

pub async fn run(ctx: &Arc<ProcessingContext>, job: &Job) -> WorkerResult<StepOutcome> {
    let course = ctx
        .courses
        .update(&job.course_id, |course| {
            course.status = CourseStatus::Analyzing;
            course.advance(70, "analyzing");
        })
        .await?;

    if !course.transcript_settled() {
        // The continuation logic should never enqueue this early; treat it
        // as retryable in case a webhook lands between deliveries.
        return Err(WorkerError::job_failed(
            "transcript not settled before analysis",
        ));
    }
    if course.frame_urls.is_empty() {
        return Err(WorkerError::invalid_input(
            "no frames available for analysis",
        ));
    }

    let transcript = if course.transcript_degraded {
        None
    } else {
        course.transcript.as_deref()
    };

    let analysis = ctx.analysis.analyze(transcript, &course.frame_urls).await?;

    ctx.courses
        .update(&job.course_id, |course| {
            course.analysis = Some(analysis.clone());
            course.advance(85, "analysis complete");
        })
        .await?;

    info!(
        job_id = %job.id,
        course_id = %job.course_id,
        degraded = course.transcript_degraded,
        "Analysis step finished"
    );

    Ok(StepOutcome::Completed)
}
