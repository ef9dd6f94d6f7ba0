//! Artifact assembly step: the last pipeline stage.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use recap_models::{CourseStatus, Job};

use crate::error::{WorkerError, WorkerResult};
use crate::executor::{ProcessingContext, StepOutcome};

pub async fn run(ctx: &Arc<ProcessingContext>, job: &Job) -> WorkerResult<StepOutcome> {
    let course = ctx
        .courses
        .update(&job.course_id, |course| {
            course.status = CourseStatus::GeneratingArtifact;
            course.advance(90, "assembling artifact");
        })
        .await?;

    let Some(analysis) = &course.analysis else {
        return Err(WorkerError::invalid_input(
            "no analysis available for artifact assembly",
        ));
    };

    let artifact = serde_json::json!({
        "course_id": course.id,
        "title": course.title,
        "generated_at": Utc::now().to_rfc3339(),
        "duration_seconds": course.duration_seconds,
        "transcript_degraded": course.transcript_degraded,
        "degradation_reason": course.degradation_reason,
        "extraction_partial_failures": course.extraction_partial_failures,
        "frame_urls": course.frame_urls,
        "analysis": analysis,
    });

    let key = format!("artifacts/{}/recap.json", course.id);
    let artifact_url = ctx
        .storage
        .upload_bytes(
            serde_json::to_vec_pretty(&artifact)?,
            &key,
            "application/json",
        )
        .await?;

    ctx.courses
        .update(&job.course_id, |course| {
            course.artifact_url = Some(artifact_url.clone());
            course.status = CourseStatus::Completed;
            course.advance(100, "completed");
        })
        .await?;

    info!(
        job_id = %job.id,
        course_id = %job.course_id,
        artifact_url,
        "Artifact published, pipeline complete"
    );

    Ok(StepOutcome::Completed)
}
