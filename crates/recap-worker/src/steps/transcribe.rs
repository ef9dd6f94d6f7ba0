//! Transcription submission step.
//!
//! This step only submits: the provider transcribes asynchronously and
//! delivers the result to our webhook endpoint, correlated by a one-time
//! continuation token. The job stays `processing` with a long visibility
//! deadline; if the webhook never arrives, the visibility sweep recovers it.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use recap_models::{CourseStatus, Job};

use crate::error::WorkerResult;
use crate::executor::{ProcessingContext, StepOutcome};

pub async fn run(ctx: &Arc<ProcessingContext>, job: &Job) -> WorkerResult<StepOutcome> {
    let course = ctx
        .courses
        .update(&job.course_id, |course| {
            course.status = CourseStatus::Processing;
            course.advance(10, "transcribing");
        })
        .await?;

    let token = Uuid::new_v4().to_string();
    ctx.store.register_token(&token, &job.id).await?;

    let callback_url = format!(
        "{}/webhooks/transcription?token={}",
        ctx.config.callback_base_url.trim_end_matches('/'),
        token
    );

    let provider_ref = ctx
        .transcription
        .start_transcription(&course.source_url, &callback_url)
        .await?;

    ctx.store
        .set_metadata(&job.id, "provider_job_id", &provider_ref)
        .await?;

    info!(
        job_id = %job.id,
        course_id = %job.course_id,
        provider_ref = %provider_ref,
        "Transcription submitted, awaiting webhook"
    );

    Ok(StepOutcome::AwaitingCallback)
}
