//! Transcription webhook continuation handler.
//!
//! The provider calls back with a one-time token from the callback URL.
//! Deliveries are at-least-once: a replayed event must produce the same
//! terminal state and a 200 ack, never a duplicate enqueue. Provider
//! failure events degrade the course (pipeline continues frames-only)
//! instead of burning retries on a job the worker cannot fix.

use std::time::Duration;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use recap_models::{JobStatus, TranscriptionEvent};
use recap_queue::pipeline::{analysis_prerequisites_settled, maybe_enqueue_analysis};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Short sibling-check retries before handing continuation back to the
/// frame extraction completion path.
const SIBLING_POLL_ATTEMPTS: u32 = 3;
const SIBLING_POLL_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Deserialize)]
pub struct WebhookParams {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    pub analysis_enqueued: bool,
}

/// Handle a transcription completion/failure event.
pub async fn transcription_webhook(
    State(state): State<AppState>,
    Query(params): Query<WebhookParams>,
    Json(event): Json<TranscriptionEvent>,
) -> ApiResult<Json<WebhookResponse>> {
    let job_id = state
        .store
        .lookup_token(&params.token)
        .await?
        .ok_or_else(|| ApiError::not_found("unknown or expired continuation token"))?;

    let job = state
        .store
        .get(&job_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("job {job_id}")))?;

    // Duplicate delivery: the first one already settled the job. Ack.
    if job.status == JobStatus::Completed {
        info!(job_id = %job_id, provider_ref = %event.job_reference_id, "Duplicate webhook delivery acked");
        return Ok(Json(WebhookResponse {
            status: "duplicate",
            analysis_enqueued: false,
        }));
    }
    if job.status.is_terminal() {
        warn!(job_id = %job_id, status = %job.status, "Webhook arrived for terminal job");
        return Ok(Json(WebhookResponse {
            status: "stale",
            analysis_enqueued: false,
        }));
    }

    if event.is_success() {
        let transcript = event.result_payload.clone().ok_or_else(|| {
            ApiError::bad_request("completed event carried no transcript payload")
        })?;

        state
            .courses
            .update(&job.course_id, |course| {
                course.transcript = Some(transcript.clone());
                course.advance(40, "transcript received");
            })
            .await?;

        info!(
            job_id = %job_id,
            course_id = %job.course_id,
            provider_ref = %event.job_reference_id,
            "Transcript delivered"
        );
    } else {
        let reason = event
            .error
            .clone()
            .unwrap_or_else(|| "transcription provider reported an unspecified error".to_string());

        state
            .courses
            .update(&job.course_id, |course| {
                course.degrade_transcript(reason.clone());
                course.advance(40, "transcript unavailable, continuing without it");
            })
            .await?;

        warn!(
            job_id = %job_id,
            course_id = %job.course_id,
            provider_ref = %event.job_reference_id,
            reason,
            "Transcription failed, course degraded to frames-only"
        );
    }

    // Settle the transcribe job either way: delivery and degradation are
    // both terminal for this step. `None` skips the ownership check; the
    // webhook never claimed the job.
    if !state.store.complete(&job_id, None).await? {
        // Lost a race with a recovery sweep; the reset job will resubmit.
        warn!(job_id = %job_id, "Webhook completion refused: job no longer processing");
        return Ok(Json(WebhookResponse {
            status: "stale",
            analysis_enqueued: false,
        }));
    }

    // Sibling check: enqueue analysis only once frame extraction has also
    // completed. Frames may be milliseconds from settling, so retry a few
    // times before leaving continuation to the sibling's completion path,
    // which performs the same idempotent check.
    let mut analysis_enqueued = false;
    for attempt in 0..SIBLING_POLL_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(SIBLING_POLL_DELAY).await;
        }
        if maybe_enqueue_analysis(&state.store, &state.courses, &job.course_id).await? {
            analysis_enqueued = true;
            break;
        }
        if analysis_prerequisites_settled(&state.store, &state.courses, &job.course_id).await? {
            // Settled, but the step was already enqueued elsewhere.
            break;
        }
        debug!(course_id = %job.course_id, attempt, "Sibling step not settled yet");
    }

    Ok(Json(WebhookResponse {
        status: "ok",
        analysis_enqueued,
    }))
}
