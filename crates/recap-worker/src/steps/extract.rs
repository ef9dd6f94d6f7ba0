//! Frame extraction step.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use recap_models::{CourseStatus, ExtractionRequest, Job};

use crate::error::{WorkerError, WorkerResult};
use crate::executor::{ProcessingContext, StepOutcome};
use crate::frame_sink::ObjectStoreFrameSink;

pub async fn run(ctx: &Arc<ProcessingContext>, job: &Job) -> WorkerResult<StepOutcome> {
    let course = ctx
        .courses
        .update(&job.course_id, |course| {
            course.status = CourseStatus::Processing;
            course.advance(20, "extracting frames");
        })
        .await?;

    let work_dir = PathBuf::from(&ctx.config.work_dir).join(job.course_id.as_str());
    tokio::fs::create_dir_all(&work_dir).await?;

    let source = fetch_source(&course.source_url, &work_dir).await?;

    let request = ExtractionRequest {
        video_ref: course.source_url.clone(),
        worker_count: ctx.config.extraction_workers,
        chunk_duration_seconds: ctx.config.chunk_duration_seconds,
        target_fps: ctx.config.target_fps,
    };

    let sink = Arc::new(ObjectStoreFrameSink::new(
        Arc::clone(&ctx.storage),
        job.course_id.clone(),
    ));

    let report = recap_media::extract(
        &source,
        &request,
        sink,
        &work_dir,
        ctx.config.frame_batch_size,
        ctx.config.chunk_timeout_secs,
        ctx.cancel_rx(),
    )
    .await?;

    if report.frame_urls.is_empty() {
        return Err(WorkerError::job_failed(
            "extraction produced no frames (all chunks failed)",
        ));
    }
    if report.partial_failures > 0 {
        warn!(
            course_id = %job.course_id,
            partial_failures = report.partial_failures,
            "Extraction completed with failed chunks"
        );
    }

    ctx.courses
        .update(&job.course_id, |course| {
            course.duration_seconds = Some(report.duration_seconds);
            course.frame_urls = report.frame_urls.clone();
            course.extraction_partial_failures = report.partial_failures;
            course.advance(50, "frames extracted");
        })
        .await?;

    if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
        warn!(path = %work_dir.display(), error = %e, "Failed to clean work dir");
    }

    info!(
        job_id = %job.id,
        course_id = %job.course_id,
        frames = report.frame_urls.len(),
        "Frame extraction step finished"
    );

    Ok(StepOutcome::Completed)
}

/// Materialize the source video locally. Remote sources stream to disk in
/// the job's work dir; local paths are used in place.
async fn fetch_source(source_url: &str, work_dir: &Path) -> WorkerResult<PathBuf> {
    if !source_url.starts_with("http://") && !source_url.starts_with("https://") {
        let path = PathBuf::from(source_url);
        if !path.exists() {
            return Err(WorkerError::invalid_input(format!(
                "source file not found: {source_url}"
            )));
        }
        return Ok(path);
    }

    let dest = work_dir.join("source.mp4");
    info!(url = source_url, dest = %dest.display(), "Downloading source video");

    let response = reqwest::get(source_url)
        .await
        .map_err(|e| WorkerError::source_fetch(e.to_string()))?
        .error_for_status()
        .map_err(|e| WorkerError::source_fetch(e.to_string()))?;

    let mut file = tokio::fs::File::create(&dest).await?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| WorkerError::source_fetch(e.to_string()))?;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    Ok(dest)
}
