//! Step executor.
//!
//! Runs one claimed job end to end: keeps ownership fresh with a heartbeat
//! task, dispatches to the step handler, then settles the job through the
//! store's complete/fail RPCs. Continuation (enqueueing whatever the
//! finished step unlocks) happens here, not in the handlers, so every step
//! settles through one path.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use recap_models::{CourseStatus, Job, PipelineStep};
use recap_providers::{
    AnalysisClient, NoopOpsNotifier, OpsNotifier, TranscriptionClient, WebhookOpsNotifier,
};
use recap_queue::pipeline::{enqueue_step, maybe_enqueue_analysis};
use recap_queue::{CourseStore, FailOutcome, JobStore};
use recap_storage::ObjectStoreClient;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::steps;

/// What a step handler produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Step finished; complete the job and run continuation.
    Completed,
    /// Work handed to an external provider; the job stays `processing`
    /// until the webhook continuation settles it.
    AwaitingCallback,
}

/// Shared dependencies for step execution.
pub struct ProcessingContext {
    pub config: WorkerConfig,
    pub store: Arc<JobStore>,
    pub courses: Arc<CourseStore>,
    pub storage: Arc<ObjectStoreClient>,
    pub transcription: TranscriptionClient,
    pub analysis: AnalysisClient,
    pub ops: Arc<dyn OpsNotifier>,
    cancel: watch::Sender<bool>,
}

impl ProcessingContext {
    /// Build the context from environment configuration.
    pub async fn new(config: WorkerConfig) -> WorkerResult<Self> {
        let store = Arc::new(JobStore::from_env()?);
        let courses = Arc::new(CourseStore::from_env()?);
        let storage = Arc::new(ObjectStoreClient::from_env().await?);
        let transcription = TranscriptionClient::from_env()?;
        let analysis = AnalysisClient::from_env()?;
        let ops: Arc<dyn OpsNotifier> = match WebhookOpsNotifier::from_env()? {
            Some(notifier) => Arc::new(notifier),
            None => Arc::new(NoopOpsNotifier),
        };
        let (cancel, _) = watch::channel(false);

        Ok(Self {
            config,
            store,
            courses,
            storage,
            transcription,
            analysis,
            ops,
            cancel,
        })
    }

    /// Receiver for the in-flight cancellation signal.
    pub fn cancel_rx(&self) -> watch::Receiver<bool> {
        self.cancel.subscribe()
    }

    /// Signal in-flight work (extraction waves, FFmpeg runs) to stop.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }
}

/// Execute one claimed job. Never returns an error: every outcome settles
/// through the store, and settlement failures are logged for the sweeps to
/// mop up after the visibility deadline.
pub async fn execute_job(ctx: Arc<ProcessingContext>, job: Job, worker_id: String) {
    info!(
        job_id = %job.id,
        course_id = %job.course_id,
        step = %job.step,
        attempt_count = job.attempt_count,
        "Executing job"
    );

    let heartbeat = spawn_heartbeat(&ctx, &job, &worker_id);

    let result = tokio::time::timeout(ctx.config.job_timeout, run_step(&ctx, &job)).await;

    heartbeat.stop().await;

    match result {
        Err(_) => {
            let message = format!(
                "step timed out after {}s",
                ctx.config.job_timeout.as_secs()
            );
            warn!(job_id = %job.id, step = %job.step, "{message}");
            settle_failure(&ctx, &job, &worker_id, &message, true).await;
        }
        Ok(Ok(StepOutcome::AwaitingCallback)) => {
            // Stamp the long callback deadline only after the heartbeat task
            // has stopped, so a racing short extension cannot shorten it.
            match ctx
                .store
                .extend_visibility(&job.id, &worker_id, ctx.config.async_visibility)
                .await
            {
                Ok(true) => {
                    info!(job_id = %job.id, step = %job.step, "Awaiting provider callback");
                }
                Ok(false) => {
                    warn!(job_id = %job.id, "Callback deadline refused: ownership lost");
                }
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "Failed to stamp callback deadline");
                }
            }
        }
        Ok(Ok(StepOutcome::Completed)) => {
            match ctx.store.complete(&job.id, Some(&worker_id)).await {
                Ok(true) => {
                    info!(job_id = %job.id, step = %job.step, "Job completed");
                    run_continuation(&ctx, &job).await;
                }
                Ok(false) => {
                    warn!(job_id = %job.id, "Completion skipped: ownership lost");
                }
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "Failed to record completion");
                }
            }
        }
        Ok(Err(e)) => {
            let retry = e.is_retryable();
            error!(job_id = %job.id, step = %job.step, error = %e, retry, "Step failed");
            settle_failure(&ctx, &job, &worker_id, &e.to_string(), retry).await;
        }
    }
}

/// Dispatch to the step handler.
async fn run_step(ctx: &Arc<ProcessingContext>, job: &Job) -> WorkerResult<StepOutcome> {
    match job.step {
        PipelineStep::Transcribe => steps::transcribe::run(ctx, job).await,
        PipelineStep::ExtractFrames => steps::extract::run(ctx, job).await,
        PipelineStep::Analyze => steps::analyze::run(ctx, job).await,
        PipelineStep::GenerateArtifact => steps::artifact::run(ctx, job).await,
    }
}

/// Enqueue whatever the finished step unlocks.
async fn run_continuation(ctx: &Arc<ProcessingContext>, job: &Job) {
    let result = match job.step {
        // Sibling step: analysis waits for the transcript to settle too.
        PipelineStep::ExtractFrames => {
            maybe_enqueue_analysis(&ctx.store, &ctx.courses, &job.course_id)
                .await
                .map(|_| ())
        }
        PipelineStep::Analyze => match job.step.next() {
            Some(next) => enqueue_step(&ctx.store, &job.course_id, next)
                .await
                .map(|_| ()),
            None => Ok(()),
        },
        _ => Ok(()),
    };

    if let Err(e) = result {
        // The dedup guard makes re-running this continuation safe; the next
        // webhook delivery or sweep retries it.
        error!(job_id = %job.id, step = %job.step, error = %e, "Continuation enqueue failed");
    }
}

/// Route a step failure through the fail RPC and mirror terminal outcomes
/// onto the course.
async fn settle_failure(
    ctx: &Arc<ProcessingContext>,
    job: &Job,
    worker_id: &str,
    message: &str,
    retry: bool,
) {
    match ctx.store.fail(&job.id, worker_id, message, retry).await {
        Ok(FailOutcome::Reset) => {
            info!(job_id = %job.id, "Job reset for retry");
        }
        Ok(FailOutcome::Escalated) => {
            warn!(job_id = %job.id, course_id = %job.course_id, "Job escalated to manual review");
            if let Ok(Some(parked)) = ctx.store.get(&job.id).await {
                if let Err(e) = ctx.ops.notify_manual_review(&parked).await {
                    warn!(job_id = %job.id, error = %e, "Escalation notification failed");
                }
            }
            mark_course(ctx, job, CourseStatus::ManualReview).await;
        }
        Ok(FailOutcome::TerminallyFailed) => {
            mark_course(ctx, job, CourseStatus::Failed).await;
        }
        Ok(FailOutcome::Stale) => {
            warn!(job_id = %job.id, "Fail skipped: job no longer processing or owned elsewhere");
        }
        Err(e) => {
            error!(job_id = %job.id, error = %e, "Failed to settle job failure");
        }
    }
}

async fn mark_course(ctx: &Arc<ProcessingContext>, job: &Job, status: CourseStatus) {
    let result = ctx
        .courses
        .update(&job.course_id, |course| {
            course.status = status;
        })
        .await;
    if let Err(e) = result {
        warn!(course_id = %job.course_id, error = %e, "Failed to update course status");
    }
}

/// Handle to a running heartbeat task.
struct HeartbeatHandle {
    stop: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl HeartbeatHandle {
    async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

/// Refresh the heartbeat key and push the visibility deadline forward while
/// the step runs, so neither sweep reclaims a live job.
fn spawn_heartbeat(ctx: &Arc<ProcessingContext>, job: &Job, worker_id: &str) -> HeartbeatHandle {
    let (stop, mut stop_rx) = watch::channel(false);
    let store = Arc::clone(&ctx.store);
    let job_id = job.id.clone();
    let worker_id = worker_id.to_string();
    let interval = ctx.config.heartbeat_interval;
    let visibility = ctx.config.visibility;

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = store.heartbeat(&job_id).await {
                        warn!(job_id = %job_id, error = %e, "Heartbeat write failed");
                    }
                    match store.extend_visibility(&job_id, &worker_id, visibility).await {
                        Ok(true) => {}
                        Ok(false) => {
                            warn!(job_id = %job_id, "Visibility extension refused: ownership lost");
                            break;
                        }
                        Err(e) => {
                            warn!(job_id = %job_id, error = %e, "Visibility extension failed");
                        }
                    }
                }
            }
        }
    });

    HeartbeatHandle { stop, task }
}
