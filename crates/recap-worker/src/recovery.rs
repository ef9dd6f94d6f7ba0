//! Periodic recovery sweeps.
//!
//! Wires the store's two sweeps to timers: the visibility sweep catches
//! jobs whose deadline lapsed (crashed workers, lost webhooks), and the
//! heartbeat sweep catches processing jobs with no live claimant at all.
//! Escalations from either sweep notify operators and park the course.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use recap_models::CourseStatus;
use recap_queue::RecoverySummary;

use crate::executor::ProcessingContext;

/// Spawn the sweep loop. Returns its handle; the loop exits on shutdown.
pub fn spawn_recovery_sweeps(
    ctx: Arc<ProcessingContext>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut expiry = tokio::time::interval(ctx.config.expiry_sweep_interval);
        let mut stall = tokio::time::interval(ctx.config.stall_sweep_interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Recovery sweeps stopping");
                        break;
                    }
                }
                _ = expiry.tick() => {
                    match ctx.store.recover_expired(Utc::now()).await {
                        Ok(summary) => handle_summary(&ctx, "visibility", summary).await,
                        Err(e) => error!(error = %e, "Visibility sweep failed"),
                    }
                }
                _ = stall.tick() => {
                    match ctx.store.recover_stalled(Utc::now(), ctx.config.stall_grace).await {
                        Ok(summary) => handle_summary(&ctx, "heartbeat", summary).await,
                        Err(e) => error!(error = %e, "Heartbeat sweep failed"),
                    }
                }
            }
        }
    })
}

async fn handle_summary(ctx: &Arc<ProcessingContext>, sweep: &str, summary: RecoverySummary) {
    if summary.recovered() > 0 {
        info!(
            sweep,
            scanned = summary.scanned,
            reset = summary.reset.len(),
            escalated = summary.escalated.len(),
            "Recovery sweep completed"
        );
    }

    for job in &summary.escalated {
        if let Err(e) = ctx.ops.notify_manual_review(job).await {
            warn!(job_id = %job.id, error = %e, "Escalation notification failed");
        }

        let result = ctx
            .courses
            .update(&job.course_id, |course| {
                course.status = CourseStatus::ManualReview;
            })
            .await;
        if let Err(e) = result {
            warn!(course_id = %job.course_id, error = %e, "Failed to park course for review");
        }
    }
}
