//! Stalled/expired job recovery.
//!
//! Two sweeps share one decision function and one mutation path:
//! - the visibility sweep resets or escalates jobs whose deadline lapsed;
//! - the heartbeat sweep catches processing jobs with no live heartbeat at
//!   all, independent of the deadline, as defense-in-depth.
//!
//! A job below the retry ceiling goes back to `pending`; at or over the
//! ceiling it is parked in `manual_review` and never retried automatically.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{info, warn};

use recap_models::{Job, JobId, JobStatus};

use crate::error::QueueResult;
use crate::store::JobStore;

/// Per-sweep scan bound.
const SWEEP_LIMIT: usize = 100;

/// What a sweep should do with one candidate job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Reset to pending for another delivery
    Reset { reason: String },
    /// Park for manual review
    Escalate { reason: String },
    /// Candidate is no longer eligible (completed meanwhile, etc.)
    Skip,
}

/// Decide the recovery action for a processing job presumed abandoned.
///
/// Pure so the ceiling arithmetic is testable without redis: a job that has
/// been delivered `ceiling` times escalates exactly on that failure, not
/// before, not after.
pub fn recovery_action(job: &Job, ceiling: u32, reason: &str) -> RecoveryAction {
    if job.status != JobStatus::Processing {
        return RecoveryAction::Skip;
    }
    if job.attempt_count >= ceiling {
        RecoveryAction::Escalate {
            reason: format!(
                "retry ceiling reached after {} attempts ({})",
                job.attempt_count, reason
            ),
        }
    } else {
        RecoveryAction::Reset {
            reason: reason.to_string(),
        }
    }
}

/// Result of one recovery sweep.
#[derive(Debug, Default)]
pub struct RecoverySummary {
    /// Jobs reset to pending
    pub reset: Vec<JobId>,
    /// Jobs escalated to manual review (full records, for ops alerting)
    pub escalated: Vec<Job>,
    /// Candidates examined
    pub scanned: usize,
}

impl RecoverySummary {
    pub fn recovered(&self) -> usize {
        self.reset.len() + self.escalated.len()
    }
}

impl JobStore {
    /// Visibility sweep: recover processing jobs whose deadline lapsed.
    pub async fn recover_expired(&self, now: DateTime<Utc>) -> QueueResult<RecoverySummary> {
        let candidates = self.expired_processing(now, SWEEP_LIMIT).await?;
        self.recover_candidates(candidates, now, "visibility timeout expired", |job| {
            job.is_expired(now)
        })
        .await
    }

    /// Heartbeat sweep: recover processing jobs with no live heartbeat,
    /// regardless of their visibility deadline. `grace` shields jobs whose
    /// claimant has not had time to emit a first heartbeat. Steps that wait
    /// on an external callback carry no heartbeat while parked, so they are
    /// excluded here and recovered by the visibility sweep alone.
    pub async fn recover_stalled(
        &self,
        now: DateTime<Utc>,
        grace: std::time::Duration,
    ) -> QueueResult<RecoverySummary> {
        let candidates = self.processing_ids(SWEEP_LIMIT).await?;
        let grace = ChronoDuration::from_std(grace).unwrap_or_default();

        let mut stalled = Vec::new();
        for id in candidates {
            if self.heartbeat_alive(&id).await? {
                continue;
            }
            stalled.push(id);
        }

        self.recover_candidates(stalled, now, "worker heartbeat lost", move |job| {
            !job.step.is_async()
                && job
                    .claimed_at
                    .map(|claimed| claimed + grace < now)
                    .unwrap_or(false)
        })
        .await
    }

    async fn recover_candidates<F>(
        &self,
        candidates: Vec<JobId>,
        _now: DateTime<Utc>,
        reason: &str,
        eligible: F,
    ) -> QueueResult<RecoverySummary>
    where
        F: Fn(&Job) -> bool,
    {
        let mut summary = RecoverySummary::default();

        for id in candidates {
            summary.scanned += 1;

            let Some(job) = self.get(&id).await? else {
                continue;
            };
            if !eligible(&job) {
                continue;
            }

            // Sweeps pass an empty worker: they recover jobs precisely
            // because no claimant is alive to assert ownership.
            match recovery_action(&job, self.max_attempts(), reason) {
                RecoveryAction::Reset { reason } => {
                    if self.reset(&id, "", job.created_at, &reason).await? {
                        info!(job_id = %id, step = %job.step, attempt_count = job.attempt_count, "Recovered abandoned job");
                        summary.reset.push(id);
                    }
                }
                RecoveryAction::Escalate { reason } => {
                    if self
                        .terminate(&id, "", JobStatus::ManualReview, &reason)
                        .await?
                    {
                        warn!(
                            job_id = %id,
                            course_id = %job.course_id,
                            step = %job.step,
                            attempt_count = job.attempt_count,
                            "Escalated job to manual review"
                        );
                        let mut escalated = job.clone();
                        escalated.status = JobStatus::ManualReview;
                        escalated.error_message = Some(reason);
                        summary.escalated.push(escalated);
                    }
                }
                RecoveryAction::Skip => {}
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use recap_models::{CourseId, PipelineStep};

    fn processing_job(attempts: u32) -> Job {
        let deadline = Utc::now() - Duration::minutes(1);
        let mut job =
            Job::new(CourseId::new(), PipelineStep::Transcribe).claim("worker-a", deadline);
        job.attempt_count = attempts;
        job
    }

    #[test]
    fn below_ceiling_resets() {
        let job = processing_job(2);
        match recovery_action(&job, 3, "visibility timeout expired") {
            RecoveryAction::Reset { reason } => {
                assert_eq!(reason, "visibility timeout expired");
            }
            other => panic!("expected reset, got {other:?}"),
        }
    }

    #[test]
    fn ceiling_escalates_exactly_on_nth_failure() {
        // Nth delivery means attempt_count == ceiling.
        let at_ceiling = processing_job(3);
        assert!(matches!(
            recovery_action(&at_ceiling, 3, "worker died"),
            RecoveryAction::Escalate { .. }
        ));

        let below = processing_job(2);
        assert!(matches!(
            recovery_action(&below, 3, "worker died"),
            RecoveryAction::Reset { .. }
        ));
    }

    #[test]
    fn non_processing_jobs_are_skipped() {
        let job = processing_job(1).complete();
        assert_eq!(
            recovery_action(&job, 3, "anything"),
            RecoveryAction::Skip
        );
    }

    #[test]
    fn escalation_reason_preserves_context() {
        let job = processing_job(5);
        match recovery_action(&job, 3, "worker heartbeat lost") {
            RecoveryAction::Escalate { reason } => {
                assert!(reason.contains("5 attempts"));
                assert!(reason.contains("worker heartbeat lost"));
            }
            other => panic!("expected escalate, got {other:?}"),
        }
    }
}
