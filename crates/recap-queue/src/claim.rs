//! Atomic job claiming.
//!
//! Claiming is an optimistic compare-and-swap: read the oldest pending job
//! id, then run a conditional server-side update that only succeeds while
//! the job is still `pending`. Losing the race to another claimer is
//! expected, not exceptional — the loser backs off with jitter and tries
//! the next candidate, up to a small bounded number of attempts.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::{debug, info};

use recap_models::{Job, JobStatus};

use crate::error::QueueResult;
use crate::store::JobStore;

/// CAS attempts before the claimer reports "no job right now".
const CLAIM_ATTEMPTS: u32 = 3;

/// Base delay for the contention backoff.
const CLAIM_BACKOFF_BASE: Duration = Duration::from_millis(25);

/// Exponential backoff with full jitter for attempt `attempt` (0-based).
pub(crate) fn contention_backoff(attempt: u32, base: Duration) -> Duration {
    let ceiling = base.saturating_mul(2u32.saturating_pow(attempt));
    let jitter_ms = rand::rng().random_range(0..=ceiling.as_millis() as u64);
    Duration::from_millis(jitter_ms)
}

impl JobStore {
    /// Claim the oldest pending job for `worker_id`.
    ///
    /// Atomically sets `status=processing`, `claimed_by`, `claimed_at`,
    /// `visibility_deadline = now + visibility` and increments
    /// `attempt_count`, moving the job from the pending to the processing
    /// index. Returns `None` when no eligible job exists or when every
    /// bounded attempt lost a claim race.
    pub async fn claim(&self, worker_id: &str, visibility: Duration) -> QueueResult<Option<Job>> {
        for attempt in 0..CLAIM_ATTEMPTS {
            let Some(candidate) = self.oldest_pending().await? else {
                return Ok(None);
            };

            let now = Utc::now();
            let deadline = now + chrono::Duration::from_std(visibility).unwrap_or_default();

            let mut conn = self.conn().await?;
            let won: i64 = self
                .claim_script()
                .key(self.config().job_key(&candidate))
                .key(self.config().pending_key())
                .key(self.config().processing_key())
                .arg(candidate.as_str())
                .arg(worker_id)
                .arg(now.to_rfc3339())
                .arg(deadline.to_rfc3339())
                .arg(deadline.timestamp_millis())
                .invoke_async(&mut conn)
                .await?;

            if won == 1 {
                let job = self.get(&candidate).await?;
                if let Some(job) = &job {
                    debug_assert_eq!(job.status, JobStatus::Processing);
                    info!(
                        job_id = %job.id,
                        course_id = %job.course_id,
                        step = %job.step,
                        worker_id,
                        attempt_count = job.attempt_count,
                        "Claimed job"
                    );
                }
                return Ok(job);
            }

            // Another claimer won this candidate between the index read and
            // the conditional update.
            let backoff = contention_backoff(attempt, CLAIM_BACKOFF_BASE);
            debug!(
                job_id = %candidate,
                worker_id,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                "Claim race lost, backing off"
            );
            tokio::time::sleep(backoff).await;
        }

        debug!(worker_id, "Claim attempts exhausted under contention");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_bounded_by_exponential_ceiling() {
        let base = Duration::from_millis(25);
        for attempt in 0..4 {
            let ceiling = base * 2u32.pow(attempt);
            for _ in 0..50 {
                let delay = contention_backoff(attempt, base);
                assert!(delay <= ceiling, "attempt {attempt}: {delay:?} > {ceiling:?}");
            }
        }
    }

    #[test]
    fn backoff_ceiling_grows_per_attempt() {
        let base = Duration::from_millis(100);
        // With full jitter the max possible delay doubles each attempt.
        let max0 = base * 1;
        let max2 = base * 4;
        assert!(contention_backoff(0, base) <= max0);
        assert!(contention_backoff(2, base) <= max2);
    }
}
