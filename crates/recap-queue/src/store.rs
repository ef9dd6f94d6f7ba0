//! The job table and its conditional mutation RPCs.
//!
//! Jobs live as Redis hashes (`recap:job:{id}`) with two zset indexes:
//! `recap:jobs:pending` scored by creation time (oldest first) and
//! `recap:jobs:processing` scored by visibility deadline. Every mutation
//! that races the claimers runs as a conditional server-side script, so a
//! status check and its update are a single atomic operation.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use recap_models::{CourseId, Job, JobId, JobStatus, PipelineStep};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};

/// Claims a pending job only if it is still pending, stamping claimant,
/// deadline and attempt count in the same server-side step. The error from
/// any previous attempt is cleared so the fresh delivery reads clean.
const CLAIM_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'status') ~= 'pending' then return 0 end
redis.call('HSET', KEYS[1],
    'status', 'processing',
    'claimed_by', ARGV[2],
    'claimed_at', ARGV[3],
    'visibility_deadline', ARGV[4],
    'updated_at', ARGV[3])
redis.call('HINCRBY', KEYS[1], 'attempt_count', 1)
redis.call('HDEL', KEYS[1], 'error_message')
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('ZADD', KEYS[3], ARGV[5], ARGV[1])
return 1
"#;

/// Completes a processing job; acks idempotently if already completed.
/// An empty worker argument skips the ownership check (webhook path).
const COMPLETE_SCRIPT: &str = r#"
local status = redis.call('HGET', KEYS[1], 'status')
if status == 'completed' then return 1 end
if status ~= 'processing' then return 0 end
if ARGV[2] ~= '' then
    if redis.call('HGET', KEYS[1], 'claimed_by') ~= ARGV[2] then return 0 end
end
redis.call('HSET', KEYS[1], 'status', 'completed', 'updated_at', ARGV[3])
redis.call('HDEL', KEYS[1], 'claimed_by', 'visibility_deadline')
redis.call('ZREM', KEYS[2], ARGV[1])
return 1
"#;

/// Resets a processing job to pending, preserving its original queue
/// position so retried jobs stay oldest-first. An empty worker argument
/// skips the ownership check (recovery sweeps act on abandoned jobs); a
/// named worker is refused once another claimant holds the job, so a stale
/// worker cannot knock a legitimately re-claimed job back to pending.
const RESET_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'status') ~= 'processing' then return 0 end
if ARGV[2] ~= '' then
    if redis.call('HGET', KEYS[1], 'claimed_by') ~= ARGV[2] then return 0 end
end
redis.call('HSET', KEYS[1], 'status', 'pending', 'error_message', ARGV[3], 'updated_at', ARGV[4])
redis.call('HDEL', KEYS[1], 'claimed_by', 'claimed_at', 'visibility_deadline')
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('ZADD', KEYS[3], ARGV[5], ARGV[1])
return 1
"#;

/// Moves a processing job to a terminal state (`failed` or `manual_review`).
/// Same ownership convention as the reset script.
const TERMINAL_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'status') ~= 'processing' then return 0 end
if ARGV[2] ~= '' then
    if redis.call('HGET', KEYS[1], 'claimed_by') ~= ARGV[2] then return 0 end
end
redis.call('HSET', KEYS[1], 'status', ARGV[3], 'error_message', ARGV[4], 'updated_at', ARGV[5])
redis.call('HDEL', KEYS[1], 'claimed_by', 'visibility_deadline')
redis.call('ZREM', KEYS[2], ARGV[1])
if ARGV[3] == 'manual_review' then redis.call('SADD', KEYS[3], ARGV[1]) end
return 1
"#;

/// Pushes the visibility deadline forward for the current claimant only.
const EXTEND_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'status') ~= 'processing' then return 0 end
if redis.call('HGET', KEYS[1], 'claimed_by') ~= ARGV[2] then return 0 end
redis.call('HSET', KEYS[1], 'visibility_deadline', ARGV[3], 'updated_at', ARGV[5])
redis.call('ZADD', KEYS[2], ARGV[4], ARGV[1])
return 1
"#;

/// Outcome of a `fail` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    /// Job reset to pending for another delivery
    Reset,
    /// Retry ceiling reached, parked for manual review
    Escalated,
    /// Permanent error, terminally failed
    TerminallyFailed,
    /// Job was no longer processing; nothing to do
    Stale,
}

/// Durable job store.
pub struct JobStore {
    client: redis::Client,
    config: QueueConfig,
    claim_script: redis::Script,
    complete_script: redis::Script,
    reset_script: redis::Script,
    terminal_script: redis::Script,
    extend_script: redis::Script,
}

impl JobStore {
    /// Create a new job store.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            claim_script: redis::Script::new(CLAIM_SCRIPT),
            complete_script: redis::Script::new(COMPLETE_SCRIPT),
            reset_script: redis::Script::new(RESET_SCRIPT),
            terminal_script: redis::Script::new(TERMINAL_SCRIPT),
            extend_script: redis::Script::new(EXTEND_SCRIPT),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Retry ceiling from config.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    pub(crate) async fn conn(&self) -> QueueResult<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    pub(crate) fn claim_script(&self) -> &redis::Script {
        &self.claim_script
    }

    /// Insert a new pending job, guarded by its idempotency key.
    ///
    /// Returns `false` without inserting when a live job for the same
    /// (course, step) already exists — duplicate enqueues are acks, not
    /// errors, so webhook redelivery stays idempotent. The guard is a
    /// single `SET NX EX`, so two concurrent enqueues of the same
    /// (course, step) race on the key and exactly one insert wins.
    pub async fn create(&self, job: &Job) -> QueueResult<bool> {
        let mut conn = self.conn().await?;

        let dedup_key = self.config.dedup_key(&job.idempotency_key());
        let acquired: Option<String> = dedup_guard(&dedup_key, self.config.dedup_ttl)
            .query_async(&mut conn)
            .await?;
        if acquired.is_none() {
            debug!(job_id = %job.id, step = %job.step, "Duplicate enqueue suppressed");
            return Ok(false);
        }

        let fields = job_to_fields(job);
        let score = job.created_at.timestamp_millis();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_multiple(self.config.job_key(&job.id), &fields)
            .zadd(self.config.pending_key(), job.id.as_str(), score)
            .hset(
                self.config.course_jobs_key(&job.course_id),
                job.step.as_str(),
                job.id.as_str(),
            );
        if let Err(e) = pipe.query_async::<()>(&mut conn).await {
            // Release the guard so the enqueue can be retried before the
            // dedup TTL lapses.
            let _ = conn.del::<_, ()>(&dedup_key).await;
            return Err(e.into());
        }

        info!(job_id = %job.id, course_id = %job.course_id, step = %job.step, "Enqueued job");
        Ok(true)
    }

    /// Load a job by id.
    pub async fn get(&self, id: &JobId) -> QueueResult<Option<Job>> {
        let mut conn = self.conn().await?;
        let fields: HashMap<String, String> = conn.hgetall(self.config.job_key(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(job_from_fields(fields)?))
    }

    /// Look up the job recorded for a given course step.
    pub async fn job_for_step(
        &self,
        course_id: &CourseId,
        step: PipelineStep,
    ) -> QueueResult<Option<Job>> {
        let mut conn = self.conn().await?;
        let job_id: Option<String> = conn
            .hget(self.config.course_jobs_key(course_id), step.as_str())
            .await?;
        match job_id {
            Some(id) => self.get(&JobId::from(id)).await,
            None => Ok(None),
        }
    }

    /// Mark a job completed. `worker_id` of `None` skips the ownership
    /// check (webhook continuation completes jobs it never claimed).
    /// Returns `false` when the job was not in a completable state.
    pub async fn complete(&self, id: &JobId, worker_id: Option<&str>) -> QueueResult<bool> {
        let mut conn = self.conn().await?;
        let now = Utc::now();

        let done: i64 = self
            .complete_script
            .key(self.config.job_key(id))
            .key(self.config.processing_key())
            .arg(id.as_str())
            .arg(worker_id.unwrap_or(""))
            .arg(now.to_rfc3339())
            .invoke_async(&mut conn)
            .await?;

        if done == 1 {
            conn.del::<_, ()>(self.config.heartbeat_key(id)).await?;
            info!(job_id = %id, "Job completed");
            Ok(true)
        } else {
            warn!(job_id = %id, "Complete skipped: job not processing or owned elsewhere");
            Ok(false)
        }
    }

    /// Fail RPC: reset for retry or escalate per the retry ceiling.
    ///
    /// `attempt_count` was already incremented by the claim that delivered
    /// this attempt; the ceiling comparison happens here. Ownership is
    /// enforced server-side: a worker whose claim has since been recovered
    /// and handed to another claimant gets `Stale` back instead of
    /// disturbing the new claimant's delivery.
    pub async fn fail(
        &self,
        id: &JobId,
        worker_id: &str,
        error: &str,
        should_retry: bool,
    ) -> QueueResult<FailOutcome> {
        let Some(job) = self.get(id).await? else {
            return Err(QueueError::JobNotFound(id.to_string()));
        };
        if job.status != JobStatus::Processing {
            return Ok(FailOutcome::Stale);
        }

        let outcome = if !should_retry {
            if self.terminate(id, worker_id, JobStatus::Failed, error).await? {
                FailOutcome::TerminallyFailed
            } else {
                FailOutcome::Stale
            }
        } else if job.attempt_count >= self.config.max_attempts {
            let reason = format!(
                "retry ceiling reached after {} attempts: {}",
                job.attempt_count, error
            );
            if self
                .terminate(id, worker_id, JobStatus::ManualReview, &reason)
                .await?
            {
                FailOutcome::Escalated
            } else {
                FailOutcome::Stale
            }
        } else if self.reset(id, worker_id, job.created_at, error).await? {
            FailOutcome::Reset
        } else {
            FailOutcome::Stale
        };

        Ok(outcome)
    }

    /// Reset a processing job back to pending (recoverable failure).
    /// An empty `worker_id` skips the ownership check (recovery sweeps).
    pub(crate) async fn reset(
        &self,
        id: &JobId,
        worker_id: &str,
        created_at: DateTime<Utc>,
        reason: &str,
    ) -> QueueResult<bool> {
        let mut conn = self.conn().await?;
        let now = Utc::now();

        let done: i64 = self
            .reset_script
            .key(self.config.job_key(id))
            .key(self.config.processing_key())
            .key(self.config.pending_key())
            .arg(id.as_str())
            .arg(worker_id)
            .arg(reason)
            .arg(now.to_rfc3339())
            .arg(created_at.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        if done == 1 {
            conn.del::<_, ()>(self.config.heartbeat_key(id)).await?;
            info!(job_id = %id, reason, "Job reset to pending");
        }
        Ok(done == 1)
    }

    /// Move a processing job to `failed` or `manual_review`.
    /// An empty `worker_id` skips the ownership check (recovery sweeps).
    pub(crate) async fn terminate(
        &self,
        id: &JobId,
        worker_id: &str,
        status: JobStatus,
        reason: &str,
    ) -> QueueResult<bool> {
        debug_assert!(matches!(
            status,
            JobStatus::Failed | JobStatus::ManualReview
        ));
        let mut conn = self.conn().await?;
        let now = Utc::now();

        let done: i64 = self
            .terminal_script
            .key(self.config.job_key(id))
            .key(self.config.processing_key())
            .key(self.config.review_key())
            .arg(id.as_str())
            .arg(worker_id)
            .arg(status.as_str())
            .arg(reason)
            .arg(now.to_rfc3339())
            .invoke_async(&mut conn)
            .await?;

        if done == 1 {
            conn.del::<_, ()>(self.config.heartbeat_key(id)).await?;
            warn!(job_id = %id, status = %status, reason, "Job terminated");
        }
        Ok(done == 1)
    }

    /// Push the visibility deadline forward. Used as the heartbeat path for
    /// long-running and asynchronous steps.
    pub async fn extend_visibility(
        &self,
        id: &JobId,
        worker_id: &str,
        visibility: Duration,
    ) -> QueueResult<bool> {
        let mut conn = self.conn().await?;
        let now = Utc::now();
        let deadline = now + chrono::Duration::from_std(visibility).unwrap_or_default();

        let done: i64 = self
            .extend_script
            .key(self.config.job_key(id))
            .key(self.config.processing_key())
            .arg(id.as_str())
            .arg(worker_id)
            .arg(deadline.to_rfc3339())
            .arg(deadline.timestamp_millis())
            .arg(now.to_rfc3339())
            .invoke_async(&mut conn)
            .await?;

        Ok(done == 1)
    }

    /// Refresh the worker heartbeat key for a job.
    pub async fn heartbeat(&self, id: &JobId) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(
            self.config.heartbeat_key(id),
            Utc::now().to_rfc3339(),
            self.config.heartbeat_ttl.as_secs(),
        )
        .await?;
        Ok(())
    }

    /// Whether a recent heartbeat exists for a job.
    pub async fn heartbeat_alive(&self, id: &JobId) -> QueueResult<bool> {
        let mut conn = self.conn().await?;
        Ok(conn.exists(self.config.heartbeat_key(id)).await?)
    }

    /// Persist a metadata entry on a job (e.g. the provider job reference).
    pub async fn set_metadata(&self, id: &JobId, key: &str, value: &str) -> QueueResult<()> {
        let Some(mut job) = self.get(id).await? else {
            return Err(QueueError::JobNotFound(id.to_string()));
        };
        job.metadata.insert(key.to_string(), value.to_string());
        job.updated_at = Utc::now();

        let mut conn = self.conn().await?;
        conn.hset_multiple::<_, _, _, ()>(
            self.config.job_key(id),
            &[
                ("metadata", serde_json::to_string(&job.metadata)?),
                ("updated_at", job.updated_at.to_rfc3339()),
            ],
        )
        .await?;
        Ok(())
    }

    /// Register a continuation token for webhook correlation.
    pub async fn register_token(&self, token: &str, id: &JobId) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(
            self.config.token_key(token),
            id.as_str(),
            self.config.token_ttl.as_secs(),
        )
        .await?;
        Ok(())
    }

    /// Resolve a continuation token back to its job.
    pub async fn lookup_token(&self, token: &str) -> QueueResult<Option<JobId>> {
        let mut conn = self.conn().await?;
        let id: Option<String> = conn.get(self.config.token_key(token)).await?;
        Ok(id.map(JobId::from))
    }

    /// Number of pending jobs.
    pub async fn pending_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.zcard(self.config.pending_key()).await?)
    }

    /// Number of processing jobs.
    pub async fn processing_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.zcard(self.config.processing_key()).await?)
    }

    /// Number of jobs parked for manual review.
    pub async fn review_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.scard(self.config.review_key()).await?)
    }

    /// Oldest pending job id, if any.
    pub(crate) async fn oldest_pending(&self) -> QueueResult<Option<JobId>> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn.zrange(self.config.pending_key(), 0, 0).await?;
        Ok(ids.into_iter().next().map(JobId::from))
    }

    /// Processing jobs whose visibility deadline lapsed before `now`.
    pub(crate) async fn expired_processing(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> QueueResult<Vec<JobId>> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn
            .zrangebyscore_limit(
                self.config.processing_key(),
                "-inf",
                now.timestamp_millis(),
                0,
                limit as isize,
            )
            .await?;
        Ok(ids.into_iter().map(JobId::from).collect())
    }

    /// A bounded slice of all processing job ids (heartbeat sweep input).
    pub(crate) async fn processing_ids(&self, limit: usize) -> QueueResult<Vec<JobId>> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn
            .zrange(self.config.processing_key(), 0, limit as isize - 1)
            .await?;
        Ok(ids.into_iter().map(JobId::from).collect())
    }
}

/// Atomic enqueue idempotency guard: claim the dedup key and stamp its TTL
/// in one command, so concurrent duplicate enqueues cannot both pass.
pub(crate) fn dedup_guard(key: &str, ttl: Duration) -> redis::Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg("1").arg("NX").arg("EX").arg(ttl.as_secs());
    cmd
}

/// Flatten a job into redis hash fields.
pub(crate) fn job_to_fields(job: &Job) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("id", job.id.to_string()),
        ("course_id", job.course_id.to_string()),
        ("step", job.step.as_str().to_string()),
        ("status", job.status.as_str().to_string()),
        (
            "attempt_count",
            job.attempt_count.to_string(),
        ),
        (
            "metadata",
            serde_json::to_string(&job.metadata).unwrap_or_else(|_| "{}".to_string()),
        ),
        ("created_at", job.created_at.to_rfc3339()),
        ("updated_at", job.updated_at.to_rfc3339()),
    ];
    if let Some(claimed_by) = &job.claimed_by {
        fields.push(("claimed_by", claimed_by.clone()));
    }
    if let Some(claimed_at) = &job.claimed_at {
        fields.push(("claimed_at", claimed_at.to_rfc3339()));
    }
    if let Some(deadline) = &job.visibility_deadline {
        fields.push(("visibility_deadline", deadline.to_rfc3339()));
    }
    if let Some(error) = &job.error_message {
        fields.push(("error_message", error.clone()));
    }
    fields
}

/// Rebuild a job from redis hash fields.
pub(crate) fn job_from_fields(mut fields: HashMap<String, String>) -> QueueResult<Job> {
    fn required(fields: &mut HashMap<String, String>, name: &str) -> QueueResult<String> {
        fields
            .remove(name)
            .ok_or_else(|| QueueError::corrupt_record(format!("missing field '{name}'")))
    }

    fn timestamp(value: &str, name: &str) -> QueueResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| QueueError::corrupt_record(format!("bad timestamp '{name}': {e}")))
    }

    let id = JobId::from(required(&mut fields, "id")?);
    let course_id = CourseId::from(required(&mut fields, "course_id")?);
    let step: PipelineStep = required(&mut fields, "step")?
        .parse()
        .map_err(QueueError::corrupt_record)?;
    let status: JobStatus = required(&mut fields, "status")?
        .parse()
        .map_err(QueueError::corrupt_record)?;
    let attempt_count = required(&mut fields, "attempt_count")?
        .parse::<u32>()
        .map_err(|e| QueueError::corrupt_record(format!("bad attempt_count: {e}")))?;
    let metadata: HashMap<String, String> =
        serde_json::from_str(&required(&mut fields, "metadata")?)?;
    let created_at = timestamp(&required(&mut fields, "created_at")?, "created_at")?;
    let updated_at = timestamp(&required(&mut fields, "updated_at")?, "updated_at")?;

    let claimed_at = match fields.remove("claimed_at") {
        Some(v) => Some(timestamp(&v, "claimed_at")?),
        None => None,
    };
    let visibility_deadline = match fields.remove("visibility_deadline") {
        Some(v) => Some(timestamp(&v, "visibility_deadline")?),
        None => None,
    };

    Ok(Job {
        id,
        course_id,
        step,
        status,
        claimed_by: fields.remove("claimed_by"),
        claimed_at,
        visibility_deadline,
        attempt_count,
        metadata,
        error_message: fields.remove("error_message"),
        created_at,
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn fields_roundtrip_preserves_job() {
        let deadline = Utc::now() + ChronoDuration::minutes(30);
        let job = Job::new(CourseId::from_string("course-1"), PipelineStep::Transcribe)
            .with_metadata("provider_job_id", "prov-7")
            .claim("worker-a", deadline);

        let fields: HashMap<String, String> = job_to_fields(&job)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let restored = job_from_fields(fields).unwrap();

        assert_eq!(restored.id, job.id);
        assert_eq!(restored.course_id, job.course_id);
        assert_eq!(restored.step, job.step);
        assert_eq!(restored.status, JobStatus::Processing);
        assert_eq!(restored.claimed_by.as_deref(), Some("worker-a"));
        assert_eq!(restored.attempt_count, 1);
        assert_eq!(
            restored.metadata.get("provider_job_id").map(String::as_str),
            Some("prov-7")
        );
        assert!(restored.visibility_deadline.is_some());
    }

    #[test]
    fn pending_job_omits_claimant_fields() {
        let job = Job::new(CourseId::new(), PipelineStep::Analyze);
        let fields = job_to_fields(&job);
        assert!(fields.iter().all(|(k, _)| *k != "claimed_by"));
        assert!(fields.iter().all(|(k, _)| *k != "visibility_deadline"));
    }

    #[test]
    fn corrupt_record_is_reported_not_panicked() {
        let mut fields = HashMap::new();
        fields.insert("id".to_string(), "j1".to_string());
        let err = job_from_fields(fields).unwrap_err();
        assert!(matches!(err, QueueError::CorruptRecord(_)));
    }

    #[test]
    fn mutation_scripts_enforce_claimant_ownership() {
        // A worker whose claim was recovered and re-issued must not be able
        // to complete, reset, or terminate the new claimant's delivery. The
        // empty-worker convention stays available for the recovery sweeps.
        for script in [COMPLETE_SCRIPT, RESET_SCRIPT, TERMINAL_SCRIPT] {
            assert!(script.contains("'claimed_by') ~= ARGV[2] then return 0"));
            assert!(script.contains("if ARGV[2] ~= ''"));
        }
        // Extensions always come from the claimant; no sweep bypass.
        assert!(EXTEND_SCRIPT.contains("'claimed_by') ~= ARGV[2] then return 0"));
        assert!(!EXTEND_SCRIPT.contains("ARGV[2] ~= ''"));
    }

    #[test]
    fn claim_script_clears_previous_error() {
        assert!(CLAIM_SCRIPT.contains("redis.call('HDEL', KEYS[1], 'error_message')"));
    }

    #[test]
    fn dedup_guard_is_one_conditional_command() {
        let packed = dedup_guard("recap:dedup:analyze:c1", Duration::from_secs(60))
            .get_packed_command();
        let packed = String::from_utf8_lossy(&packed);
        assert!(packed.contains("SET"));
        assert!(packed.contains("NX"));
        assert!(packed.contains("EX"));
        assert!(packed.contains("recap:dedup:analyze:c1"));
    }
}
