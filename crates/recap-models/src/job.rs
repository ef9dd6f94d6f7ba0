//! Queue job definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::CourseId;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One step of the course pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    /// Send the source to the transcription provider (completes via webhook)
    Transcribe,
    /// Decode the source into a frame set
    ExtractFrames,
    /// Derive structured analysis from transcript + frames
    Analyze,
    /// Assemble and publish the final artifact
    GenerateArtifact,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::Transcribe => "transcribe",
            PipelineStep::ExtractFrames => "extract_frames",
            PipelineStep::Analyze => "analyze",
            PipelineStep::GenerateArtifact => "generate_artifact",
        }
    }

    /// The step enqueued after this one completes, if any.
    ///
    /// `Transcribe` and `ExtractFrames` are siblings: both feed `Analyze`,
    /// and the continuation logic decides when both prerequisites are
    /// settled. Neither has an unconditional successor.
    pub fn next(&self) -> Option<PipelineStep> {
        match self {
            PipelineStep::Transcribe | PipelineStep::ExtractFrames => None,
            PipelineStep::Analyze => Some(PipelineStep::GenerateArtifact),
            PipelineStep::GenerateArtifact => None,
        }
    }

    /// True for steps that hand work to an external provider and complete
    /// out-of-band via webhook.
    pub fn is_async(&self) -> bool {
        matches!(self, PipelineStep::Transcribe)
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PipelineStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transcribe" => Ok(PipelineStep::Transcribe),
            "extract_frames" => Ok(PipelineStep::ExtractFrames),
            "analyze" => Ok(PipelineStep::Analyze),
            "generate_artifact" => Ok(PipelineStep::GenerateArtifact),
            other => Err(format!("unknown pipeline step: {other}")),
        }
    }
}

/// Job state in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a claimant
    #[default]
    Pending,
    /// Claimed by a worker (or awaiting an external callback)
    Processing,
    /// Finished successfully
    Completed,
    /// Terminally failed
    Failed,
    /// Retry ceiling exhausted, parked for a human
    ManualReview,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::ManualReview => "manual_review",
        }
    }

    /// Terminal states receive no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::ManualReview
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "manual_review" => Ok(JobStatus::ManualReview),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// One queued unit of pipeline work for one step of one course.
///
/// Invariant: `status == Processing` if and only if `claimed_by` and
/// `visibility_deadline` are set. `attempt_count` only ever increases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// The course this job belongs to
    pub course_id: CourseId,

    /// Pipeline step this job performs
    pub step: PipelineStep,

    /// Queue state
    #[serde(default)]
    pub status: JobStatus,

    /// Identity of the current claimant, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,

    /// When the current claimant took the job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,

    /// Deadline after which the job is presumed abandoned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility_deadline: Option<DateTime<Utc>>,

    /// Delivery attempts so far (incremented on claim)
    #[serde(default)]
    pub attempt_count: u32,

    /// Opaque payload carried between steps
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Last recorded error, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new pending job for a course step.
    pub fn new(course_id: CourseId, step: PipelineStep) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            course_id,
            step,
            status: JobStatus::Pending,
            claimed_by: None,
            claimed_at: None,
            visibility_deadline: None,
            attempt_count: 0,
            metadata: HashMap::new(),
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Idempotency key: at most one live job per (course, step).
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.step, self.course_id)
    }

    /// Mark the job claimed by a worker. Clears any error left by a
    /// previous attempt so the new delivery reads clean.
    pub fn claim(mut self, worker_id: impl Into<String>, deadline: DateTime<Utc>) -> Self {
        let now = Utc::now();
        self.status = JobStatus::Processing;
        self.claimed_by = Some(worker_id.into());
        self.claimed_at = Some(now);
        self.visibility_deadline = Some(deadline);
        self.attempt_count += 1;
        self.error_message = None;
        self.updated_at = now;
        self
    }

    /// Mark the job completed.
    pub fn complete(mut self) -> Self {
        self.status = JobStatus::Completed;
        self.claimed_by = None;
        self.visibility_deadline = None;
        self.updated_at = Utc::now();
        self
    }

    /// Reset the job to pending for another delivery.
    pub fn reset(mut self, reason: impl Into<String>) -> Self {
        self.status = JobStatus::Pending;
        self.claimed_by = None;
        self.claimed_at = None;
        self.visibility_deadline = None;
        self.error_message = Some(reason.into());
        self.updated_at = Utc::now();
        self
    }

    /// Terminally fail the job.
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.status = JobStatus::Failed;
        self.claimed_by = None;
        self.visibility_deadline = None;
        self.error_message = Some(error.into());
        self.updated_at = Utc::now();
        self
    }

    /// Park the job for manual review.
    pub fn escalate(mut self, reason: impl Into<String>) -> Self {
        self.status = JobStatus::ManualReview;
        self.claimed_by = None;
        self.visibility_deadline = None;
        self.error_message = Some(reason.into());
        self.updated_at = Utc::now();
        self
    }

    /// True once the visibility deadline has lapsed while processing.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Processing
            && self
                .visibility_deadline
                .map(|deadline| deadline < now)
                .unwrap_or(false)
    }

    /// Check the claimant invariant.
    pub fn claimant_invariant_holds(&self) -> bool {
        if self.status == JobStatus::Processing {
            self.claimed_by.is_some() && self.visibility_deadline.is_some()
        } else {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn job_lifecycle_claim_complete() {
        let job = Job::new(CourseId::new(), PipelineStep::Transcribe);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempt_count, 0);

        let deadline = Utc::now() + Duration::minutes(30);
        let claimed = job.claim("worker-a", deadline);
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.claimed_by.as_deref(), Some("worker-a"));
        assert_eq!(claimed.attempt_count, 1);
        assert!(claimed.claimant_invariant_holds());

        let done = claimed.complete();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.claimed_by.is_none());
        assert!(done.visibility_deadline.is_none());
        assert!(done.claimant_invariant_holds());
    }

    #[test]
    fn job_reset_keeps_attempt_count() {
        let deadline = Utc::now() + Duration::minutes(30);
        let job = Job::new(CourseId::new(), PipelineStep::ExtractFrames)
            .claim("worker-a", deadline)
            .reset("visibility timeout expired");

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempt_count, 1);
        assert!(job.claimed_by.is_none());
        assert_eq!(
            job.error_message.as_deref(),
            Some("visibility timeout expired")
        );
    }

    #[test]
    fn reclaim_clears_stale_error() {
        let deadline = Utc::now() + Duration::minutes(30);
        let job = Job::new(CourseId::new(), PipelineStep::Transcribe)
            .claim("worker-a", deadline)
            .reset("visibility timeout expired")
            .claim("worker-b", deadline);

        assert!(job.error_message.is_none());
        assert_eq!(job.attempt_count, 2);
        assert_eq!(job.claimed_by.as_deref(), Some("worker-b"));
    }

    #[test]
    fn job_expiry_requires_processing_state() {
        let past = Utc::now() - Duration::minutes(5);
        let mut job = Job::new(CourseId::new(), PipelineStep::Analyze).claim("worker-a", past);
        assert!(job.is_expired(Utc::now()));

        job = job.complete();
        assert!(!job.is_expired(Utc::now()));
    }

    #[test]
    fn step_successors() {
        assert_eq!(PipelineStep::Transcribe.next(), None);
        assert_eq!(PipelineStep::ExtractFrames.next(), None);
        assert_eq!(
            PipelineStep::Analyze.next(),
            Some(PipelineStep::GenerateArtifact)
        );
        assert_eq!(PipelineStep::GenerateArtifact.next(), None);
        assert!(PipelineStep::Transcribe.is_async());
        assert!(!PipelineStep::ExtractFrames.is_async());
    }

    #[test]
    fn step_and_status_string_roundtrip() {
        for step in [
            PipelineStep::Transcribe,
            PipelineStep::ExtractFrames,
            PipelineStep::Analyze,
            PipelineStep::GenerateArtifact,
        ] {
            assert_eq!(step.as_str().parse::<PipelineStep>().unwrap(), step);
        }
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::ManualReview,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
    }
}
