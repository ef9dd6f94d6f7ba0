//! Course (parent entity) models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a course (one source video).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CourseId(pub String);

impl CourseId {
    /// Generate a new random course ID.
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

impl Default for CourseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CourseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CourseId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CourseId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Course pipeline status, mirroring the furthest-completed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CourseStatus {
    /// Ingested, waiting for the first steps to run
    #[default]
    Queued,
    /// Transcription and/or frame extraction in flight
    Processing,
    /// Analysis step running
    Analyzing,
    /// Artifact assembly running
    GeneratingArtifact,
    /// Pipeline finished
    Completed,
    /// Pipeline terminally failed
    Failed,
    /// A job exhausted its retries and awaits a human
    ManualReview,
}

impl CourseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CourseStatus::Queued => "queued",
            CourseStatus::Processing => "processing",
            CourseStatus::Analyzing => "analyzing",
            CourseStatus::GeneratingArtifact => "generating_artifact",
            CourseStatus::Completed => "completed",
            CourseStatus::Failed => "failed",
            CourseStatus::ManualReview => "manual_review",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CourseStatus::Completed | CourseStatus::Failed | CourseStatus::ManualReview
        )
    }
}

impl fmt::Display for CourseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cumulative pipeline state for one course.
///
/// Owned by the Step Executor: the queue never mutates a course except
/// through executor (or webhook continuation) update calls. Steps for a
/// given course are sequential, so last-write-wins updates are acceptable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    /// Unique course ID
    pub id: CourseId,

    /// Display title
    pub title: String,

    /// Source video location (URL or path readable by FFmpeg)
    pub source_url: String,

    /// Pipeline status
    #[serde(default)]
    pub status: CourseStatus,

    /// Progress percentage (0-100), monotonic
    #[serde(default)]
    pub progress: u8,

    /// Human-readable label for the current step
    #[serde(default)]
    pub progress_step: String,

    /// Source duration in seconds, once probed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,

    /// Uploaded frame URLs in chronological order
    #[serde(default)]
    pub frame_urls: Vec<String>,

    /// Chunks that failed during the last extraction run
    #[serde(default)]
    pub extraction_partial_failures: u32,

    /// Transcript text, once the provider delivers it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,

    /// True when the pipeline continued without a transcript
    #[serde(default)]
    pub transcript_degraded: bool,

    /// Why the transcript was dropped, when degraded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degradation_reason: Option<String>,

    /// Derived analysis payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<serde_json::Value>,

    /// Final artifact location
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Course {
    /// Create a new queued course.
    pub fn new(title: impl Into<String>, source_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: CourseId::new(),
            title: title.into(),
            source_url: source_url.into(),
            status: CourseStatus::Queued,
            progress: 0,
            progress_step: "queued".to_string(),
            duration_seconds: None,
            frame_urls: Vec::new(),
            extraction_partial_failures: 0,
            transcript: None,
            transcript_degraded: false,
            degradation_reason: None,
            analysis: None,
            artifact_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Advance progress (monotonic) and relabel the current step.
    pub fn advance(&mut self, progress: u8, step_label: impl Into<String>) {
        self.progress = self.progress.max(progress.min(100));
        self.progress_step = step_label.into();
        self.updated_at = Utc::now();
    }

    /// Record that the transcript input was dropped.
    pub fn degrade_transcript(&mut self, reason: impl Into<String>) {
        self.transcript_degraded = true;
        self.degradation_reason = Some(reason.into());
        self.updated_at = Utc::now();
    }

    /// True once the transcript prerequisite is settled: either delivered
    /// or explicitly degraded.
    pub fn transcript_settled(&self) -> bool {
        self.transcript.is_some() || self.transcript_degraded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_monotonic() {
        let mut course = Course::new("Intro to Redis", "https://example.com/v.mp4");
        course.advance(40, "extracting frames");
        course.advance(25, "transcribing");
        assert_eq!(course.progress, 40);
        assert_eq!(course.progress_step, "transcribing");
    }

    #[test]
    fn transcript_settles_on_delivery_or_degradation() {
        let mut course = Course::new("t", "s");
        assert!(!course.transcript_settled());

        course.transcript = Some("hello".to_string());
        assert!(course.transcript_settled());

        let mut degraded = Course::new("t", "s");
        degraded.degrade_transcript("provider error");
        assert!(degraded.transcript_settled());
        assert_eq!(
            degraded.degradation_reason.as_deref(),
            Some("provider error")
        );
    }
}
