//! Inbound webhook payloads from the transcription provider.

use serde::{Deserialize, Serialize};

/// Terminal outcome reported by the transcription provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionEventStatus {
    /// Transcript is ready in `result_payload`
    Completed,
    /// Provider gave up; details in `error`
    Error,
}

/// Completion/failure event delivered out-of-band by the transcription
/// provider. Correlated back to the originating job via the continuation
/// token carried in the callback URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionEvent {
    /// Provider-side job reference
    pub job_reference_id: String,

    /// Terminal status
    pub status: TranscriptionEventStatus,

    /// Transcript text on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_payload: Option<String>,

    /// Provider error on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TranscriptionEvent {
    pub fn is_success(&self) -> bool {
        self.status == TranscriptionEventStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_event_deserializes() {
        let json = r#"{
            "job_reference_id": "prov-123",
            "status": "completed",
            "result_payload": "00:00 welcome to the course"
        }"#;

        let event: TranscriptionEvent = serde_json::from_str(json).unwrap();
        assert!(event.is_success());
        assert_eq!(event.job_reference_id, "prov-123");
        assert!(event.result_payload.as_deref().unwrap().contains("welcome"));
        assert!(event.error.is_none());
    }

    #[test]
    fn error_event_deserializes_without_payload() {
        let json = r#"{"job_reference_id": "prov-9", "status": "error", "error": "audio too noisy"}"#;

        let event: TranscriptionEvent = serde_json::from_str(json).unwrap();
        assert!(!event.is_success());
        assert_eq!(event.error.as_deref(), Some("audio too noisy"));
        assert!(event.result_payload.is_none());
    }
}
