//! Frame extraction interface shapes.

use serde::{Deserialize, Serialize};

/// A fixed-duration time slice of a video, processed independently by one
/// pool worker. Derived per run, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position in the chunk sequence (0-based)
    pub index: usize,
    /// Offset into the source in seconds
    pub start_time: f64,
    /// Chunk length in seconds (final chunk may be shorter)
    pub duration: f64,
}

/// One decoded frame, owned by a pool worker until its batch is flushed.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Chunk the frame came from
    pub chunk_index: usize,
    /// Position within the chunk
    pub frame_index: u32,
    /// Timestamp in the source video, seconds
    pub timestamp: f64,
    /// Encoded image bytes
    pub image_bytes: Vec<u8>,
}

/// Inputs for one extraction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRequest {
    /// Source video location
    pub video_ref: String,
    /// Requested pool size (capped by hardware concurrency)
    pub worker_count: usize,
    /// Chunk length in seconds
    pub chunk_duration_seconds: f64,
    /// Frame sampling rate
    pub target_fps: f64,
}

/// Outcome of one extraction run. Partial failures never abort the run;
/// the caller decides whether the result is usable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionReport {
    /// Uploaded frame URLs, ordered by chunk index then frame index
    pub frame_urls: Vec<String>,
    /// Probed source duration
    pub duration_seconds: f64,
    /// Wall-clock time the run took
    pub processing_time_seconds: f64,
    /// Chunks that failed to decode or upload
    pub partial_failures: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_serializes_with_snake_case_fields() {
        let report = ExtractionReport {
            frame_urls: vec!["https://cdn.example/f0.jpg".to_string()],
            duration_seconds: 360.0,
            processing_time_seconds: 12.5,
            partial_failures: 1,
        };

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"frame_urls\""));
        assert!(json.contains("\"partial_failures\":1"));
    }
}
