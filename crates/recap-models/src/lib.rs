//! Shared data models for the Recapio pipeline.
//!
//! Leaf crate: every other crate in the workspace depends on these types.

pub mod course;
pub mod extraction;
pub mod job;
pub mod webhook;

pub use course::{Course, CourseId, CourseStatus};
pub use extraction::{Chunk, ExtractionReport, ExtractionRequest, Frame};
pub use job::{Job, JobId, JobStatus, PipelineStep};
pub use webhook::{TranscriptionEvent, TranscriptionEventStatus};
