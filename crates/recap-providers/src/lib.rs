//! HTTP clients for the external providers the pipeline depends on:
//! async transcription (webhook delivery), synchronous analysis, and
//! operator escalation notifications.

pub mod analysis;
pub mod error;
pub mod ops;
pub mod transcription;

pub use analysis::{AnalysisClient, AnalysisConfig};
pub use error::{ProviderError, ProviderResult};
pub use ops::{NoopOpsNotifier, OpsNotifier, WebhookOpsNotifier};
pub use transcription::{TranscriptionClient, TranscriptionConfig};
