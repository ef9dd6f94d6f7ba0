//! Redis-backed durable job store.
//!
//! This crate provides:
//! - The job table (`recap:job:{id}` hashes plus pending/processing indexes)
//! - Atomic claiming with visibility timeouts
//! - Complete/fail RPCs with retry-ceiling escalation
//! - Stalled/expired job recovery sweeps
//! - Idempotent next-step continuation helpers

pub mod claim;
pub mod config;
pub mod courses;
pub mod error;
pub mod pipeline;
pub mod recovery;
pub mod store;

pub use config::QueueConfig;
pub use courses::CourseStore;
pub use error::{QueueError, QueueResult};
pub use recovery::{recovery_action, RecoveryAction, RecoverySummary};
pub use store::{FailOutcome, JobStore};
