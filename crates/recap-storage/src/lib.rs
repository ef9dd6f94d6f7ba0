//! S3-compatible object storage for pipeline artifacts.
//!
//! Holds uploaded frames, final artifact documents, and nothing else. The
//! extraction pool talks to this crate through the worker's `FrameSink`
//! adapter so the pool itself stays storage-agnostic.

pub mod client;
pub mod error;

pub use client::{ObjectStoreClient, ObjectStoreConfig};
pub use error::{StorageError, StorageResult};
