//! Ingest API and webhook continuation endpoint.
//!
//! The API does two things: accept courses (persisting the record and
//! enqueueing the sibling first steps) and receive transcription provider
//! callbacks that settle async jobs and continue the pipeline.

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod webhook;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
