//! Pipeline worker: claims jobs from the durable queue, executes pipeline
//! steps, and recovers abandoned work.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod frame_sink;
pub mod recovery;
pub mod steps;

pub use config::WorkerConfig;
pub use dispatcher::Dispatcher;
pub use error::{WorkerError, WorkerResult};
pub use executor::{ProcessingContext, StepOutcome};
pub use frame_sink::ObjectStoreFrameSink;
pub use recovery::spawn_recovery_sweeps;
