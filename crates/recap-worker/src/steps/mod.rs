//! Step handlers, one module per pipeline step.

pub mod analyze;
pub mod artifact;
pub mod extract;
pub mod transcribe;
