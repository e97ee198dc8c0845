// src/invocation/mod.rs
//! Invocation building
//!
//! - **Operation**: what the engine is asked to do and the flags for it
//! - **Builder**: model snapshot, aux parameter file, argument ordering and
//!   path validation

pub mod builder;
pub mod operation;

pub use builder::{Invocation, RunEntry};
pub use operation::{Operation, SolverOptions, JSON_STREAM_FLAG};
