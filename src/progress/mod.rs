// src/progress/mod.rs
//! Progress reporting for long-running operations
//!
//! - **Handle**: subscriptions, cancellation and awaiting for one run
//! - **Summary**: status, latest solution, merged statistics and errors

pub mod handle;
pub mod summary;

pub use handle::{Completion, Outcome, ProgressHandle, SubscriptionId};
pub use summary::{RunSummary, SolveResult};
