// src/lib.rs
//! MiniZinc client library
//!
//! Runs the MiniZinc engine from Rust, either as a child process or as an
//! in-process module on worker threads, and turns its newline-delimited JSON
//! output into typed, streaming events.
//!
//! # Architecture
//!
//! The library is structured into several modules:
//!
//! - **vfs**: the `Model` file set, path normalisation, in-memory filesystem
//! - **invocation**: operations, argument ordering, parameter files
//! - **runtime**: execution contexts, transports and the context pool
//! - **protocol**: line framing, event decoding, output sinks
//! - **progress**: cancellable, listenable, awaitable run handles
//! - **client**: the orchestrator tying the above together
//! - **observability**: tracing setup
//! - **utils**: configuration and error types
//!
//! ```text
//! Model ─▶ Invocation ─▶ ContextPool ─▶ Transport ─▶ engine
//!                                                      │ stdout / stderr
//!          ProgressHandle ◀── Event ◀── StreamDecoder ◀┘
//! ```

pub mod client;
pub mod invocation;
pub mod observability;
pub mod progress;
pub mod protocol;
pub mod runtime;
pub mod utils;
pub mod vfs;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use client::{Client, SolveConfig};
pub use invocation::SolverOptions;
pub use progress::{ProgressHandle, SolveResult, SubscriptionId};
pub use protocol::{Event, EventKind, ExitEvent, SolveStatus};
pub use runtime::{SandboxTransport, SubprocessTransport};
pub use utils::config::ClientConfig;
pub use utils::errors::{ClientError, Result, RunFailure};
pub use vfs::Model;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
