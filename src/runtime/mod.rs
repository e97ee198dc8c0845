// src/runtime/mod.rs
//! Engine execution runtime
//!
//! This module provides the execution environment for engine runs:
//!
//! - **Context**: the `ExecutionContext` / `Transport` seam and readiness
//! - **Pool**: lazily filled FIFO pool of reusable contexts
//! - **Subprocess**: engine executable per invocation in a temp directory
//! - **Sandbox**: in-process engine modules over an in-memory filesystem
//! - **Worker**: the worker thread hosting one sandboxed module
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   ContextPool (size 2)                  │
//! │  ┌──────────┐  ┌──────────┐                             │
//! │  │ Context  │  │ Context  │   idle, oldest first        │
//! │  └──────────┘  └──────────┘                             │
//! │        ▲             ▲                                  │
//! │        └──────┬──────┘                                  │
//! │           Transport                                     │
//! │      ┌────────┴─────────┐                               │
//! │      │                  │                               │
//! │  Subprocess         Sandbox                             │
//! │  (child process)    (worker thread + engine module)     │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod context;
pub mod pool;
pub mod sandbox;
pub mod subprocess;
pub mod worker;

pub use context::{ContextId, ExecutionContext, ReadyState, Readiness, Transport};
pub use pool::{ContextPool, Lease, PoolStats};
pub use sandbox::{EngineModule, ModuleEnv, ModuleLoader, SandboxTransport, SANDBOX_ROOT};
pub use subprocess::{SubprocessContext, SubprocessTransport};
pub use worker::WorkerContext;
