// src/runtime/context.rs
//! Execution context abstraction
//!
//! A context is one reusable engine unit: a worker thread hosting an
//! in-process engine module, or a launcher for engine subprocesses. The
//! pool only ever talks to contexts through these traits.

use crate::invocation::Invocation;
use crate::protocol::event::Event;
use crate::utils::errors::{ClientError, Result};
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Pool-unique context identifier
pub type ContextId = u64;

/// Startup state of a context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyState {
    Starting,
    Ready,
    Failed(String),
}

/// Observer for a context's startup
#[derive(Debug, Clone)]
pub struct Readiness {
    state: watch::Receiver<ReadyState>,
}

impl Readiness {
    /// Sender/observer pair starting in `Starting`
    pub fn channel() -> (watch::Sender<ReadyState>, Self) {
        let (tx, rx) = watch::channel(ReadyState::Starting);
        (tx, Self { state: rx })
    }

    /// A context that needs no startup
    pub fn ready() -> Self {
        let (_, rx) = watch::channel(ReadyState::Ready);
        Self { state: rx }
    }

    pub fn current(&self) -> ReadyState {
        self.state.borrow().clone()
    }

    /// Wait until the context has finished starting
    pub async fn wait(mut self) -> Result<()> {
        if self.current() == ReadyState::Ready {
            return Ok(());
        }
        let state = self
            .state
            .wait_for(|state| *state != ReadyState::Starting)
            .await
            .map(|state| state.clone())
            .map_err(|_| ClientError::ContextSpawnFailed("context exited during startup".into()))?;

        match state {
            ReadyState::Ready => Ok(()),
            ReadyState::Failed(reason) => Err(ClientError::ContextSpawnFailed(reason)),
            ReadyState::Starting => Err(ClientError::ContextUnavailable("context still starting".into())),
        }
    }
}

/// One reusable engine unit
#[async_trait]
pub trait ExecutionContext: Send + Sync + 'static {
    fn id(&self) -> ContextId;

    fn readiness(&self) -> Readiness;

    /// Start one invocation.
    ///
    /// Events arrive on the returned channel in emission order and the
    /// channel always ends with exactly one `Event::Exit`. Once `cancel`
    /// fires the context stops the engine and may go silent.
    fn launch(&self, invocation: Invocation, cancel: CancellationToken) -> mpsc::UnboundedReceiver<Event>;

    /// Read files by absolute path as the engine sees them; missing files
    /// map to `None`
    async fn read_files(&self, paths: Vec<String>) -> Result<Vec<Option<String>>>;

    /// Stop the context; it must not be launched again
    fn terminate(&self);
}

/// Factory for execution contexts
pub trait Transport: Send + Sync + 'static {
    type Context: ExecutionContext;

    fn name(&self) -> &'static str;

    /// Create a context. Creation is cheap bookkeeping; expensive startup
    /// happens behind `ExecutionContext::readiness`.
    fn create_context(&self, id: ContextId) -> Result<Self::Context>;

    /// Whether the engine can read path-only files from the host filesystem
    fn supports_local_files(&self) -> bool;
}
