// src/client.rs
//! Client orchestrator
//!
//! Owns the context pool and exposes every engine operation:
//!
//! ```text
//! Model ─▶ Invocation ─▶ pool.acquire ─▶ context.launch ─▶ events
//!                                                           │
//!              ProgressHandle ◀── pump task ◀───────────────┘
//!                                    │
//!                    release (reusable) / discard (exclusive, failed)
//! ```
//!
//! `check`, `interface` and the engine queries run to completion and return
//! plain values; `compile` and `solve` return a `ProgressHandle` straight
//! away and stream events into it from a background task.

use crate::invocation::{Invocation, Operation, SolverOptions};
use crate::progress::{ProgressHandle, SolveResult};
use crate::protocol::event::{Diagnostic, Event, ExitEvent, InterfaceEvent};
use crate::runtime::context::{ExecutionContext, Transport};
use crate::runtime::pool::{ContextPool, Lease};
use crate::runtime::subprocess::SubprocessTransport;
use crate::utils::config::{ClientConfig, PoolSettings};
use crate::utils::errors::{ClientError, Result, RunFailure};
use crate::vfs::path::{join_root, normalize_relative};
use crate::vfs::Model;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Options for `Client::solve`
#[derive(Debug, Clone)]
pub struct SolveConfig {
    /// Ask the engine for structured (`json`) solution output
    pub json_output: bool,

    /// Written to a parameter file ahead of the model files
    pub options: Option<SolverOptions>,
}

impl Default for SolveConfig {
    fn default() -> Self {
        Self {
            json_output: true,
            options: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfigDirs {
    #[serde(rename = "mznStdlibDir")]
    stdlib_dir: String,
}

/// Entry point for all engine operations
pub struct Client<T: Transport> {
    pool: Arc<ContextPool<T>>,
}

impl<T: Transport> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
        }
    }
}

impl Client<SubprocessTransport> {
    /// Subprocess client configured from `config`
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(SubprocessTransport::new(config.engine.clone()), config.pool.clone())
    }
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, settings: PoolSettings) -> Self {
        Self {
            pool: Arc::new(ContextPool::new(transport, settings)),
        }
    }

    pub fn pool(&self) -> &ContextPool<T> {
        &self.pool
    }

    /// Start the pool and wait until one context is ready. Fails with
    /// `AlreadyInitialized` once the pool holds contexts.
    pub async fn init(&self) -> Result<()> {
        self.pool.init().await
    }

    /// Terminate every context and cancel every in-flight run
    pub fn shutdown(&self) {
        self.pool.shutdown_all();
    }

    /// Engine version banner
    pub async fn version(&self) -> Result<String> {
        let (_, exit) = self.exchange(Invocation::standalone(Operation::Version)).await?;
        captured_stdout(exit)
    }

    /// Installed solver configurations
    pub async fn solvers(&self) -> Result<Vec<Value>> {
        let (_, exit) = self.exchange(Invocation::standalone(Operation::Solvers)).await?;
        Ok(serde_json::from_str(&captured_stdout(exit)?)?)
    }

    /// Read files relative to the engine's standard library directory.
    /// Files that do not exist map to `None`.
    pub async fn read_stdlib_file_contents<S: AsRef<str>>(
        &self,
        paths: &[S],
    ) -> Result<BTreeMap<String, Option<String>>> {
        let requested = paths
            .iter()
            .map(|path| {
                let path = path.as_ref();
                normalize_relative(path)
                    .map(|relative| (path.to_string(), relative))
                    .ok_or_else(|| ClientError::UnsupportedStdlibPath(path.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        let lease = self.pool.acquire(false)?;
        let result = read_stdlib(&lease, requested).await;
        self.finish(lease, result.is_ok());
        result
    }

    pub async fn read_stdlib_file(&self, path: &str) -> Result<Option<String>> {
        let mut contents = self.read_stdlib_file_contents(&[path]).await?;
        Ok(contents.remove(path).flatten())
    }

    /// Type-check `model`; returns the errors the engine reported
    pub async fn check(&self, model: &Model, options: Option<&SolverOptions>) -> Result<Vec<Diagnostic>> {
        let invocation = self.build(model, Operation::Check, options)?;
        let (events, exit) = self.exchange(invocation).await?;
        let errors = errors_of(&events);
        if exit.is_cancelled() || exit.error.is_some() {
            return Err(RunFailure {
                exit,
                error: errors.into_iter().next(),
            }
            .into());
        }
        Ok(errors)
    }

    /// Inputs, outputs and solve method of `model`
    pub async fn interface(&self, model: &Model, options: Option<&SolverOptions>) -> Result<InterfaceEvent> {
        let invocation = self.build(model, Operation::Interface, options)?;
        let (events, exit) = self.exchange(invocation).await?;
        let errors = errors_of(&events);
        if exit.is_cancelled() || exit.error.is_some() {
            return Err(RunFailure {
                exit,
                error: errors.into_iter().next(),
            }
            .into());
        }

        let interface = events.into_iter().find_map(|event| match event {
            Event::Interface(interface) => Some(interface),
            _ => None,
        });
        match interface {
            Some(interface) if exit.is_success() => Ok(interface),
            _ => Err(ClientError::Interface {
                code: exit.code,
                errors,
            }),
        }
    }

    /// Flatten `model`; the handle resolves to the FlatZinc text
    pub fn compile(&self, model: &Model, options: Option<&SolverOptions>) -> Result<ProgressHandle<Option<String>>> {
        let invocation = self.build(model, Operation::Compile, options)?;
        let output = invocation.compiled_output().unwrap_or_default().to_string();

        let lease = self.pool.acquire(true)?;
        let handle = ProgressHandle::for_compile(lease.cancel.clone(), output);
        self.spawn_pump(lease, invocation, handle.clone());
        Ok(handle)
    }

    /// Solve `model`, streaming intermediate solutions into the handle
    pub fn solve(&self, model: &Model, config: &SolveConfig) -> Result<ProgressHandle<SolveResult>> {
        self.solve_with(model, config, |_| {})
    }

    /// Like `solve`, but `subscribe` registers listeners before the engine
    /// starts, so no early event can be missed
    pub fn solve_with(
        &self,
        model: &Model,
        config: &SolveConfig,
        subscribe: impl FnOnce(&ProgressHandle<SolveResult>),
    ) -> Result<ProgressHandle<SolveResult>> {
        let operation = Operation::Solve {
            json_output: config.json_output,
        };
        let invocation = self.build(model, operation, config.options.as_ref())?;

        let lease = self.pool.acquire(true)?;
        let handle = ProgressHandle::for_solve(lease.cancel.clone());
        subscribe(&handle);
        self.spawn_pump(lease, invocation, handle.clone());
        Ok(handle)
    }

    fn build(&self, model: &Model, operation: Operation, options: Option<&SolverOptions>) -> Result<Invocation> {
        Invocation::for_model(model, operation, options, self.pool.transport().supports_local_files())
    }

    /// Hand a context back after a run, or drop it if the run went wrong
    fn finish(&self, lease: Lease<T::Context>, clean: bool) {
        if clean {
            self.pool.release(lease);
        } else {
            self.pool.discard(lease);
        }
    }

    /// Run a non-exclusive invocation to completion on a pooled context
    async fn exchange(&self, invocation: Invocation) -> Result<(Vec<Event>, ExitEvent)> {
        let lease = self.pool.acquire(invocation.operation.is_exclusive())?;
        let result = run_to_exit(&lease, invocation).await;
        let clean = matches!(&result, Ok((_, exit)) if !exit.is_cancelled() && exit.error.is_none());
        self.finish(lease, clean);
        result
    }

    fn spawn_pump<R: Send + Sync + 'static>(
        &self,
        lease: Lease<T::Context>,
        invocation: Invocation,
        handle: ProgressHandle<R>,
    ) {
        let pool = Arc::clone(&self.pool);
        tokio::spawn(async move {
            let clean = pump(&lease, invocation, &handle).await;
            if clean {
                pool.release(lease);
            } else {
                pool.discard(lease);
            }
        });
    }
}

/// Stream one run into `handle`; returns whether the context ended cleanly
async fn pump<C: ExecutionContext, R: Send + Sync + 'static>(
    lease: &Lease<C>,
    invocation: Invocation,
    handle: &ProgressHandle<R>,
) -> bool {
    debug!(context = lease.id(), operation = invocation.operation.name(), "Starting run");
    let cancel = lease.cancel.clone();

    let ready = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        ready = lease.context.readiness().wait() => Some(ready),
    };
    match ready {
        None => {
            handle.dispatch(Event::Exit(ExitEvent::cancelled()));
            return false;
        }
        Some(Err(e)) => {
            warn!("Context #{} unavailable: {}", lease.id(), e);
            handle.dispatch(Event::Exit(ExitEvent::transport_failure(e.to_string())));
            return false;
        }
        Some(Ok(())) => {}
    }

    let mut events = lease.context.launch(invocation, cancel.clone());
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => Event::Exit(ExitEvent::cancelled()),
            event = events.recv() => event.unwrap_or_else(|| {
                Event::Exit(ExitEvent::transport_failure("context closed without an exit"))
            }),
        };
        if let Event::Exit(exit) = &event {
            let clean = !exit.is_cancelled() && exit.error.is_none();
            handle.dispatch(event);
            return clean;
        }
        handle.dispatch(event);
    }
}

/// Collect every event of one run on `lease`
async fn run_to_exit<C: ExecutionContext>(lease: &Lease<C>, invocation: Invocation) -> Result<(Vec<Event>, ExitEvent)> {
    let cancel = lease.cancel.clone();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok((vec![], ExitEvent::cancelled())),
        ready = lease.context.readiness().wait() => ready?,
    }

    let mut receiver = lease.context.launch(invocation, cancel.clone());
    let mut events = vec![];
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok((events, ExitEvent::cancelled())),
            event = receiver.recv() => event,
        };
        match event {
            Some(Event::Exit(exit)) => return Ok((events, exit)),
            Some(event) => events.push(event),
            None => {
                return Ok((
                    events,
                    ExitEvent::transport_failure("context closed without an exit"),
                ))
            }
        }
    }
}

async fn read_stdlib<C: ExecutionContext>(
    lease: &Lease<C>,
    requested: Vec<(String, String)>,
) -> Result<BTreeMap<String, Option<String>>> {
    let (_, exit) = run_to_exit(lease, Invocation::standalone(Operation::ConfigDirs)).await?;
    let dirs: ConfigDirs = serde_json::from_str(&captured_stdout(exit)?)?;
    debug!("Standard library at {}", dirs.stdlib_dir);

    let absolute = requested
        .iter()
        .map(|(_, relative)| join_root(&dirs.stdlib_dir, relative))
        .collect();
    let contents = lease.context.read_files(absolute).await?;
    Ok(requested
        .into_iter()
        .map(|(path, _)| path)
        .zip(contents)
        .collect())
}

/// Whole stdout of a successful non-streaming run
fn captured_stdout(exit: ExitEvent) -> Result<String> {
    if exit.is_success() {
        Ok(exit.stdout.unwrap_or_default())
    } else {
        Err(RunFailure { exit, error: None }.into())
    }
}

fn errors_of(events: &[Event]) -> Vec<Diagnostic> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Error(error) => Some(error.clone()),
            _ => None,
        })
        .collect()
}
