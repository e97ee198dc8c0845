// src/runtime/pool.rs
//! Execution context pool
//!
//! Contexts are created lazily up to the configured size and handed out one
//! per invocation, oldest first.
//!
//! # Architecture
//!
//! ```text
//! ContextPool
//! ├─ Idle: [Ctx3, Ctx4]      (FIFO, filled to `size` on every acquire)
//! ├─ Leased: Ctx1, Ctx2      (owned by in-flight runs)
//! └─ Root token              (parent of every lease's cancel token)
//! ```
//!
//! A leased context comes back through `release` (reused until it has served
//! `retire_after` runs) or `discard` (terminated). Exclusive leases
//! (compile, solve) are always discarded and backfilled at acquire time.
//! `shutdown_all` terminates the idle contexts, cancels every lease and
//! bumps the generation so leases from before the shutdown are discarded
//! when they come back.

use crate::runtime::context::{ContextId, ExecutionContext, ReadyState, Transport};
use crate::utils::config::PoolSettings;
use crate::utils::errors::{ClientError, Result};
use futures::future::select_ok;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A context sitting in the pool
struct PooledContext<C> {
    context: C,
    runs: u32,
}

/// A context checked out for one invocation
pub struct Lease<C> {
    pub context: C,

    /// Cancelled by the run's handle or by `shutdown_all`
    pub cancel: CancellationToken,

    runs: u32,
    generation: u64,
    exclusive: bool,
}

impl<C: ExecutionContext> Lease<C> {
    pub fn id(&self) -> ContextId {
        self.context.id()
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }
}

struct PoolState<C> {
    idle: VecDeque<PooledContext<C>>,
    generation: u64,
    root: CancellationToken,
}

/// Pool of reusable execution contexts
pub struct ContextPool<T: Transport> {
    transport: T,
    settings: PoolSettings,
    state: Mutex<PoolState<T::Context>>,
    next_id: AtomicU64,
}

impl<T: Transport> ContextPool<T> {
    pub fn new(transport: T, settings: PoolSettings) -> Self {
        info!(
            "Creating {} context pool (size {}, retire after {} runs)",
            transport.name(),
            settings.size,
            settings.retire_after
        );
        Self {
            transport,
            settings,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                generation: 0,
                root: CancellationToken::new(),
            }),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    fn create(&self) -> Result<PooledContext<T::Context>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("Creating context #{}", id);
        let context = self.transport.create_context(id)?;
        Ok(PooledContext { context, runs: 0 })
    }

    /// Top the idle queue up to the pool size. Fails only if the queue is
    /// still empty afterwards.
    fn fill(&self, state: &mut PoolState<T::Context>) -> Result<()> {
        while state.idle.len() < self.settings.size {
            match self.create() {
                Ok(pooled) => state.idle.push_back(pooled),
                Err(e) => {
                    warn!("Failed to create context: {}", e);
                    if state.idle.is_empty() {
                        return Err(e);
                    }
                    break;
                }
            }
        }
        if state.idle.is_empty() {
            return Err(ClientError::ContextUnavailable("pool size is zero".into()));
        }
        Ok(())
    }

    /// Terminate idle contexts whose startup has failed
    fn evict_failed(&self, state: &mut PoolState<T::Context>) {
        state.idle.retain(|pooled| match pooled.context.readiness().current() {
            ReadyState::Failed(reason) => {
                warn!("Evicting context #{}: {}", pooled.context.id(), reason);
                pooled.context.terminate();
                false
            }
            _ => true,
        });
    }

    /// Fill the pool and wait for the first context to become ready.
    ///
    /// If no context comes up, the pool is emptied again so a later `init`
    /// or `acquire` starts from scratch.
    pub async fn init(&self) -> Result<()> {
        let (pending, generation) = {
            let mut state = self.state.lock();
            if !state.idle.is_empty() {
                return Err(ClientError::AlreadyInitialized);
            }
            self.fill(&mut state)?;
            let pending = state
                .idle
                .iter()
                .map(|pooled| Box::pin(pooled.context.readiness().wait()))
                .collect::<Vec<_>>();
            (pending, state.generation)
        };

        if let Err(e) = select_ok(pending).await {
            let failed = {
                let mut state = self.state.lock();
                if state.generation == generation {
                    std::mem::take(&mut state.idle)
                } else {
                    VecDeque::new()
                }
            };
            warn!("Context pool failed to start ({} contexts dropped): {}", failed.len(), e);
            for pooled in failed {
                pooled.context.terminate();
            }
            return Err(e);
        }
        info!("Context pool ready");
        Ok(())
    }

    /// Check out the oldest idle context. Exclusive leases are backfilled
    /// with a fresh context immediately.
    pub fn acquire(&self, exclusive: bool) -> Result<Lease<T::Context>> {
        let mut state = self.state.lock();
        self.evict_failed(&mut state);
        self.fill(&mut state)?;

        let pooled = state
            .idle
            .pop_front()
            .ok_or_else(|| ClientError::ContextUnavailable("no idle context".into()))?;

        if exclusive {
            match self.create() {
                Ok(fresh) => state.idle.push_back(fresh),
                Err(e) => warn!("Failed to backfill context: {}", e),
            }
        }

        debug!(
            "Acquired context #{} (runs: {}, exclusive: {})",
            pooled.context.id(),
            pooled.runs,
            exclusive
        );
        Ok(Lease {
            context: pooled.context,
            cancel: state.root.child_token(),
            runs: pooled.runs,
            generation: state.generation,
            exclusive,
        })
    }

    /// Return a context after a clean run, or retire it at the threshold
    pub fn release(&self, lease: Lease<T::Context>) {
        let runs = lease.runs + 1;
        let mut state = self.state.lock();

        if lease.exclusive || lease.generation != state.generation || lease.cancel.is_cancelled() {
            drop(state);
            self.discard(lease);
            return;
        }

        if runs >= self.settings.retire_after {
            debug!("Retiring context #{} after {} runs", lease.id(), runs);
            lease.context.terminate();
            match self.create() {
                Ok(fresh) => state.idle.push_back(fresh),
                Err(e) => warn!("Failed to replace retired context: {}", e),
            }
            return;
        }

        debug!("Releasing context #{} back to pool", lease.id());
        state.idle.push_back(PooledContext {
            context: lease.context,
            runs,
        });
    }

    /// Terminate a context that must not be reused
    pub fn discard(&self, lease: Lease<T::Context>) {
        debug!("Terminating context #{}", lease.id());
        lease.context.terminate();
    }

    /// Terminate every idle context and cancel every in-flight run
    pub fn shutdown_all(&self) {
        let idle = {
            let mut state = self.state.lock();
            state.root.cancel();
            state.root = CancellationToken::new();
            state.generation += 1;
            std::mem::take(&mut state.idle)
        };

        info!("Shutting down context pool ({} idle contexts)", idle.len());
        for pooled in idle {
            pooled.context.terminate();
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            size: self.settings.size,
            idle: state.idle.len(),
            created: self.next_id.load(Ordering::Relaxed),
            generation: state.generation,
        }
    }
}

impl<T: Transport> Drop for ContextPool<T> {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub size: usize,
    pub idle: usize,
    pub created: u64,
    pub generation: u64,
}
