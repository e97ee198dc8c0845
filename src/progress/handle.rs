// src/progress/handle.rs
//! Cancellable, listenable, awaitable view of one engine run
//!
//! ```text
//! RUNNING ──engine exit──▶ EXITED
//!    │                        ▲
//!    └──────cancel()──────────┘   (exit with code = None)
//! ```
//!
//! Events are folded into a `RunSummary` and fanned out to subscribers.
//! Each dispatch works on a snapshot of the subscriber list, so callbacks
//! may call `on`/`off` freely. The first `exit` wins; anything after it is
//! dropped.
//!
//! Callbacks run under a reentrant delivery lock, so deliveries from
//! different threads never interleave: a `cancel` racing the pump waits for
//! the callbacks already in flight, and `then` callbacks keep their
//! registration order.

use crate::progress::summary::{RunSummary, SolveResult};
use crate::protocol::event::{Diagnostic, Event, EventKind, ExitEvent, SolutionEvent, SolveStatus};
use crate::utils::errors::{ClientError, Result, RunFailure};
use futures::future::BoxFuture;
use parking_lot::{Mutex, ReentrantMutex};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::future::IntoFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Outcome of a run: resolved value or the failure it was rejected with
pub type Outcome<T> = std::result::Result<T, RunFailure>;

type Subscriber = Arc<dyn Fn(&Event) + Send + Sync>;
type Resolver<T> = Box<dyn Fn(&RunSummary, &ExitEvent) -> T + Send + Sync>;
type Continuation<T> = Box<dyn FnOnce(&Outcome<T>) + Send>;

/// Token returned by `ProgressHandle::on`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Terminal state of a run
#[derive(Debug)]
pub struct Completion<T> {
    pub exit: ExitEvent,
    pub outcome: Outcome<T>,
}

struct Inner<T> {
    running: bool,
    summary: RunSummary,
    subscribers: BTreeMap<EventKind, Vec<(SubscriptionId, Subscriber)>>,
    continuations: Vec<Continuation<T>>,
    completion: Option<Arc<Completion<T>>>,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    /// Held while callbacks run; never taken while `inner` is held
    delivery: ReentrantMutex<()>,
    resolved: watch::Sender<Option<Arc<Completion<T>>>>,
    cancel: CancellationToken,
    resolver: Resolver<T>,
    next_id: AtomicU64,
}

/// Handle to a running compile or solve
pub struct ProgressHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ProgressHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + Sync + 'static> ProgressHandle<T> {
    /// `resolver` builds the success value from the summary once the engine
    /// exits with code 0; `cancel` stops the underlying run
    pub fn new(
        cancel: CancellationToken,
        resolver: impl Fn(&RunSummary, &ExitEvent) -> T + Send + Sync + 'static,
    ) -> Self {
        let (resolved, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    running: true,
                    summary: RunSummary::default(),
                    subscribers: BTreeMap::new(),
                    continuations: vec![],
                    completion: None,
                }),
                delivery: ReentrantMutex::new(()),
                resolved,
                cancel,
                resolver: Box::new(resolver),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to one event kind. Has no effect once the run has exited.
    pub fn on(&self, kind: EventKind, callback: impl Fn(&Event) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let mut inner = self.shared.inner.lock();
        if inner.running {
            inner
                .subscribers
                .entry(kind)
                .or_default()
                .push((id, Arc::new(callback)));
        }
        id
    }

    /// Remove a subscription; unknown ids are ignored
    pub fn off(&self, id: SubscriptionId) {
        let mut inner = self.shared.inner.lock();
        for list in inner.subscribers.values_mut() {
            list.retain(|(existing, _)| *existing != id);
        }
    }

    /// Feed one event from the run
    pub fn dispatch(&self, event: Event) {
        let _delivery = self.shared.delivery.lock();
        let kind = event.kind();
        let (subscribers, finished) = {
            let mut inner = self.shared.inner.lock();
            if !inner.running {
                return;
            }
            inner.summary.apply(&event);

            let subscribers: Vec<Subscriber> = inner
                .subscribers
                .get(&kind)
                .map(|list| list.iter().map(|(_, callback)| Arc::clone(callback)).collect())
                .unwrap_or_default();

            let finished = match &event {
                Event::Exit(exit) => {
                    inner.running = false;
                    let outcome = if exit.is_success() {
                        Ok((self.shared.resolver)(&inner.summary, exit))
                    } else {
                        Err(RunFailure {
                            exit: exit.clone(),
                            error: inner.summary.first_error().cloned(),
                        })
                    };
                    let completion = Arc::new(Completion {
                        exit: exit.clone(),
                        outcome,
                    });
                    inner.completion = Some(Arc::clone(&completion));
                    inner.subscribers.clear();
                    Some((completion, std::mem::take(&mut inner.continuations)))
                }
                _ => None,
            };
            (subscribers, finished)
        };

        for callback in &subscribers {
            callback(&event);
        }

        if let Some((completion, continuations)) = finished {
            debug!(code = ?completion.exit.code, "Run finished");
            self.shared.resolved.send_replace(Some(Arc::clone(&completion)));
            for continuation in continuations {
                continuation(&completion.outcome);
            }
        }
    }

    /// Stop the run. The handle reports `exit` with no code right away;
    /// calling this after the run has exited does nothing.
    pub fn cancel(&self) {
        if !self.is_running() {
            return;
        }
        self.shared.cancel.cancel();
        self.dispatch(Event::Exit(ExitEvent::cancelled()));
    }

    pub fn is_running(&self) -> bool {
        self.shared.inner.lock().running
    }

    /// Run `callback` with the outcome once the run has exited (immediately
    /// if it already has). Callbacks fire in registration order.
    pub fn then(&self, callback: impl FnOnce(&Outcome<T>) + Send + 'static) {
        let _delivery = self.shared.delivery.lock();
        let completion = {
            let mut inner = self.shared.inner.lock();
            match &inner.completion {
                Some(completion) => Arc::clone(completion),
                None => {
                    inner.continuations.push(Box::new(callback));
                    return;
                }
            }
        };
        callback(&completion.outcome);
    }

    async fn completion(&self) -> Result<Arc<Completion<T>>> {
        let mut resolved = self.shared.resolved.subscribe();
        let completion = resolved
            .wait_for(Option::is_some)
            .await
            .map(|completion| completion.clone())
            .map_err(|_| ClientError::ContextUnavailable("run abandoned".into()))?;
        completion.ok_or_else(|| ClientError::ContextUnavailable("run abandoned".into()))
    }

    /// The terminal exit event, whatever the outcome
    pub async fn exit(&self) -> Result<ExitEvent> {
        Ok(self.completion().await?.exit.clone())
    }

    pub fn status(&self) -> SolveStatus {
        self.shared.inner.lock().summary.status
    }

    /// Most recent solution
    pub fn solution(&self) -> Option<SolutionEvent> {
        self.shared.inner.lock().summary.solution.clone()
    }

    pub fn statistics(&self) -> Map<String, Value> {
        self.shared.inner.lock().summary.statistics.clone()
    }

    /// Every error event seen so far
    pub fn errors(&self) -> Vec<Diagnostic> {
        self.shared.inner.lock().summary.errors.clone()
    }
}

impl<T: Clone + Send + Sync + 'static> ProgressHandle<T> {
    /// Wait for the run to finish. May be called any number of times.
    pub async fn wait(&self) -> Result<T> {
        let completion = self.completion().await?;
        completion.outcome.clone().map_err(ClientError::from)
    }
}

impl ProgressHandle<SolveResult> {
    /// Handle resolving to the solve summary
    pub fn for_solve(cancel: CancellationToken) -> Self {
        Self::new(cancel, |summary, _| summary.to_result())
    }
}

impl ProgressHandle<Option<String>> {
    /// Handle resolving to the contents of the compiled output file
    pub fn for_compile(cancel: CancellationToken, output: String) -> Self {
        Self::new(cancel, move |_, exit| exit.output_file(&output).map(str::to_string))
    }
}

impl<T: Clone + Send + Sync + 'static> IntoFuture for ProgressHandle<T> {
    type Output = Result<T>;
    type IntoFuture = BoxFuture<'static, Result<T>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}
