// src/runtime/worker.rs
//! Worker-thread execution context
//!
//! Each worker owns one engine module and its filesystem. Requests arrive
//! over a crossbeam channel and are served strictly one at a time:
//!
//! ```text
//! WorkerContext ──Request──▶ [crossbeam] ──▶ worker thread
//!      ▲                                      │ load module, then loop:
//!      │                                      │   stage files under /minizinc
//!      └──────── Event (tokio mpsc) ◀─────────┤   call_main (sinks decode lines)
//!                                             │   collect outputs, wipe tree
//! ```
//!
//! Cancellation raises the interrupt flag and closes the request channel.
//! The module gets a chance to notice the flag; if it never does, the thread
//! is simply abandoned.

use crate::invocation::Invocation;
use crate::protocol::decoder::StreamDecoder;
use crate::protocol::event::{Event, ExitEvent};
use crate::protocol::sink::{OutputSink, OutputStream};
use crate::runtime::context::{ContextId, ExecutionContext, ReadyState, Readiness};
use crate::runtime::sandbox::{EngineModule, ModuleEnv, ModuleLoader, SANDBOX_ROOT};
use crate::utils::errors::{ClientError, Result};
use crate::vfs::path::join_root;
use crate::vfs::MemFs;
use async_trait::async_trait;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

enum Request {
    Run {
        invocation: Invocation,
        events: mpsc::UnboundedSender<Event>,
    },
    ReadFiles {
        paths: Vec<String>,
        reply: oneshot::Sender<Vec<Option<String>>>,
    },
}

/// Execution context backed by a dedicated worker thread
pub struct WorkerContext {
    id: ContextId,
    requests: Mutex<Option<Sender<Request>>>,
    interrupt: Arc<AtomicBool>,
    readiness: Readiness,
}

impl WorkerContext {
    /// Start the worker thread; the module loads in the background
    pub fn spawn(id: ContextId, loader: Arc<dyn ModuleLoader>) -> Result<Self> {
        let (tx, rx) = unbounded();
        let (ready_tx, readiness) = Readiness::channel();
        let interrupt = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&interrupt);
        std::thread::Builder::new()
            .name(format!("mzn-worker-{}", id))
            .spawn(move || worker_main(id, loader, rx, ready_tx, flag))
            .map_err(|e| ClientError::ContextSpawnFailed(format!("worker thread: {}", e)))?;

        Ok(Self {
            id,
            requests: Mutex::new(Some(tx)),
            interrupt,
            readiness,
        })
    }

    fn send(&self, request: Request) -> std::result::Result<(), Request> {
        match self.requests.lock().as_ref() {
            Some(tx) => tx.send(request).map_err(|e| e.into_inner()),
            None => Err(request),
        }
    }
}

#[async_trait]
impl ExecutionContext for WorkerContext {
    fn id(&self) -> ContextId {
        self.id
    }

    fn readiness(&self) -> Readiness {
        self.readiness.clone()
    }

    fn launch(&self, invocation: Invocation, cancel: CancellationToken) -> mpsc::UnboundedReceiver<Event> {
        let (events, rx) = mpsc::unbounded_channel();

        if cancel.is_cancelled() {
            let _ = events.send(Event::Exit(ExitEvent::cancelled()));
            return rx;
        }

        let request = Request::Run {
            invocation,
            events: events.clone(),
        };
        if self.send(request).is_err() {
            let _ = events.send(Event::Exit(ExitEvent::transport_failure("worker has terminated")));
        }
        rx
    }

    async fn read_files(&self, paths: Vec<String>) -> Result<Vec<Option<String>>> {
        let (reply, response) = oneshot::channel();
        self.send(Request::ReadFiles { paths, reply })
            .map_err(|_| ClientError::ContextUnavailable("worker has terminated".into()))?;
        response
            .await
            .map_err(|_| ClientError::ContextUnavailable("worker exited before replying".into()))
    }

    fn terminate(&self) {
        self.interrupt.store(true, Ordering::Relaxed);
        if self.requests.lock().take().is_some() {
            debug!("Terminated worker #{}", self.id);
        }
    }
}

impl Drop for WorkerContext {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn worker_main(
    id: ContextId,
    loader: Arc<dyn ModuleLoader>,
    requests: Receiver<Request>,
    ready: watch::Sender<ReadyState>,
    interrupt: Arc<AtomicBool>,
) {
    let mut fs = MemFs::new();
    let loaded = catch_unwind(AssertUnwindSafe(|| loader.load(&mut fs)));
    let mut module = match loaded {
        Ok(Ok(module)) => module,
        Ok(Err(e)) => return fail_startup(id, e.to_string(), ready, requests),
        Err(panic) => return fail_startup(id, panic_message(panic.as_ref()), ready, requests),
    };
    ready.send_replace(ReadyState::Ready);
    debug!("Worker #{} ready", id);

    for request in requests.iter() {
        match request {
            Request::Run { invocation, events } => {
                let exit = run_invocation(&mut fs, module.as_mut(), &interrupt, &invocation, &events);
                let _ = events.send(Event::Exit(exit));
            }
            Request::ReadFiles { paths, reply } => {
                let contents = paths.iter().map(|path| fs.read_to_string(path)).collect();
                let _ = reply.send(contents);
            }
        }
    }
    debug!("Worker #{} exiting", id);
}

/// Report the failed load and answer anything already queued
fn fail_startup(id: ContextId, reason: String, ready: watch::Sender<ReadyState>, requests: Receiver<Request>) {
    warn!("Worker #{} failed to load engine module: {}", id, reason);
    ready.send_replace(ReadyState::Failed(reason.clone()));
    for request in requests.iter() {
        if let Request::Run { events, .. } = request {
            let _ = events.send(Event::Exit(ExitEvent::transport_failure(reason.clone())));
        }
    }
}

fn run_invocation(
    fs: &mut MemFs,
    module: &mut dyn EngineModule,
    interrupt: &AtomicBool,
    invocation: &Invocation,
    events: &mpsc::UnboundedSender<Event>,
) -> ExitEvent {
    fs.mkdir_all(SANDBOX_ROOT);
    for (path, contents) in &invocation.files {
        fs.write(&join_root(SANDBOX_ROOT, path), contents.as_bytes());
    }

    let decoder = StreamDecoder::new(SANDBOX_ROOT, invocation.json_stream);
    let mut stdout = OutputSink::new(OutputStream::Stdout, decoder.clone(), events.clone());
    let mut stderr = OutputSink::new(OutputStream::Stderr, decoder, events.clone());
    let args = invocation.args(str::to_string);

    debug!(operation = invocation.operation.name(), ?args, "Calling engine module");
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let mut env = ModuleEnv::new(fs, &mut stdout, &mut stderr, interrupt);
        module.call_main(&mut env, &args)
    }));

    let mut exit = match outcome {
        Ok(code) => ExitEvent::with_code(code),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!("Engine module panicked: {}", message);
            ExitEvent::transport_failure(message)
        }
    };
    exit.stdout = stdout.finish();
    exit.stderr = stderr.finish();

    if !invocation.output_files.is_empty() {
        let outputs: BTreeMap<_, _> = invocation
            .output_files
            .iter()
            .map(|name| (name.clone(), fs.read_to_string(&join_root(SANDBOX_ROOT, name))))
            .collect();
        exit.output_files = Some(outputs);
    }

    fs.remove_tree(SANDBOX_ROOT);
    exit
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "engine module panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::Operation;
    use crate::protocol::event::EventKind;
    use crate::testing::ScriptedLoader;
    use crate::vfs::Model;

    async fn collect(mut rx: mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
        let mut events = vec![];
        while let Some(event) = rx.recv().await {
            let done = matches!(event, Event::Exit(_));
            events.push(event);
            if done {
                break;
            }
        }
        events
    }

    #[tokio::test]
    async fn test_check_reports_relative_locations() {
        let context = WorkerContext::spawn(0, Arc::new(ScriptedLoader::default())).unwrap();
        context.readiness().wait().await.unwrap();

        let mut model = Model::new();
        model.add_file("models/broken.mzn", "var 1..3: x;\nconstraint x > z;\n", true);
        let invocation = Invocation::for_model(&model, Operation::Check, None, false).unwrap();

        let events = collect(context.launch(invocation, CancellationToken::new())).await;
        let Event::Error(error) = &events[0] else { panic!("expected error, got {:?}", events[0]) };
        assert_eq!(error.location.as_ref().unwrap().filename, "models/broken.mzn");

        let Some(Event::Exit(exit)) = events.last() else { panic!("missing exit") };
        assert_eq!(exit.code, Some(1));
    }

    #[tokio::test]
    async fn test_staged_tree_is_wiped_between_runs() {
        let context = WorkerContext::spawn(0, Arc::new(ScriptedLoader::default())).unwrap();

        let mut model = Model::new();
        model.add_string("var 1..3: x;");
        let invocation = Invocation::for_model(&model, Operation::Check, None, false).unwrap();
        collect(context.launch(invocation, CancellationToken::new())).await;

        let files = context
            .read_files(vec!["/minizinc/_mzn_0.mzn".into(), "/stdlib/std/stdlib.mzn".into()])
            .await
            .unwrap();
        assert_eq!(files[0], None);
        assert!(files[1].is_some());
    }

    #[tokio::test]
    async fn test_non_streaming_output_is_captured() {
        let context = WorkerContext::spawn(0, Arc::new(ScriptedLoader::default())).unwrap();
        let events = collect(context.launch(Invocation::standalone(Operation::Version), CancellationToken::new())).await;

        assert_eq!(events.len(), 1);
        let Event::Exit(exit) = &events[0] else { panic!("expected exit") };
        assert_eq!(exit.code, Some(0));
        assert!(exit.stdout.as_deref().unwrap().starts_with("MiniZinc to FlatZinc converter"));
    }

    #[tokio::test]
    async fn test_panicking_module_exits_with_failure() {
        let context = WorkerContext::spawn(0, Arc::new(ScriptedLoader::default())).unwrap();

        let mut model = Model::new();
        model.add_string("% panic\nvar 1..3: x;");
        let invocation = Invocation::for_model(&model, Operation::Check, None, false).unwrap();
        let events = collect(context.launch(invocation, CancellationToken::new())).await;

        let Some(Event::Exit(exit)) = events.last() else { panic!("missing exit") };
        assert_eq!(exit.code, Some(-1));
        assert!(exit.error.as_deref().unwrap().contains("scripted panic"));

        // The worker survives and serves the next run
        let events = collect(context.launch(Invocation::standalone(Operation::Version), CancellationToken::new())).await;
        assert_eq!(events.last().unwrap().kind(), EventKind::Exit);
    }

    #[tokio::test]
    async fn test_failed_load() {
        let context = WorkerContext::spawn(0, Arc::new(ScriptedLoader::failing("missing data image"))).unwrap();
        assert!(context.readiness().wait().await.is_err());

        let events = collect(context.launch(Invocation::standalone(Operation::Version), CancellationToken::new())).await;
        let Event::Exit(exit) = &events[0] else { panic!("expected exit") };
        assert_eq!(exit.error.as_deref(), Some("missing data image"));
    }

    #[tokio::test]
    async fn test_launch_after_terminate() {
        let context = WorkerContext::spawn(0, Arc::new(ScriptedLoader::default())).unwrap();
        context.terminate();

        let events = collect(context.launch(Invocation::standalone(Operation::Version), CancellationToken::new())).await;
        let Event::Exit(exit) = &events[0] else { panic!("expected exit") };
        assert_eq!(exit.code, Some(-1));
        assert!(context.read_files(vec![]).await.is_err());
    }
}
