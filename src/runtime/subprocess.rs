// src/runtime/subprocess.rs
//! Subprocess transport
//!
//! Every invocation stages its files in a fresh temporary directory and
//! passes them to the engine by absolute path. The engine inherits the
//! caller's working directory, so path-only files resolve as the caller
//! wrote them:
//!
//! ```text
//! launch ─▶ tempdir ─▶ write files ─▶ spawn engine (caller's cwd)
//!                                         │ stdout ─▶ LineCodec ─▶ decoder ─▶ events
//!                                         │ stderr ─▶ LineCodec ─▶ events
//!                                         ▼
//!                          wait ─▶ read output files ─▶ exit event
//!                                         ▼
//!                          remove tempdir (blocking pool, best effort)
//! ```
//!
//! Cancellation sends `SIGINT` and escalates to a kill after the configured
//! grace period.

use crate::invocation::Invocation;
use crate::protocol::codec::LineCodec;
use crate::protocol::decoder::StreamDecoder;
use crate::protocol::event::{Event, ExitEvent};
use crate::runtime::context::{ContextId, ExecutionContext, Readiness, Transport};
use crate::utils::config::EngineSettings;
use crate::utils::errors::{ClientError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Transport running the engine as a child process per invocation
#[derive(Clone)]
pub struct SubprocessTransport {
    settings: Arc<EngineSettings>,
    executable: Arc<Mutex<Option<PathBuf>>>,
}

impl SubprocessTransport {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            executable: Arc::new(Mutex::new(None)),
        }
    }

    /// Locate the engine executable, caching the first hit
    pub fn find_executable(&self) -> Result<PathBuf> {
        let mut cached = self.executable.lock();
        if let Some(path) = cached.as_ref() {
            return Ok(path.clone());
        }

        let path = resolve_executable(&self.settings.executable, &self.settings.search_paths)?;
        info!("Found engine at {:?}", path);
        *cached = Some(path.clone());
        Ok(path)
    }
}

fn resolve_executable(name: &str, search_paths: &[PathBuf]) -> Result<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return Ok(candidate.to_path_buf());
    }

    for dir in search_paths {
        let path = dir.join(name);
        if path.is_file() {
            return Ok(path);
        }
    }

    which::which(name).map_err(|e| {
        debug!("Engine '{}' not in PATH: {}", name, e);
        ClientError::EngineNotFound(name.to_string())
    })
}

impl Transport for SubprocessTransport {
    type Context = SubprocessContext;

    fn name(&self) -> &'static str {
        "subprocess"
    }

    fn create_context(&self, id: ContextId) -> Result<SubprocessContext> {
        let executable = self.find_executable()?;
        Ok(SubprocessContext {
            id,
            executable,
            settings: Arc::clone(&self.settings),
            terminated: AtomicBool::new(false),
        })
    }

    fn supports_local_files(&self) -> bool {
        true
    }
}

/// Launcher for engine child processes
pub struct SubprocessContext {
    id: ContextId,
    executable: PathBuf,
    settings: Arc<EngineSettings>,
    terminated: AtomicBool,
}

#[async_trait]
impl ExecutionContext for SubprocessContext {
    fn id(&self) -> ContextId {
        self.id
    }

    fn readiness(&self) -> Readiness {
        Readiness::ready()
    }

    fn launch(&self, invocation: Invocation, cancel: CancellationToken) -> mpsc::UnboundedReceiver<Event> {
        let (events, rx) = mpsc::unbounded_channel();
        if self.terminated.load(Ordering::Relaxed) {
            let _ = events.send(Event::Exit(ExitEvent::transport_failure("context has terminated")));
            return rx;
        }

        let run = EngineRun {
            executable: self.executable.clone(),
            settings: Arc::clone(&self.settings),
            invocation,
            cancel,
            events: events.clone(),
        };
        tokio::spawn(async move {
            let exit = run.execute().await.unwrap_or_else(|e| {
                warn!("Engine run failed: {}", e);
                ExitEvent::transport_failure(e.to_string())
            });
            let _ = events.send(Event::Exit(exit));
        });
        rx
    }

    async fn read_files(&self, paths: Vec<String>) -> Result<Vec<Option<String>>> {
        let mut contents = Vec::with_capacity(paths.len());
        for path in paths {
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => contents.push(Some(text)),
                Err(e) => {
                    debug!("Cannot read {}: {}", path, e);
                    contents.push(None);
                }
            }
        }
        Ok(contents)
    }

    fn terminate(&self) {
        self.terminated.store(true, Ordering::Relaxed);
    }
}

/// One engine child process from staging to exit
struct EngineRun {
    executable: PathBuf,
    settings: Arc<EngineSettings>,
    invocation: Invocation,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<Event>,
}

impl EngineRun {
    async fn execute(self) -> Result<ExitEvent> {
        let dir = tempfile::Builder::new().prefix("mzn-").tempdir()?;
        for (path, contents) in &self.invocation.files {
            let target = dir.path().join(path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, contents).await?;
        }

        if self.cancel.is_cancelled() {
            debug!("Run cancelled before spawn");
            remove_dir(dir);
            return Ok(ExitEvent::cancelled());
        }

        let root = dir.path().to_string_lossy().into_owned();
        let args = self
            .invocation
            .args(|path| dir.path().join(path).to_string_lossy().into_owned());

        debug!(executable = ?self.executable, ?args, "Spawning engine");
        let mut child = Command::new(&self.executable)
            .args(&self.settings.leading_args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ClientError::ContextSpawnFailed(format!("failed to spawn engine: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::ContextSpawnFailed("failed to capture stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ClientError::ContextSpawnFailed("failed to capture stderr".into()))?;

        let decoder = StreamDecoder::new(root, self.invocation.json_stream);
        let mut stdout = FramedRead::new(stdout, LineCodec::new());
        let mut stderr = FramedRead::new(stderr, LineCodec::new());
        let mut captured_stdout = String::new();
        let mut captured_stderr = String::new();
        let (mut stdout_open, mut stderr_open) = (true, true);

        while stdout_open || stderr_open {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    interrupt(&mut child, Duration::from_millis(self.settings.interrupt_grace_ms)).await;
                    remove_dir(dir);
                    return Ok(ExitEvent::cancelled());
                }
                line = stdout.next(), if stdout_open => match line {
                    Some(line) => {
                        let line = line?;
                        if decoder.json_stream() {
                            let _ = self.events.send(decoder.stdout_line(line));
                        } else {
                            captured_stdout.push_str(&line);
                            captured_stdout.push('\n');
                        }
                    }
                    None => stdout_open = false,
                },
                line = stderr.next(), if stderr_open => match line {
                    Some(line) => {
                        let line = line?;
                        if decoder.json_stream() {
                            let _ = self.events.send(decoder.stderr_line(line));
                        } else {
                            captured_stderr.push_str(&line);
                            captured_stderr.push('\n');
                        }
                    }
                    None => stderr_open = false,
                },
            }
        }

        let status = tokio::select! {
            _ = self.cancel.cancelled() => {
                interrupt(&mut child, Duration::from_millis(self.settings.interrupt_grace_ms)).await;
                remove_dir(dir);
                return Ok(ExitEvent::cancelled());
            }
            status = child.wait() => status?,
        };
        debug!("Engine exited with {}", status);

        let mut exit = match status.code() {
            Some(code) => ExitEvent::with_code(code),
            None => ExitEvent::transport_failure(format!("engine terminated: {}", status)),
        };
        if !decoder.json_stream() {
            exit.stdout = Some(captured_stdout);
            exit.stderr = Some(captured_stderr);
        }

        if !self.invocation.output_files.is_empty() {
            let mut outputs = BTreeMap::new();
            for name in &self.invocation.output_files {
                let contents = tokio::fs::read_to_string(dir.path().join(name)).await.ok();
                outputs.insert(name.clone(), contents);
            }
            exit.output_files = Some(outputs);
        }

        remove_dir(dir);
        Ok(exit)
    }
}

/// Ask the engine to stop, then kill it once the grace period runs out
async fn interrupt(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        debug!("Sending SIGINT to PID {}", pid);
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
            debug!("Failed to send SIGINT: {}", e);
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => debug!("Engine stopped with {}", status),
        Ok(Err(e)) => warn!("Error waiting for engine: {}", e),
        Err(_) => {
            debug!("Engine ignored interrupt, killing");
            if let Err(e) = child.kill().await {
                warn!("Failed to kill engine: {}", e);
            }
        }
    }
}

/// Remove the staging directory without holding up the caller
fn remove_dir(dir: TempDir) {
    let path = dir.path().to_path_buf();
    tokio::task::spawn_blocking(move || {
        if let Err(e) = dir.close() {
            debug!("Failed to remove {:?}: {}", path, e);
        }
    });
}
