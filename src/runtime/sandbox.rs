// src/runtime/sandbox.rs
//! In-process engine modules
//!
//! Provides:
//! - The contract an embedded engine implements (`ModuleLoader`, `EngineModule`)
//! - The environment one invocation runs in (`ModuleEnv`)
//! - `SandboxTransport`, which hosts one module per worker thread
//!
//! Every invocation sees an in-memory filesystem with its files staged under
//! `/minizinc`, which is also its working directory. The tree is wiped after
//! each run; anything the loader put elsewhere (a stdlib image, say) stays.

use crate::runtime::context::{ContextId, Transport};
use crate::runtime::worker::WorkerContext;
use crate::utils::errors::Result;
use crate::vfs::MemFs;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Mount point for staged files
pub const SANDBOX_ROOT: &str = "/minizinc";

/// What an engine module sees while running one invocation
pub struct ModuleEnv<'a> {
    pub fs: &'a mut MemFs,
    pub stdout: &'a mut dyn Write,
    pub stderr: &'a mut dyn Write,
    interrupt: &'a AtomicBool,
}

impl<'a> ModuleEnv<'a> {
    pub fn new(
        fs: &'a mut MemFs,
        stdout: &'a mut dyn Write,
        stderr: &'a mut dyn Write,
        interrupt: &'a AtomicBool,
    ) -> Self {
        Self {
            fs,
            stdout,
            stderr,
            interrupt,
        }
    }

    /// Working directory; relative paths in the arguments resolve here
    pub fn cwd(&self) -> &'static str {
        SANDBOX_ROOT
    }

    /// Resolve an argument path against the working directory
    pub fn resolve(&self, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", SANDBOX_ROOT, path)
        }
    }

    /// Set once the run has been cancelled; long-running modules should
    /// poll this and return promptly
    pub fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Relaxed)
    }
}

/// A loaded engine, ready to run invocations one at a time
pub trait EngineModule: Send {
    /// Run the engine's entry point with command-line `args` and return its
    /// exit code
    fn call_main(&mut self, env: &mut ModuleEnv<'_>, args: &[String]) -> i32;
}

/// Instantiates engine modules, one per worker
pub trait ModuleLoader: Send + Sync + 'static {
    /// Expensive: runs on the worker thread before it reports ready. May
    /// preload data files into `fs`.
    fn load(&self, fs: &mut MemFs) -> Result<Box<dyn EngineModule>>;
}

/// Transport hosting in-process engine modules on worker threads
#[derive(Clone)]
pub struct SandboxTransport {
    loader: Arc<dyn ModuleLoader>,
}

impl SandboxTransport {
    pub fn new(loader: impl ModuleLoader) -> Self {
        Self {
            loader: Arc::new(loader),
        }
    }
}

impl Transport for SandboxTransport {
    type Context = WorkerContext;

    fn name(&self) -> &'static str {
        "sandbox"
    }

    fn create_context(&self, id: ContextId) -> Result<WorkerContext> {
        WorkerContext::spawn(id, Arc::clone(&self.loader))
    }

    fn supports_local_files(&self) -> bool {
        false
    }
}
