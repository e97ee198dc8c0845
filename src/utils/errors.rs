// src/utils/errors.rs
//! Error types for the client library

use crate::protocol::event::{Diagnostic, ExitEvent};
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors raised by the client before, during or after an engine run
#[derive(Debug, Error)]
pub enum ClientError {
    /// A staged file path normalises outside the sandbox root
    #[error("Unsupported file path {0}: escapes the sandbox root")]
    PathTraversal(String),

    /// Path-only file used where the transport cannot read local files
    #[error("Missing file contents for {0}")]
    MissingContent(String),

    /// `init` called after the pool already holds contexts
    #[error("init() called after library already used/initialised")]
    AlreadyInitialized,

    #[error("Failed to create execution context: {0}")]
    ContextSpawnFailed(String),

    #[error("Execution context unavailable: {0}")]
    ContextUnavailable(String),

    #[error("Engine executable '{0}' not found")]
    EngineNotFound(String),

    #[error("Unsupported file path {0}")]
    UnsupportedStdlibPath(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Interface extraction failed; carries every error the engine reported
    #[error("Model interface failed with {} error(s)", errors.len())]
    Interface {
        code: Option<i32>,
        errors: Vec<Diagnostic>,
    },

    #[error(transparent)]
    Run(#[from] RunFailure),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Rejection value of a run: the terminal exit event plus the first error
/// event the engine reported, if any.
#[derive(Debug, Clone, Error)]
#[error("{}", describe(.exit, .error.as_ref()))]
pub struct RunFailure {
    pub exit: ExitEvent,
    pub error: Option<Diagnostic>,
}

impl RunFailure {
    /// Whether the run ended because it was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.exit.is_cancelled()
    }
}

fn describe(exit: &ExitEvent, error: Option<&Diagnostic>) -> String {
    let mut text = match (exit.code, &exit.error) {
        (None, _) => "engine run cancelled".to_string(),
        (Some(code), Some(transport)) => format!("engine run failed ({code}): {transport}"),
        (Some(code), None) => format!("engine exited with code {code}"),
    };
    if let Some(error) = error {
        text.push_str(": ");
        text.push_str(&error.message);
    }
    text
}
