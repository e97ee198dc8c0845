// src/utils/config.rs
//! Client configuration
//!
//! Values are layered: built-in defaults, then an optional
//! `minizinc-client.{toml,json,yaml}` in the working directory, then
//! environment variables such as `MZN_CLIENT__POOL__SIZE=4`.

use crate::utils::errors::{ClientError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Base name of the optional configuration file
pub const CONFIG_FILE_STEM: &str = "minizinc-client";

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "MZN_CLIENT";

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub engine: EngineSettings,
    pub pool: PoolSettings,
    pub logging: LoggingSettings,
}

/// How the engine executable is located and driven
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Executable name or path (default: "minizinc")
    pub executable: String,

    /// Directories probed for `executable` before falling back to PATH
    pub search_paths: Vec<PathBuf>,

    /// Arguments placed before every invocation's own arguments
    pub leading_args: Vec<String>,

    /// Time between SIGINT and SIGKILL when a run is cancelled
    pub interrupt_grace_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            executable: "minizinc".to_string(),
            search_paths: vec![],
            leading_args: vec![],
            interrupt_grace_ms: 250,
        }
    }
}

/// Execution pool sizing and recycling policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Number of idle contexts kept ready (default: 2)
    pub size: usize,

    /// Uses after which a context is retired instead of reused (default: 10)
    pub retire_after: u32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            size: 2,
            retire_after: 10,
        }
    }
}

/// Logging output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Level filter used when RUST_LOG is unset
    pub level: String,

    /// Emit JSON lines instead of human readable text
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl ClientConfig {
    /// Load defaults, the optional config file and environment overrides
    pub fn load() -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(CONFIG_FILE_STEM).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("engine.search_paths")
                    .with_list_parse_key("engine.leading_args")
                    .try_parsing(true),
            )
            .build()?;

        let config: ClientConfig = settings.try_deserialize()?;
        config.validate()?;
        debug!(?config, "Configuration loaded");
        Ok(config)
    }

    /// Load a single explicit file (format chosen by extension)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings = Config::builder()
            .add_source(File::from(path))
            .build()?;

        let config: ClientConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pool cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.pool.size == 0 {
            return Err(ClientError::InvalidConfig(
                "pool.size must be at least 1".into(),
            ));
        }
        if self.pool.retire_after == 0 {
            return Err(ClientError::InvalidConfig(
                "pool.retire_after must be at least 1".into(),
            ));
        }
        if self.engine.executable.trim().is_empty() {
            return Err(ClientError::InvalidConfig(
                "engine.executable must not be empty".into(),
            ));
        }
        Ok(())
    }
}
