// src/observability.rs
//! Tracing setup
//!
//! `RUST_LOG` takes precedence over the configured level. Output goes to
//! stderr so it never mixes with event output on stdout.

use crate::utils::config::LoggingSettings;
use crate::utils::errors::{ClientError, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(settings: &LoggingSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .map_err(|e| ClientError::InvalidConfig(format!("log level '{}': {}", settings.level, e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if settings.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    installed.map_err(|e| ClientError::InvalidConfig(format!("tracing already initialised: {}", e)))
}
