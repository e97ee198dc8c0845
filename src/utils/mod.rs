// src/utils/mod.rs
//! Shared configuration and error types

pub mod config;
pub mod errors;

pub use config::{ClientConfig, EngineSettings, LoggingSettings, PoolSettings};
pub use errors::{ClientError, Result, RunFailure};
