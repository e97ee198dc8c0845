// src/main.rs
//! MiniZinc client
//!
//! Solves the given model and data files with the MiniZinc executable and
//! prints every engine event as one JSON line on stdout.

use anyhow::{Context, Result};
use clap::Parser;
use minizinc_client::observability::init_tracing;
use minizinc_client::{Client, ClientConfig, EventKind, Model, SolveConfig, SolverOptions, VERSION};
use serde_json::Value;
use std::path::PathBuf;
use tracing::{error, info};

const PRINTED_KINDS: [EventKind; 13] = [
    EventKind::Error,
    EventKind::Warning,
    EventKind::Solution,
    EventKind::Checker,
    EventKind::Status,
    EventKind::Statistics,
    EventKind::Time,
    EventKind::Trace,
    EventKind::Interface,
    EventKind::Other,
    EventKind::Stdout,
    EventKind::Stderr,
    EventKind::Exit,
];

#[derive(Parser)]
#[command(name = "minizinc-client")]
#[command(about = "Run MiniZinc and stream its events as JSON lines", long_about = None)]
struct Cli {
    /// Model (.mzn), data (.dzn, .json) and parameter (.mpc) files
    #[arg(required = true)]
    files: Vec<PathBuf>,

    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Report every solution instead of the first
    #[arg(short, long)]
    all_solutions: bool,

    #[arg(long, value_name = "ID")]
    solver: Option<String>,

    /// Type-check only
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ClientConfig::from_file(path),
        None => ClientConfig::load(),
    }
    .context("Failed to load configuration")?;
    config.validate()?;
    init_tracing(&config.logging)?;

    info!("Starting minizinc-client v{}", VERSION);
    let client = Client::from_config(&config);

    let mut model = Model::new();
    for file in &cli.files {
        model.add_local_file(file.to_string_lossy(), true);
    }

    if cli.check {
        let errors = client.check(&model, None).await?;
        for error in &errors {
            println!("{}", serde_json::to_string(error)?);
        }
        if !errors.is_empty() {
            anyhow::bail!("{} error(s) found", errors.len());
        }
        return Ok(());
    }

    let mut options = SolverOptions::new();
    if cli.all_solutions {
        options.insert("all-solutions".into(), Value::Bool(true));
    }
    if let Some(solver) = cli.solver {
        options.insert("solver".into(), Value::String(solver));
    }
    let solve_config = SolveConfig {
        options: (!options.is_empty()).then_some(options),
        ..Default::default()
    };

    let handle = client.solve_with(&model, &solve_config, |handle| {
        for kind in PRINTED_KINDS {
            handle.on(kind, |event| println!("{}", event.to_json()));
        }
    })?;

    let result = tokio::select! {
        result = handle.wait() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received interrupt, cancelling solve");
            handle.cancel();
            handle.wait().await
        }
    };

    match result {
        Ok(result) => {
            info!("Finished with status {}", result.status);
            Ok(())
        }
        Err(e) => {
            error!("Solve failed: {}", e);
            Err(e.into())
        }
    }
}
