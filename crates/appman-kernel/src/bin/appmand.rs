//! `appmand` - standalone application manager daemon.
//!
//! Loads the layered configuration, sets up logging from its `[logging]`
//! section and runs the manager until Ctrl+C or a fatal runtime failure.
//! Installed applications are read from a JSON file of already resolved
//! application records.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use appman_config::Config;
use appman_core::{Application, InMemoryDirectory};
use appman_kernel::{Kernel, KernelOptions};
use appman_runtime::{LauncherBackend, NativeBackend, RuntimeBackendRegistry};
use appman_telemetry::{LogConfig, setup_logging};

/// Application manager daemon.
#[derive(Parser)]
#[command(name = "appmand")]
#[command(author, version, about = "Application manager daemon")]
struct Args {
    /// Configuration file layered on top of the system and user files.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON file with the installed applications.
    #[arg(short, long)]
    applications: Option<PathBuf>,

    /// Log at debug level regardless of configuration.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if args.verbose {
        "debug".clone_into(&mut config.logging.level);
    }
    let log_config = LogConfig::from_section(&config.logging)?;
    if let Err(e) = setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let directory: InMemoryDirectory = match &args.applications {
        Some(path) => load_applications(path)?.into_iter().collect(),
        None => InMemoryDirectory::new(),
    };

    let mut backends = RuntimeBackendRegistry::new();
    backends.register(Arc::new(NativeBackend))?;
    for runtime in config.runtime.backends.keys() {
        if runtime != "native" {
            backends.register(Arc::new(LauncherBackend::new(runtime.clone())))?;
        }
    }

    let options = KernelOptions::new(config, Arc::new(directory)).with_backends(backends);
    let kernel = Kernel::boot(options).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        () = kernel.wait_for_shutdown() => {},
    }

    tracing::info!("Shutting down");
    kernel.shutdown(false).await;

    match kernel.fatal_error() {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn load_applications(path: &std::path::Path) -> Result<Vec<Application>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading applications from {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}
