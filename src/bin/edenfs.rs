// src/bin/edenfs.rs

//! The edenfs daemon

use anyhow::{Context, Result};
use clap::Parser;
use eden::daemon::{self, DaemonArgs};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (options, reporter) = DaemonArgs::parse().into_parts(true);
    let eden_dir = options.eden_dir.clone();
    daemon::run(options, reporter)
        .with_context(|| format!("edenfs failed for {}", eden_dir.display()))
}
