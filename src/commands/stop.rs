// src/commands/stop.rs
//! `eden stop`

use anyhow::{Context, Result};
use eden::launcher::{self, StopOutcome};
use eden::EdenConfig;
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

pub fn cmd_stop(eden_dir: &Path, timeout_secs: u64) -> Result<ExitCode> {
    let config = EdenConfig::load(eden_dir)
        .with_context(|| format!("Failed to load configuration from {}", eden_dir.display()))?;

    let outcome = launcher::stop(
        eden_dir,
        &config,
        config.systemd_enabled(),
        Duration::from_secs(timeout_secs),
    )
    .with_context(|| format!("Failed to stop edenfs for {}", eden_dir.display()))?;

    match outcome {
        StopOutcome::Stopped { pid: Some(pid) } => println!("Stopped edenfs (pid {})", pid),
        StopOutcome::Stopped { pid: None } => println!("Stopped edenfs"),
        StopOutcome::Killed { pid } => println!("Killed edenfs (pid {})", pid),
        StopOutcome::NotRunning => {
            println!("edenfs is not running");
            return Ok(ExitCode::FAILURE);
        }
    }
    Ok(ExitCode::SUCCESS)
}
