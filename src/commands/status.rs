// src/commands/status.rs
//! `eden status`

use anyhow::{Context, Result};
use eden::launcher;
use eden::{EdenConfig, EdenFsSystemdService, SystemctlUserManager};
use std::path::Path;
use std::process::ExitCode;
use tracing::debug;

pub fn cmd_status(eden_dir: &Path) -> Result<ExitCode> {
    let config = EdenConfig::load(eden_dir)
        .with_context(|| format!("Failed to load configuration from {}", eden_dir.display()))?;

    if config.systemd_enabled() {
        let manager = SystemctlUserManager::new(config.systemd.systemctl.clone());
        let service = EdenFsSystemdService::for_eden_dir(&manager, eden_dir)?;
        match (service.query_active_state(), service.query_sub_state()) {
            (Ok(active), Ok(sub)) => println!("systemd unit {}: {}/{}", service, active, sub),
            (Err(e), _) | (_, Err(e)) => debug!("Cannot query {}: {}", service, e),
        }
    }

    match launcher::running_pid(eden_dir) {
        Some(pid) => {
            println!("edenfs running normally (pid {})", pid);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            println!("edenfs not running");
            Ok(ExitCode::FAILURE)
        }
    }
}
