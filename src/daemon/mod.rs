// src/daemon/mod.rs

//! edenfs daemon lifecycle
//!
//! The daemon owns an eden state directory for as long as it runs:
//!
//! ```text
//! eden start                              edenfs
//!      │                                     │
//!      ├─ spawn --startupStatusFd N ────────►│ acquire <edenDir>/lock
//!      │                                     │ sd_notify READY=1 (under systemd)
//!      │◄──────────── "ok" on fd N ──────────┤
//!      │                                     │ ... serve until SIGTERM/SIGINT
//! ```
//!
//! # Module Structure
//!
//! - `args` - Daemon command line
//! - `lock` - Per-directory exclusive lock holding the daemon PID
//! - `startup` - Startup status pipe between launcher and daemon
//! - `systemd` - sd_notify and watchdog support

pub mod args;
pub mod lock;
pub mod startup;
pub mod systemd;

use crate::{Error, Result};
use std::path::PathBuf;
use tracing::{info, warn};

pub use args::DaemonArgs;
pub use lock::{EdenLock, LOCK_FILE_NAME};
pub use startup::{StartupStatusPipe, StartupStatusReporter, STARTUP_STATUS_FD_FLAG};
pub use systemd::{SystemdNotifier, Watchdog};

/// Line announcing the experimental systemd mode
pub const SYSTEMD_MODE_MESSAGE: &str = "Running in experimental systemd mode";

/// Line announcing a successful start
pub const STARTED_MESSAGE: &str = "Started edenfs";

/// Daemon configuration, as parsed from the daemon command line
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    /// Eden state directory
    pub eden_dir: PathBuf,
    /// Stay attached to the launching terminal
    pub foreground: bool,
    /// Permit running as root without sudo
    pub allow_root: bool,
    /// Started in experimental systemd mode
    pub experimental_systemd: bool,
    /// Enforce the root/sudo policy (disabled by fake_edenfs)
    pub privilege_checks: bool,
    /// Keep running on SIGTERM; only SIGINT or SIGKILL end the daemon
    pub ignore_stop: bool,
}

impl DaemonOptions {
    /// Options for a state directory with every flag off
    pub fn new<P: Into<PathBuf>>(eden_dir: P) -> Self {
        Self {
            eden_dir: eden_dir.into(),
            foreground: false,
            allow_root: false,
            experimental_systemd: false,
            privilege_checks: true,
            ignore_stop: false,
        }
    }
}

/// Check whether the current user may run the daemon
///
/// edenfs must not run as a plain root login: either go through sudo (which
/// records the invoking user) or pass `--allowRoot`.
pub fn check_privileges(options: &DaemonOptions) -> Result<()> {
    check_privileges_for(
        nix::unistd::getuid().is_root(),
        std::env::var_os("SUDO_UID").is_some(),
        options,
    )
}

fn check_privileges_for(is_root: bool, via_sudo: bool, options: &DaemonOptions) -> Result<()> {
    if !options.privilege_checks || !is_root || via_sudo || options.allow_root {
        return Ok(());
    }
    Err(Error::PermissionDenied(
        "edenfs should be started via sudo, not as root; use --allowRoot to override"
            .to_string(),
    ))
}

/// Acquire the directory and announce startup
///
/// Returns the held lock; startup status is reported either way.
pub fn prepare(options: &DaemonOptions, reporter: &mut StartupStatusReporter) -> Result<EdenLock> {
    match try_prepare(options) {
        Ok(lock) => Ok(lock),
        Err(e) => {
            reporter.report_failure(&e.to_string());
            Err(e)
        }
    }
}

fn try_prepare(options: &DaemonOptions) -> Result<EdenLock> {
    check_privileges(options)?;

    std::fs::create_dir_all(&options.eden_dir)?;
    let lock_path = options.eden_dir.join(LOCK_FILE_NAME);
    let lock = match EdenLock::try_acquire(&lock_path)? {
        Some(lock) => lock,
        None => {
            let pid = EdenLock::holder_pid(&lock_path).unwrap_or(0);
            return Err(Error::AlreadyRunning(pid));
        }
    };

    if options.experimental_systemd {
        info!("{}", SYSTEMD_MODE_MESSAGE);
    }
    Ok(lock)
}

/// Run the daemon until SIGTERM or SIGINT
///
/// Reports startup status, notifies systemd when managed by it, and pings
/// the watchdog while running.
pub fn run(options: DaemonOptions, mut reporter: StartupStatusReporter) -> Result<()> {
    let lock = prepare(&options, &mut reporter)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            reporter.report_failure(&format!("failed to start runtime: {}", e));
            Error::Io(e)
        })?;

    let mut systemd = SystemdNotifier::from_env();
    runtime.block_on(async {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        systemd.ready("edenfs running");
        reporter.report_success()?;
        info!(
            eden_dir = %options.eden_dir.display(),
            pid = std::process::id(),
            "{}", STARTED_MESSAGE
        );

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    if options.ignore_stop {
                        info!("Received SIGTERM, ignoring it");
                        continue;
                    }
                    info!("Received SIGTERM, shutting down");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down");
                    break;
                }
                _ = tokio::time::sleep(systemd.wakeup_interval()) => {
                    systemd.tick();
                }
            }
        }
        Ok::<(), Error>(())
    })
    .inspect_err(|e| warn!("edenfs main loop failed: {}", e))?;

    systemd.stopping();
    drop(lock);
    info!("edenfs stopped");
    Ok(())
}
