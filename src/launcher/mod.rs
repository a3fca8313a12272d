// src/launcher/mod.rs

//! CLI side of the daemon lifecycle
//!
//! `start` has three shapes:
//!
//! - foreground: spawn the daemon attached to the terminal, wait for its
//!   startup status, then wait for it to exit
//! - background: spawn the daemon in its own process group with output
//!   sent to `<eden_dir>/logs/edenfs.log`
//! - background in experimental systemd mode: install the unit template
//!   and hand the daemon to `systemctl --user start`
//!
//! User-facing lines go to the writer passed in; diagnostics go through
//! `tracing`.

pub mod process;

use crate::config::EdenConfig;
use crate::daemon::{EdenLock, LOCK_FILE_NAME, STARTED_MESSAGE, SYSTEMD_MODE_MESSAGE, StartupStatusPipe};
use crate::service::{EdenFsSystemdService, ServiceManager, SystemctlUserManager, UnitEnvironment};
use crate::{Error, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub use process::{DaemonCommand, resolve_daemon_binary};

/// Log directory inside the eden state directory
pub const LOG_DIR_NAME: &str = "logs";

/// Daemon log file for background starts
pub const LOG_FILE_NAME: &str = "edenfs.log";

/// Default time `stop` waits before escalating to SIGKILL
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(15);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Options for `eden start`
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Eden state directory (absolute)
    pub eden_dir: PathBuf,
    /// Keep the daemon attached and wait for it
    pub foreground: bool,
    /// Daemon executable override
    pub daemon_binary: Option<PathBuf>,
    /// Arguments forwarded to the daemon
    pub daemon_args: Vec<String>,
    /// Experimental systemd mode is enabled
    pub experimental_systemd: bool,
}

/// How `start` finished
#[derive(Debug)]
pub enum StartOutcome {
    /// A foreground daemon ran and exited
    Exited(ExitStatus),
    /// A background daemon is running
    Detached { pid: u32 },
    /// The daemon runs as a user service
    SystemdUnit { unit: String },
}

/// How `stop` finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// The daemon was stopped
    Stopped { pid: Option<u32> },
    /// The daemon had to be killed
    Killed { pid: u32 },
    /// No daemon was running
    NotRunning,
}

/// Path of the daemon lock for a state directory
pub fn lock_path(eden_dir: &Path) -> PathBuf {
    eden_dir.join(LOCK_FILE_NAME)
}

/// PID of the daemon running for `eden_dir`, if any
pub fn running_pid(eden_dir: &Path) -> Option<u32> {
    EdenLock::holder_pid(lock_path(eden_dir))
}

/// Start the daemon
pub fn start<W: Write>(options: &StartOptions, config: &EdenConfig, out: &mut W) -> Result<StartOutcome> {
    start_with_manager(options, config, &systemctl(config), out)
}

/// `systemctl --user` as configured; a start job lasts as long as the
/// daemon may take to report readiness
fn systemctl(config: &EdenConfig) -> SystemctlUserManager {
    SystemctlUserManager::new(config.systemd.systemctl.clone()).with_timeout(config.startup_timeout())
}

/// Start the daemon, using `manager` in systemd mode
pub fn start_with_manager<W: Write>(
    options: &StartOptions,
    config: &EdenConfig,
    manager: &dyn ServiceManager,
    out: &mut W,
) -> Result<StartOutcome> {
    if options.experimental_systemd {
        writeln!(out, "{}", SYSTEMD_MODE_MESSAGE)?;
        out.flush()?;
    }

    if let Some(pid) = running_pid(&options.eden_dir) {
        return Err(Error::AlreadyRunning(pid));
    }

    let binary = resolve_daemon_binary(options.daemon_binary.as_deref(), config)?;
    info!("Starting {} for {}", binary.display(), options.eden_dir.display());

    if options.experimental_systemd && !options.foreground {
        let unit = start_systemd_service(options, config, manager, binary)?;
        writeln!(out, "{} (systemd unit {})", STARTED_MESSAGE, unit)?;
        out.flush()?;
        return Ok(StartOutcome::SystemdUnit { unit });
    }

    let daemon = DaemonCommand {
        binary,
        eden_dir: options.eden_dir.clone(),
        foreground: options.foreground,
        experimental_systemd: options.experimental_systemd,
        extra_args: options.daemon_args.clone(),
    };

    if options.foreground {
        let mut child = spawn_daemon(&daemon, config.startup_timeout())?;
        writeln!(out, "{}", STARTED_MESSAGE)?;
        out.flush()?;
        let status = child.wait()?;
        debug!("edenfs exited with {}", status);
        Ok(StartOutcome::Exited(status))
    } else {
        let child = spawn_daemon(&daemon, config.startup_timeout())?;
        let pid = child.id();
        writeln!(out, "{} (pid {})", STARTED_MESSAGE, pid)?;
        out.flush()?;
        Ok(StartOutcome::Detached { pid })
    }
}

/// Spawn the daemon and wait for its startup status
fn spawn_daemon(daemon: &DaemonCommand, timeout: Duration) -> Result<Child> {
    let mut pipe = StartupStatusPipe::new()?;
    let mut command = daemon.command(pipe.writer_fd());
    pipe.share_with(&mut command);

    if !daemon.foreground {
        let log_dir = daemon.eden_dir.join(LOG_DIR_NAME);
        fs::create_dir_all(&log_dir)?;
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join(LOG_FILE_NAME))?;
        command
            .stdin(Stdio::null())
            .stdout(log.try_clone()?)
            .stderr(log)
            .process_group(0);
    }

    debug!("Spawning {:?}", command);
    let mut child = command.spawn().map_err(|e| {
        Error::StartupFailed(format!("cannot run {}: {}", daemon.binary.display(), e))
    })?;
    pipe.close_writer();

    match pipe.wait(timeout) {
        Ok(()) => Ok(child),
        Err(e) => {
            if matches!(e, Error::TimeoutError(_)) {
                warn!("edenfs did not report startup in time, killing pid {}", child.id());
                let _ = child.kill();
            }
            let _ = child.wait();
            Err(e)
        }
    }
}

fn start_systemd_service(
    options: &StartOptions,
    config: &EdenConfig,
    manager: &dyn ServiceManager,
    binary: PathBuf,
) -> Result<String> {
    if !manager.is_available() {
        return Err(Error::ServiceManagerError(
            "no user service manager available for experimental systemd mode".to_string(),
        ));
    }

    let service = EdenFsSystemdService::for_eden_dir(manager, &options.eden_dir)?;
    let environment = UnitEnvironment {
        executable: binary,
        extra_args: options.daemon_args.clone(),
    };

    let unit_dir = config.unit_dir()?;
    if service.unit().install(&unit_dir, &environment)? {
        manager.daemon_reload()?;
    }

    let unit = service.unit().unit_name();
    info!("Starting systemd unit {}", unit);
    service.start()?;
    Ok(unit)
}

/// Stop the daemon
pub fn stop(eden_dir: &Path, config: &EdenConfig, experimental_systemd: bool, timeout: Duration) -> Result<StopOutcome> {
    stop_with_manager(eden_dir, experimental_systemd, &systemctl(config), timeout)
}

/// Stop the daemon, using `manager` in systemd mode
///
/// In systemd mode a running unit is stopped through the service manager;
/// any daemon still holding the lock afterwards is signalled directly.
pub fn stop_with_manager(
    eden_dir: &Path,
    experimental_systemd: bool,
    manager: &dyn ServiceManager,
    timeout: Duration,
) -> Result<StopOutcome> {
    let lock = lock_path(eden_dir);

    if experimental_systemd {
        let service = EdenFsSystemdService::for_eden_dir(manager, eden_dir)?;
        match service.is_running() {
            Ok(true) => {
                let pid = running_pid(eden_dir);
                info!("Stopping systemd unit {}", service);
                service.stop()?;
                if !wait_for_release(&lock, timeout) {
                    return Err(Error::TimeoutError(timeout));
                }
                return Ok(StopOutcome::Stopped { pid });
            }
            Ok(false) => debug!("{} is not running", service),
            Err(e) => warn!("Cannot query {}: {}", service, e),
        }
    }

    let Some(pid) = running_pid(eden_dir) else {
        return Ok(StopOutcome::NotRunning);
    };

    signal_daemon(pid, nix::sys::signal::Signal::SIGTERM)?;
    if wait_for_release(&lock, timeout) {
        return Ok(StopOutcome::Stopped { pid: Some(pid) });
    }

    warn!("edenfs (pid {}) did not stop within {:?}, sending SIGKILL", pid, timeout);
    signal_daemon(pid, nix::sys::signal::Signal::SIGKILL)?;
    if wait_for_release(&lock, Duration::from_secs(5)) {
        Ok(StopOutcome::Killed { pid })
    } else {
        Err(Error::TimeoutError(timeout))
    }
}

fn signal_daemon(pid: u32, signal: nix::sys::signal::Signal) -> Result<()> {
    let raw = i32::try_from(pid)
        .map_err(|_| Error::ParseError(format!("invalid pid {}", pid)))?;
    match nix::sys::signal::kill(nix::unistd::Pid::from_raw(raw), signal) {
        Ok(()) => Ok(()),
        // Already gone
        Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(Error::Sys(e)),
    }
}

fn wait_for_release(lock: &Path, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while EdenLock::is_held(lock) {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(POLL_INTERVAL);
    }
    true
}
