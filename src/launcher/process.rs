// src/launcher/process.rs

//! Locating the daemon executable and building its command line

use crate::config::EdenConfig;
use crate::daemon::STARTUP_STATUS_FD_FLAG;
use crate::{Error, Result};
use std::ffi::OsString;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Executable name of the daemon
pub const DAEMON_BINARY_NAME: &str = "edenfs";

/// Find the daemon executable
///
/// Order: the explicit `--daemon-binary`, `[core] daemon_binary` from the
/// configuration, an `edenfs` next to the running executable, then `PATH`.
pub fn resolve_daemon_binary(explicit: Option<&Path>, config: &EdenConfig) -> Result<PathBuf> {
    if let Some(path) = explicit.or(config.core.daemon_binary.as_deref()) {
        return absolute_executable(path);
    }

    if let Some(sibling) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DAEMON_BINARY_NAME)))
        .filter(|path| path.is_file())
    {
        debug!("Using daemon next to the launcher: {}", sibling.display());
        return absolute_executable(&sibling);
    }

    which::which(DAEMON_BINARY_NAME).map_err(|_| {
        Error::NotFoundError(format!(
            "cannot find the {} executable; pass --daemon-binary",
            DAEMON_BINARY_NAME
        ))
    })
}

fn absolute_executable(path: &Path) -> Result<PathBuf> {
    if !path.is_file() {
        return Err(Error::NotFoundError(format!(
            "daemon binary {} does not exist",
            path.display()
        )));
    }
    Ok(path.canonicalize()?)
}

/// Daemon command line
#[derive(Debug, Clone)]
pub struct DaemonCommand {
    /// Daemon executable
    pub binary: PathBuf,
    /// Eden state directory
    pub eden_dir: PathBuf,
    /// Pass `--foreground`
    pub foreground: bool,
    /// Pass `--experimentalSystemd`
    pub experimental_systemd: bool,
    /// Arguments given after `--`
    pub extra_args: Vec<String>,
}

impl DaemonCommand {
    /// Arguments following the executable
    pub fn args(&self, status_fd: Option<RawFd>) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--edenDir".into(), self.eden_dir.clone().into()];
        if self.foreground {
            args.push("--foreground".into());
        }
        if self.experimental_systemd {
            args.push("--experimentalSystemd".into());
        }
        if let Some(fd) = status_fd {
            args.push(STARTUP_STATUS_FD_FLAG.into());
            args.push(fd.to_string().into());
        }
        args.extend(self.extra_args.iter().map(OsString::from));
        args
    }

    /// Process builder for this command line
    pub fn command(&self, status_fd: Option<RawFd>) -> Command {
        let mut command = Command::new(&self.binary);
        command.args(self.args(status_fd));
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn daemon_command() -> DaemonCommand {
        DaemonCommand {
            binary: PathBuf::from("/usr/bin/edenfs"),
            eden_dir: PathBuf::from("/home/user/.eden"),
            foreground: true,
            experimental_systemd: true,
            extra_args: vec!["--allowRoot".to_string()],
        }
    }

    #[test]
    fn test_args_order() {
        let args = daemon_command().args(Some(7));
        let args: Vec<&str> = args.iter().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(
            args,
            [
                "--edenDir",
                "/home/user/.eden",
                "--foreground",
                "--experimentalSystemd",
                "--startupStatusFd",
                "7",
                "--allowRoot"
            ]
        );
    }

    #[test]
    fn test_args_without_flags() {
        let command = DaemonCommand {
            foreground: false,
            experimental_systemd: false,
            extra_args: vec![],
            ..daemon_command()
        };
        assert_eq!(command.args(None).len(), 2);
    }

    #[test]
    fn test_resolve_prefers_explicit_binary() {
        let temp_dir = TempDir::new().unwrap();
        let explicit = temp_dir.path().join("fake_edenfs");
        std::fs::write(&explicit, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&explicit, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = EdenConfig::default();
        config.core.daemon_binary = Some(PathBuf::from("/nonexistent/edenfs"));

        let resolved = resolve_daemon_binary(Some(&explicit), &config).unwrap();
        assert_eq!(resolved, explicit.canonicalize().unwrap());

        // Falls through to the configured binary, which is missing
        assert!(matches!(
            resolve_daemon_binary(None, &config),
            Err(Error::NotFoundError(_))
        ));
    }
}
