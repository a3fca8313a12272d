// src/service/systemctl.rs

//! `systemctl --user` driver

use super::ServiceManager;
use crate::{Error, Result};
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Talks to the user's service manager through `systemctl --user`
#[derive(Debug, Clone)]
pub struct SystemctlUserManager {
    program: PathBuf,
    timeout: Duration,
}

impl SystemctlUserManager {
    /// Default bound on a single systemctl invocation
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

    /// Use the given systemctl program
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Override the per-invocation timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        debug!("Executing: {} --user {:?}", self.program.display(), args);

        let mut child = Command::new(&self.program)
            .arg("--user")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::ServiceManagerError(format!(
                    "Failed to spawn '{}': {}",
                    self.program.display(),
                    e
                ))
            })?;

        // Read both pipes while waiting so a chatty systemctl cannot block
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        match child.wait_timeout(self.timeout)? {
            Some(status) => {
                let stdout = String::from_utf8_lossy(&stdout.join().unwrap_or_default()).into_owned();
                let stderr = stderr.join().unwrap_or_default();
                let stderr = String::from_utf8_lossy(&stderr);

                if status.success() {
                    Ok(stdout)
                } else {
                    let code = status.code().unwrap_or(-1);
                    Err(Error::ServiceManagerError(format!(
                        "systemctl --user {} failed with exit code {}: {}",
                        args.join(" "),
                        code,
                        stderr.trim()
                    )))
                }
            }
            None => {
                let _ = child.kill();
                let _ = child.wait();
                warn!("systemctl --user {} timed out", args.join(" "));
                Err(Error::ServiceManagerError(format!(
                    "systemctl --user {} timed out after {} seconds",
                    args.join(" "),
                    self.timeout.as_secs()
                )))
            }
        }
    }

    fn show_property(&self, unit: &str, property: &str) -> Result<String> {
        let property_arg = format!("--property={}", property);
        let output = self.run(&["show", &property_arg, "--value", unit])?;
        Ok(output.trim().to_string())
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

impl Default for SystemctlUserManager {
    fn default() -> Self {
        Self::new("systemctl")
    }
}

impl ServiceManager for SystemctlUserManager {
    fn daemon_reload(&self) -> Result<()> {
        self.run(&["daemon-reload"]).map(|_| ())
    }

    fn start_unit(&self, unit: &str) -> Result<()> {
        self.run(&["start", unit]).map(|_| ())
    }

    fn stop_unit(&self, unit: &str) -> Result<()> {
        self.run(&["stop", unit]).map(|_| ())
    }

    fn query_active_state(&self, unit: &str) -> Result<String> {
        self.show_property(unit, "ActiveState")
    }

    fn query_sub_state(&self, unit: &str) -> Result<String> {
        self.show_property(unit, "SubState")
    }

    /// The program resolves to an executable
    fn is_available(&self) -> bool {
        let found = which::which(&self.program).is_ok();
        if !found {
            debug!("{} not found", self.program.display());
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("systemctl");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_show_property_passes_user_flag() {
        let temp_dir = TempDir::new().unwrap();
        let script = write_script(
            temp_dir.path(),
            r#"[ "$1" = "--user" ] || exit 64
case "$3" in
  --property=ActiveState) echo active ;;
  --property=SubState) echo running ;;
esac"#,
        );

        let manager = SystemctlUserManager::new(script);
        assert!(manager.is_available());
        assert_eq!(manager.query_active_state("x.service").unwrap(), "active");
        assert_eq!(manager.query_sub_state("x.service").unwrap(), "running");
    }

    #[test]
    fn test_failure_reports_stderr() {
        let temp_dir = TempDir::new().unwrap();
        let script = write_script(temp_dir.path(), "echo 'Unit x.service not found.' >&2\nexit 5");

        let err = SystemctlUserManager::new(script).start_unit("x.service").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exit code 5"));
        assert!(msg.contains("not found"));
    }

    #[test]
    fn test_timeout_kills_child() {
        let temp_dir = TempDir::new().unwrap();
        let script = write_script(temp_dir.path(), "exec sleep 30");

        let manager = SystemctlUserManager::new(script).with_timeout(Duration::from_millis(200));
        assert!(matches!(
            manager.daemon_reload(),
            Err(Error::ServiceManagerError(msg)) if msg.contains("timed out")
        ));
    }

    #[test]
    fn test_large_output_does_not_stall() {
        let temp_dir = TempDir::new().unwrap();
        let script = write_script(temp_dir.path(), "yes 'loading unit files' | head -n 50000\nyes 'warning' | head -n 20000 >&2");

        let manager = SystemctlUserManager::new(script).with_timeout(Duration::from_secs(20));
        let started = std::time::Instant::now();
        manager.daemon_reload().unwrap();
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[test]
    fn test_missing_program() {
        let manager = SystemctlUserManager::new("/nonexistent/systemctl");
        assert!(!manager.is_available());
        assert!(manager.daemon_reload().is_err());
    }
}
