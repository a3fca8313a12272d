// src/daemon/startup.rs

//! Startup status channel between the launcher and the daemon
//!
//! The launcher creates a pipe and passes the write end to the daemon as
//! `--startupStatusFd <fd>`. Once the daemon is ready (or has failed), it
//! writes a single status line and closes the descriptor:
//!
//! - `ok` - startup succeeded
//! - `error: <message>` - startup failed
//!
//! If the daemon dies first, the launcher sees end-of-file instead.

use crate::{Error, Result};
use nix::fcntl::OFlag;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Command-line flag carrying the status descriptor
pub const STARTUP_STATUS_FD_FLAG: &str = "--startupStatusFd";

const STATUS_OK: &str = "ok";
const STATUS_ERROR_PREFIX: &str = "error: ";

/// Launcher side of the status channel
pub struct StartupStatusPipe {
    reader: File,
    writer: Option<OwnedFd>,
}

impl StartupStatusPipe {
    /// Create the pipe
    ///
    /// Both ends are close-on-exec; only a child configured with
    /// [`StartupStatusPipe::share_with`] inherits the write end.
    pub fn new() -> Result<Self> {
        let (read_fd, write_fd) = nix::unistd::pipe2(OFlag::O_CLOEXEC)?;

        Ok(Self {
            reader: File::from(read_fd),
            writer: Some(write_fd),
        })
    }

    /// Descriptor number to hand to the daemon
    pub fn writer_fd(&self) -> Option<RawFd> {
        self.writer.as_ref().map(|fd| fd.as_raw_fd())
    }

    /// Make `command`'s child inherit the write end
    pub fn share_with(&self, command: &mut Command) {
        let Some(fd) = self.writer_fd() else {
            return;
        };
        // SAFETY: the hook only calls fcntl(2), which is async-signal-safe.
        unsafe {
            command.pre_exec(move || {
                let flags = libc::fcntl(fd, libc::F_GETFD);
                if flags < 0 || libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    /// Close our copy of the write end
    ///
    /// Must happen after the daemon is spawned, so that its exit shows up
    /// as end-of-file.
    pub fn close_writer(&mut self) {
        self.writer = None;
    }

    /// Wait for the daemon's status line
    pub fn wait(mut self, timeout: Duration) -> Result<()> {
        self.close_writer();

        let mut reader = BufReader::new(self.reader);
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut line = String::new();
            let result = reader.read_line(&mut line).map(|_| line);
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(Ok(line)) => parse_status_line(&line),
            Ok(Err(e)) => Err(Error::Io(e)),
            Err(RecvTimeoutError::Timeout) => Err(Error::TimeoutError(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(Error::StartupFailed(
                "startup status reader exited unexpectedly".to_string(),
            )),
        }
    }
}

/// Interpret a status line written by the daemon
pub fn parse_status_line(line: &str) -> Result<()> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return Err(Error::StartupFailed(
            "edenfs exited before reporting its startup status".to_string(),
        ));
    }
    if line == STATUS_OK {
        return Ok(());
    }
    match line.strip_prefix(STATUS_ERROR_PREFIX) {
        Some(message) => Err(Error::StartupFailed(message.to_string())),
        None => Err(Error::StartupFailed(format!(
            "unexpected startup status: {}",
            line
        ))),
    }
}

/// Daemon side of the status channel
///
/// Reports at most once; later reports are ignored.
pub struct StartupStatusReporter {
    file: Option<File>,
}

impl StartupStatusReporter {
    /// Reporter that discards status (no launcher is listening)
    pub fn disabled() -> Self {
        Self { file: None }
    }

    /// Take ownership of the descriptor passed by the launcher
    ///
    /// # Safety
    ///
    /// `fd` must be an open descriptor that nothing else in this process
    /// owns or will close.
    pub unsafe fn from_raw_fd(fd: RawFd) -> Self {
        // SAFETY: ownership is transferred by the caller's contract.
        let file = unsafe { File::from_raw_fd(fd) };
        Self { file: Some(file) }
    }

    /// Report successful startup
    pub fn report_success(&mut self) -> Result<()> {
        self.send(STATUS_OK)
    }

    /// Report failed startup
    pub fn report_failure(&mut self, message: &str) {
        // Status lines are single-line
        let message = message.replace('\n', " ");
        if let Err(e) = self.send(&format!("{}{}", STATUS_ERROR_PREFIX, message)) {
            warn!("Failed to report startup failure: {}", e);
        }
    }

    fn send(&mut self, line: &str) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            writeln!(file, "{}", line)?;
            file.flush()?;
            debug!("Reported startup status: {}", line);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::IntoRawFd;

    #[test]
    fn test_parse_status_line() {
        assert!(parse_status_line("ok\n").is_ok());

        match parse_status_line("error: lock held\n") {
            Err(Error::StartupFailed(msg)) => assert_eq!(msg, "lock held"),
            other => panic!("unexpected result: {:?}", other),
        }

        match parse_status_line("") {
            Err(Error::StartupFailed(msg)) => assert!(msg.contains("exited before")),
            other => panic!("unexpected result: {:?}", other),
        }

        assert!(parse_status_line("bogus").is_err());
    }

    #[test]
    fn test_pipe_round_trip_success() {
        let mut pipe = StartupStatusPipe::new().unwrap();
        let writer = pipe.writer.take().unwrap();

        let mut reporter = unsafe { StartupStatusReporter::from_raw_fd(writer.into_raw_fd()) };
        reporter.report_success().unwrap();
        // A second report is a no-op
        reporter.report_failure("ignored");

        assert!(pipe.wait(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_pipe_reports_failure_message() {
        let mut pipe = StartupStatusPipe::new().unwrap();
        let writer = pipe.writer.take().unwrap();

        let mut reporter = unsafe { StartupStatusReporter::from_raw_fd(writer.into_raw_fd()) };
        reporter.report_failure("edenfs is already running\n(pid 7)");

        match pipe.wait(Duration::from_secs(5)) {
            Err(Error::StartupFailed(msg)) => assert_eq!(msg, "edenfs is already running (pid 7)"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_pipe_eof_when_writer_closed() {
        let mut pipe = StartupStatusPipe::new().unwrap();
        drop(pipe.writer.take());

        assert!(matches!(
            pipe.wait(Duration::from_secs(5)),
            Err(Error::StartupFailed(_))
        ));
    }

    #[test]
    fn test_pipe_times_out() {
        let mut pipe = StartupStatusPipe::new().unwrap();
        // Keep a writer open elsewhere so no EOF arrives
        let _held = pipe.writer.take();

        assert!(matches!(
            pipe.wait(Duration::from_millis(50)),
            Err(Error::TimeoutError(_))
        ));
    }

    #[test]
    fn test_pipe_is_close_on_exec() {
        let pipe = StartupStatusPipe::new().unwrap();
        let fd = pipe.writer_fd().unwrap();
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        assert_ne!(flags & libc::FD_CLOEXEC, 0);
    }

    #[test]
    fn test_shared_writer_reaches_child() {
        let pipe = StartupStatusPipe::new().unwrap();
        let fd = pipe.writer_fd().unwrap();

        let mut command = Command::new("/bin/sh");
        command.arg("-c").arg(format!("echo ok >&{}", fd));
        pipe.share_with(&mut command);
        let mut child = command.spawn().unwrap();

        assert!(pipe.wait(Duration::from_secs(5)).is_ok());
        child.wait().unwrap();
    }
}
