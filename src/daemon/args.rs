// src/daemon/args.rs

//! Daemon command line, shared by `edenfs` and `fake_edenfs`

use super::{DaemonOptions, StartupStatusReporter};
use clap::Parser;
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(author = "Eden Contributors")]
#[command(version)]
#[command(about = "The edenfs daemon", long_about = None)]
pub struct DaemonArgs {
    /// Eden state directory
    #[arg(long = "edenDir", value_name = "DIR")]
    pub eden_dir: PathBuf,

    /// Stay attached to the terminal
    #[arg(long)]
    pub foreground: bool,

    /// Allow running as root without sudo
    #[arg(long = "allowRoot")]
    pub allow_root: bool,

    /// Started in experimental systemd mode
    #[arg(long = "experimentalSystemd")]
    pub experimental_systemd: bool,

    /// Descriptor to report startup status on
    #[arg(long = "startupStatusFd", value_name = "FD", value_parser = clap::value_parser!(i32).range(0..))]
    pub startup_status_fd: Option<RawFd>,

    /// Keep running on SIGTERM (honored by fake_edenfs only)
    #[arg(long = "ignoreStop", hide = true)]
    pub ignore_stop: bool,

    /// Unrecognized trailing arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, hide = true)]
    pub extra: Vec<String>,
}

impl DaemonArgs {
    /// Split into daemon options and the startup status reporter
    ///
    /// Consumes the arguments so the status descriptor is adopted once.
    pub fn into_parts(self, privilege_checks: bool) -> (DaemonOptions, StartupStatusReporter) {
        if !self.extra.is_empty() {
            warn!("Ignoring unknown arguments: {}", self.extra.join(" "));
        }

        let reporter = match self.startup_status_fd {
            // SAFETY: the launcher leaves this descriptor open for us and
            // nothing else in this process refers to it.
            Some(fd) => unsafe { StartupStatusReporter::from_raw_fd(fd) },
            None => StartupStatusReporter::disabled(),
        };

        if self.ignore_stop && privilege_checks {
            warn!("--ignoreStop is only honored by fake_edenfs");
        }

        let options = DaemonOptions {
            eden_dir: self.eden_dir,
            foreground: self.foreground,
            allow_root: self.allow_root,
            experimental_systemd: self.experimental_systemd,
            privilege_checks,
            ignore_stop: self.ignore_stop && !privilege_checks,
        };
        (options, reporter)
    }
}
