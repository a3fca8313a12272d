// src/cli/mod.rs
//! CLI definitions for the eden launcher
//!
//! Command implementations live in the `commands` module.
//!
//! - `start` - Start edenfs (foreground, background, or as a systemd unit)
//! - `stop` - Stop a running edenfs
//! - `status` - Report whether edenfs is running
//! - `debug` - Inspection helpers
//! - `completions` - Shell completion scripts

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "eden")]
#[command(author = "Eden Contributors")]
#[command(version)]
#[command(about = "Manage the edenfs daemon", long_about = None)]
pub struct Cli {
    /// Eden state directory (default: ~/.eden)
    #[arg(long, global = true, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the edenfs daemon
    Start {
        /// Run edenfs attached to this terminal and wait for it to exit
        #[arg(long)]
        foreground: bool,

        /// Allow edenfs to run as root without sudo
        #[arg(long = "allowRoot")]
        allow_root: bool,

        /// edenfs executable to run
        #[arg(long, value_name = "PATH")]
        daemon_binary: Option<PathBuf>,

        /// Arguments passed through to edenfs (after `--`)
        #[arg(last = true)]
        daemon_args: Vec<String>,
    },

    /// Stop the edenfs daemon
    Stop {
        /// Seconds to wait before killing the daemon
        #[arg(long, default_value_t = 15)]
        timeout: u64,
    },

    /// Check whether edenfs is running
    Status,

    /// Debugging helpers
    Debug {
        #[command(subcommand)]
        command: DebugCommands,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum DebugCommands {
    /// Print the systemd unit name for the state directory
    UnitName,

    /// Print NFSv3 attributes of a file as JSON
    Getattr {
        /// File to inspect
        path: PathBuf,
    },
}
