// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use cli::{Cli, Commands, DebugCommands};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // stdout carries status lines only; diagnostics go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(ExitCode::SUCCESS);
    };

    match command {
        Commands::Start {
            foreground,
            allow_root,
            daemon_binary,
            daemon_args,
        } => {
            let eden_dir = commands::resolve_eden_dir(cli.config_dir.as_deref())?;
            commands::cmd_start(&eden_dir, foreground, allow_root, daemon_binary, daemon_args)
        }
        Commands::Stop { timeout } => {
            let eden_dir = commands::resolve_eden_dir(cli.config_dir.as_deref())?;
            commands::cmd_stop(&eden_dir, timeout)
        }
        Commands::Status => {
            let eden_dir = commands::resolve_eden_dir(cli.config_dir.as_deref())?;
            commands::cmd_status(&eden_dir)
        }
        Commands::Debug { command } => {
            match command {
                DebugCommands::UnitName => {
                    let eden_dir = commands::resolve_eden_dir(cli.config_dir.as_deref())?;
                    commands::cmd_debug_unit_name(&eden_dir)?;
                }
                DebugCommands::Getattr { path } => commands::cmd_debug_getattr(&path)?,
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "eden", &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
    }
}
