// src/error.rs

//! Error types shared by the launcher, daemon and conversion engine

use std::time::Duration;
use thiserror::Error;

/// Library error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFoundError(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("edenfs is already running (pid {0})")]
    AlreadyRunning(u32),

    #[error("edenfs failed to start: {0}")]
    StartupFailed(String),

    #[error("Timed out after {0:?} waiting for edenfs")]
    TimeoutError(Duration),

    #[error("Service manager error: {0}")]
    ServiceManagerError(String),

    #[error("Conversion error: {0}")]
    ConversionError(String),

    #[error("Repository error: {0}")]
    RepositoryError(String),

    #[error("System call failed: {0}")]
    Sys(#[from] nix::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, Error>;
