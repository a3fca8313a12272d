// src/lib.rs

//! Eden
//!
//! Two cooperating toolsets live in this crate:
//!
//! - **Launcher**: the `eden` CLI starts, stops and inspects the `edenfs`
//!   daemon for a state directory, either directly or as a user-level
//!   systemd service when the experimental systemd mode is enabled.
//! - **Conversion**: `svnfetch` converts a Subversion dump stream into a
//!   changeset repository, rewriting authors, files and branches through
//!   user-supplied maps.
//!
//! # Architecture
//!
//! - `config` - `edenfs.toml` and environment overrides
//! - `daemon` - daemon lifecycle: lock, startup status pipe, sd_notify
//! - `launcher` - CLI side of `start`/`stop`/`status`
//! - `service` - user service manager (systemctl) and unit naming
//! - `nfs` - NFSv3 attribute conversions for file metadata
//! - `convert` - dump parsing, remapping and changeset storage

pub mod cas;
pub mod config;
pub mod convert;
pub mod daemon;
mod error;
pub mod fsutil;
pub mod hash;
pub mod launcher;
pub mod nfs;
pub mod service;

pub use config::{EdenConfig, SYSTEMD_ENV_VAR};
pub use convert::{fetch_revisions, AuthorMap, FetchOptions, FetchSummary, Repository};
pub use error::{Error, Result};
pub use launcher::{StartOptions, StartOutcome};
pub use service::{EdenFsSystemdService, ServiceManager, SystemctlUserManager};
