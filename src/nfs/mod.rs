// src/nfs/mod.rs

//! NFSv3 support
//!
//! Only the attribute model is implemented: conversions from POSIX file
//! metadata to the `fattr3` family of structures returned by GETATTR and
//! carried in weak cache consistency data.

pub mod attr;

pub use attr::{
    Fattr3, Ftype3, NfsTime3, PostOpAttr, PreOpAttr, SpecData3, WccAttr, WccData, ftype3_to_mode,
    mode_to_ftype3, mode_to_nfs_mode,
};

use crate::Result;
use std::path::Path;

/// GETATTR for a local path (symlinks are not followed)
pub fn getattr(path: &Path) -> Result<Fattr3> {
    let metadata = std::fs::symlink_metadata(path)?;
    Fattr3::from_metadata(&metadata)
}
