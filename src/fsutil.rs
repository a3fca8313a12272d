// src/fsutil.rs

//! Filesystem helpers

use crate::{Error, Result};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Replace `path` with `data` in one rename
///
/// The data is written to a temporary file in the same directory and
/// synced before it takes the place of `path`, so readers see either the
/// old or the new contents.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::IoError(format!("{} has no parent directory", path.display())))?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_replaces_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("systemd.conf");
        let link = temp_dir.path().join("previous");
        fs::write(&path, "old\n").unwrap();
        fs::hard_link(&path, &link).unwrap();

        write_atomic(&path, b"new\n").unwrap();

        // A new inode takes the place of the old one
        assert_eq!(fs::read_to_string(&path).unwrap(), "new\n");
        assert_eq!(fs::read_to_string(&link).unwrap(), "old\n");
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_write_atomic_needs_parent() {
        assert!(write_atomic(Path::new("/"), b"x").is_err());
    }
}
