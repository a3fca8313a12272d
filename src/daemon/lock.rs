// src/daemon/lock.rs

//! Per-directory exclusive lock for the edenfs daemon
//!
//! Each eden state directory has a `lock` file. The daemon holds an
//! exclusive `flock` on it for its entire lifetime and records its PID as
//! the file's content, so `eden stop` and `eden status` can find it. The
//! content is cleared on release; a stale PID in an unlocked file is never
//! reported.

use crate::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the lock file inside an eden state directory
pub const LOCK_FILE_NAME: &str = "lock";

/// Exclusive daemon lock
///
/// Held with `flock(LOCK_EX)`; released when the value is dropped or the
/// process exits.
pub struct EdenLock {
    file: File,
    path: PathBuf,
}

impl EdenLock {
    /// Take the lock without blocking and record our PID
    ///
    /// `Ok(None)` means another daemon owns the directory.
    pub fn try_acquire<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // No truncation before locking: the holder's PID must survive a failed attempt
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                let mut lock = Self { file, path };
                lock.write_pid()?;
                info!(pid = std::process::id(), "Locked {}", lock.path.display());
                Ok(Some(lock))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                debug!("{} is locked by another daemon", path.display());
                Ok(None)
            }
            Err(e) => Err(Error::IoError(format!(
                "Failed to try-acquire eden lock {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Whether a daemon holds the lock, probing with a second descriptor
    pub fn is_held<P: AsRef<Path>>(path: P) -> bool {
        let path = path.as_ref();

        let Ok(probe) = File::open(path) else {
            return false;
        };
        if probe.try_lock_exclusive().is_err() {
            return true;
        }
        let _ = probe.unlock();
        false
    }

    /// PID of the process holding the lock
    ///
    /// Returns `None` when the lock is free or the file holds no PID.
    pub fn holder_pid<P: AsRef<Path>>(path: P) -> Option<u32> {
        let path = path.as_ref();
        if !Self::is_held(path) {
            return None;
        }
        fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_pid(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        writeln!(self.file, "{}", std::process::id())?;
        self.file.sync_all()?;
        Ok(())
    }
}

impl Drop for EdenLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        // flock is released when the descriptor closes
        debug!("Unlocked {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_release() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join(LOCK_FILE_NAME);

        let lock = EdenLock::try_acquire(&lock_path).unwrap();
        assert!(lock.is_some());
        assert!(lock_path.exists());
        assert!(EdenLock::is_held(&lock_path));

        drop(lock);
        assert!(!EdenLock::is_held(&lock_path));
    }

    #[test]
    fn test_second_daemon_is_refused() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join(LOCK_FILE_NAME);

        let _lock1 = EdenLock::try_acquire(&lock_path).unwrap().unwrap();

        let lock2 = EdenLock::try_acquire(&lock_path).unwrap();
        assert!(lock2.is_none());

        // The failed attempt must not clobber the recorded PID
        assert_eq!(EdenLock::holder_pid(&lock_path), Some(std::process::id()));
    }

    #[test]
    fn test_is_held_when_no_file() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("nonexistent");

        assert!(!EdenLock::is_held(&lock_path));
        assert!(EdenLock::holder_pid(&lock_path).is_none());
    }

    #[test]
    fn test_holder_pid_cleared_on_drop() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join(LOCK_FILE_NAME);

        let lock = EdenLock::try_acquire(&lock_path).unwrap().unwrap();
        assert_eq!(EdenLock::holder_pid(&lock_path), Some(std::process::id()));

        drop(lock);
        assert!(EdenLock::holder_pid(&lock_path).is_none());
    }

    #[test]
    fn test_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("subdir/deep").join(LOCK_FILE_NAME);

        let lock = EdenLock::try_acquire(&lock_path).unwrap().unwrap();
        assert!(lock.path().exists());
        assert!(lock_path.parent().unwrap().exists());
    }
}
