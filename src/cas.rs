// src/cas.rs

//! Content-addressed blob store for converted file contents
//!
//! Blobs live at `objects/<first two hex digits>/<rest>` named by their
//! SHA-256, so a file revision shared by several branches or changesets is
//! written once. Reads re-hash the blob and fail on corruption.

use crate::fsutil::write_atomic;
use crate::hash::{self, HashAlgorithm};
use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::trace;

#[derive(Debug, Clone)]
pub struct CasStore {
    objects_dir: PathBuf,
}

impl CasStore {
    /// Open a store, creating `objects_dir` when missing
    pub fn new<P: AsRef<Path>>(objects_dir: P) -> Result<Self> {
        let objects_dir = objects_dir.as_ref().to_path_buf();
        fs::create_dir_all(&objects_dir)?;
        Ok(Self { objects_dir })
    }

    /// Store a blob, returning its hash
    pub fn store(&self, content: &[u8]) -> Result<String> {
        let hash = hash::sha256(content);
        let path = self.blob_path(&hash);
        if path.exists() {
            return Ok(hash);
        }

        let dir = path
            .parent()
            .ok_or_else(|| Error::IoError(format!("bad blob path {}", path.display())))?;
        fs::create_dir_all(dir)?;

        // Readers never see a partial blob
        write_atomic(&path, content)?;

        trace!("Stored blob {} ({} bytes)", hash, content.len());
        Ok(hash)
    }

    /// Read a blob back, checking it still matches its hash
    pub fn retrieve(&self, hash: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(hash);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFoundError(format!("blob {}", hash)));
            }
            Err(e) => return Err(Error::Io(e)),
        };

        hash::verify_bytes(&content, hash, HashAlgorithm::Sha256)
            .map_err(|e| Error::RepositoryError(format!("corrupt blob {}: {}", path.display(), e)))?;
        Ok(content)
    }

    pub fn exists(&self, hash: &str) -> bool {
        self.blob_path(hash).exists()
    }

    /// On-disk location of a blob
    pub fn blob_path(&self, hash: &str) -> PathBuf {
        match hash.get(..2).zip(hash.get(2..)) {
            Some((prefix, rest)) if !rest.is_empty() => self.objects_dir.join(prefix).join(rest),
            _ => self.objects_dir.join(hash),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_store_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let cas = CasStore::new(temp_dir.path().join("objects")).unwrap();

        let hash = cas.store(b"a\n").unwrap();
        assert_eq!(cas.store(b"a\n").unwrap(), hash);
        assert!(cas.exists(&hash));
        assert_eq!(cas.retrieve(&hash).unwrap(), b"a\n");
    }

    #[test]
    fn test_blob_path_layout() {
        let cas = CasStore {
            objects_dir: PathBuf::from("/objects"),
        };
        assert_eq!(cas.blob_path("abcdef"), PathBuf::from("/objects/ab/cdef"));
        assert_eq!(cas.blob_path("ab"), PathBuf::from("/objects/ab"));
    }

    #[test]
    fn test_retrieve_rejects_missing_and_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let cas = CasStore::new(temp_dir.path()).unwrap();

        let hash = cas.store(b"original").unwrap();
        fs::write(cas.blob_path(&hash), b"tampered").unwrap();
        assert!(matches!(cas.retrieve(&hash), Err(Error::RepositoryError(_))));

        let missing = hash::sha256(b"never stored");
        assert!(matches!(cas.retrieve(&missing), Err(Error::NotFoundError(_))));
    }
}
