// src/hash.rs

//! Hashing for content addressing, changeset identity and dump verification
//!
//! - **SHA-256**: content-addressed blobs and changeset node ids
//! - **MD5**: `Text-content-md5` checksums carried by Subversion dump streams

use md5::Md5;
use sha2::{Digest, Sha256};
use std::fmt;

/// Hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// SHA-256 (256-bit cryptographic hash)
    #[default]
    Sha256,

    /// MD5 (128-bit), only for verifying checksums recorded by other tools
    Md5,
}

impl HashAlgorithm {
    /// Get the hash output length in bytes
    #[inline]
    pub const fn output_len(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Md5 => 16,
        }
    }

    /// Get the hash output length as a hex string
    #[inline]
    pub const fn hex_len(&self) -> usize {
        self.output_len() * 2
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256 => write!(f, "sha256"),
            Self::Md5 => write!(f, "md5"),
        }
    }
}

/// Incremental hasher over either algorithm
pub enum Hasher {
    Sha256(Sha256),
    Md5(Md5),
}

impl Hasher {
    /// Create a new incremental hasher
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            HashAlgorithm::Md5 => Self::Md5(Md5::new()),
        }
    }

    /// Feed data into the hasher
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Md5(h) => h.update(data),
        }
    }

    /// Feed a length-prefixed field, so adjacent fields cannot run together
    pub fn update_field(&mut self, data: &[u8]) {
        self.update(&(data.len() as u64).to_be_bytes());
        self.update(data);
    }

    /// Finish and return the lowercase hex digest
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Md5(h) => hex::encode(h.finalize()),
        }
    }
}

/// Hash a byte slice with the given algorithm
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> String {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize_hex()
}

/// SHA-256 hex digest of `data`
pub fn sha256(data: &[u8]) -> String {
    hash_bytes(HashAlgorithm::Sha256, data)
}

/// MD5 hex digest of `data`
pub fn md5(data: &[u8]) -> String {
    hash_bytes(HashAlgorithm::Md5, data)
}

/// Checksum mismatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyError {
    pub algorithm: HashAlgorithm,
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} mismatch: expected {}, got {}",
            self.algorithm, self.expected, self.actual
        )
    }
}

impl std::error::Error for VerifyError {}

/// Verify data against an expected hex digest (case-insensitive)
pub fn verify_bytes(data: &[u8], expected: &str, algorithm: HashAlgorithm) -> Result<(), VerifyError> {
    let actual = hash_bytes(algorithm, data);
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(VerifyError {
            algorithm,
            expected: expected.trim().to_string(),
            actual,
        })
    }
}
