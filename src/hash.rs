// src/hash.rs

//! Digest helpers for checksum indexes and content addressing
//!
//! Everything content-addressed in airlift uses SHA-256. Two spellings are in
//! play: bare lowercase hex (checksum index lines, aggregate checksum) and
//! OCI-style prefixed digests (`sha256:<hex>`) on descriptors and manifests.

use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read};
use std::path::Path;

/// Prefix for OCI digests
pub const SHA256_PREFIX: &str = "sha256:";

/// Compute the SHA-256 of a byte slice as lowercase hex
#[inline]
pub fn sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Compute the OCI digest (`sha256:<hex>`) of a byte slice
#[inline]
pub fn oci_digest(data: &[u8]) -> String {
    format!("{}{}", SHA256_PREFIX, sha256(data))
}

/// Compute the SHA-256 of a reader, streaming
pub fn sha256_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Compute the SHA-256 of a file without loading it into memory
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    sha256_reader(&mut file)
}

/// Split an OCI digest into its hex part, rejecting other algorithms
pub fn digest_hex(digest: &str) -> Option<&str> {
    let hex = digest.strip_prefix(SHA256_PREFIX)?;
    if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(hex)
    } else {
        None
    }
}

/// IEEE CRC32 of a string, used for stable tag suffixes
#[inline]
pub fn crc32(data: &str) -> u32 {
    crc32fast::hash(data.as_bytes())
}

/// Verification result error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyError {
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256 mismatch: expected {}, got {}", self.expected, self.actual)
    }
}

impl std::error::Error for VerifyError {}

/// Verify bytes match an expected SHA-256 (hex, or prefixed OCI digest)
pub fn verify_sha256(data: &[u8], expected: &str) -> Result<(), VerifyError> {
    let expected_hex = expected.strip_prefix(SHA256_PREFIX).unwrap_or(expected);
    let actual = sha256(data);
    if actual == expected_hex.to_lowercase() {
        Ok(())
    } else {
        Err(VerifyError {
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Verify a file matches an expected SHA-256 hex digest
///
/// Streams the file content to avoid loading it entirely into memory.
pub fn verify_file_sha256(path: &Path, expected: &str) -> Result<(), VerifyError> {
    let actual = sha256_file(path).map_err(|_| VerifyError {
        expected: expected.to_string(),
        actual: "<file read error>".to_string(),
    })?;

    if actual == expected.to_lowercase() {
        Ok(())
    } else {
        Err(VerifyError {
            expected: expected.to_string(),
            actual,
        })
    }
}
