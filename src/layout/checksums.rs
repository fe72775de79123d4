// src/layout/checksums.rs
//! The checksum index (checksums.txt)
//!
//! One `<sha256> <relative path>` line per layout file, sorted by path. The
//! definition, its signature and the index itself are not listed. The
//! SHA-256 of the rendered index is the package's aggregate checksum.

use super::archive::relative_path_string;
use crate::error::{Error, Result};
use crate::hash;
use crate::package::DEFINITION_FILE;
use crate::signing::SIGNATURE_FILE;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// File name of the checksum index inside a layout
pub const CHECKSUMS_FILE: &str = "checksums.txt";

/// Files never listed in the index
const UNINDEXED: [&str; 3] = [DEFINITION_FILE, SIGNATURE_FILE, CHECKSUMS_FILE];

/// Sorted map of relative path to SHA-256 hex
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumIndex {
    entries: BTreeMap<String, String>,
}

impl ChecksumIndex {
    /// Hash every indexable file under `dir`
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for entry in WalkDir::new(dir).min_depth(1) {
            let entry = entry.map_err(|e| Error::Io(std::io::Error::other(e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = relative_path_string(
                entry
                    .path()
                    .strip_prefix(dir)
                    .map_err(|e| Error::Parse(e.to_string()))?,
            );
            if UNINDEXED.contains(&relative.as_str()) {
                continue;
            }
            entries.insert(relative, hash::sha256_file(entry.path())?);
        }
        Ok(Self { entries })
    }

    /// Parse the text form
    pub fn parse(content: &str) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let (digest, path) = line.split_once(' ').ok_or_else(|| {
                Error::Parse(format!("{} line {}: expected '<sha256> <path>'", CHECKSUMS_FILE, number + 1))
            })?;
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(Error::Parse(format!(
                    "{} line {}: invalid digest",
                    CHECKSUMS_FILE,
                    number + 1
                )));
            }
            entries.insert(path.to_string(), digest.to_lowercase());
        }
        Ok(Self { entries })
    }

    /// Render the text form
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(path, digest)| format!("{} {}\n", digest, path))
            .collect()
    }

    /// SHA-256 of the rendered index
    pub fn aggregate(&self) -> String {
        hash::sha256(self.render().as_bytes())
    }

    /// Iterate (path, digest) pairs in path order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(p, d)| (p.as_str(), d.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check every listed file under `dir`
    ///
    /// A listed file that is absent is an error unless `may_be_absent`
    /// accepts its path (components filtered out of a partial pull).
    pub fn verify<F>(&self, dir: &Path, may_be_absent: F) -> Result<()>
    where
        F: Fn(&str) -> bool,
    {
        for (path, expected) in &self.entries {
            let full = dir.join(path);
            if !full.is_file() {
                if may_be_absent(path) {
                    debug!("Skipping checksum of filtered file {}", path);
                    continue;
                }
                return Err(Error::NotFound(format!("layout file {}", path)));
            }
            hash::verify_file_sha256(&full, expected).map_err(|e| Error::ChecksumMismatch {
                path: path.clone(),
                expected: e.expected,
                actual: e.actual,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn layout_dir() -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("components")).unwrap();
        fs::write(temp.path().join("components/b.tar"), "bbb").unwrap();
        fs::write(temp.path().join("components/a.tar"), "aaa").unwrap();
        fs::write(temp.path().join(DEFINITION_FILE), "ignored").unwrap();
        temp
    }

    #[test]
    fn test_index_sorted_and_excludes_definition() {
        let temp = layout_dir();
        let index = ChecksumIndex::from_dir(temp.path()).unwrap();
        let paths: Vec<&str> = index.entries().map(|(p, _)| p).collect();
        assert_eq!(paths, ["components/a.tar", "components/b.tar"]);

        let rendered = index.render();
        assert!(rendered.starts_with(&format!("{} components/a.tar\n", hash::sha256(b"aaa"))));
        assert_eq!(ChecksumIndex::parse(&rendered).unwrap(), index);
        assert_eq!(index.aggregate(), hash::sha256(rendered.as_bytes()));
    }

    #[test]
    fn test_verify_detects_tampering() {
        let temp = layout_dir();
        let index = ChecksumIndex::from_dir(temp.path()).unwrap();
        assert!(index.verify(temp.path(), |_| false).is_ok());

        fs::write(temp.path().join("components/a.tar"), "evil").unwrap();
        let err = index.verify(temp.path(), |_| false).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { ref path, .. } if path == "components/a.tar"));
    }

    #[test]
    fn test_verify_missing_files() {
        let temp = layout_dir();
        let index = ChecksumIndex::from_dir(temp.path()).unwrap();
        fs::remove_file(temp.path().join("components/b.tar")).unwrap();

        assert!(index.verify(temp.path(), |_| false).is_err());
        assert!(index.verify(temp.path(), |p| p == "components/b.tar").is_ok());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ChecksumIndex::parse("not-a-line").is_err());
        assert!(ChecksumIndex::parse("xyz path").is_err());
    }
}
