// src/layout/archive.rs
//! Deterministic tar helpers
//!
//! Component archives, the SBOM archive and the package archive are all
//! written with sorted entries, zeroed ownership and a fixed mtime so the
//! same tree always produces the same bytes.

use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use tar::{Archive, Builder, EntryType, Header};
use tracing::debug;
use walkdir::WalkDir;

/// zstd level for package archives
const COMPRESSION_LEVEL: i32 = 19;

/// Fixed entry mtime (2024-01-01 00:00:00 UTC)
const NORMALIZED_MTIME: u64 = 1704067200;

/// Append every entry under `dir` to `builder`, sorted, with normalized headers
pub fn append_dir_sorted<W: Write>(builder: &mut Builder<W>, dir: &Path) -> Result<()> {
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io(std::io::Error::other(e)))?;
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| Error::Parse(e.to_string()))?;
        let archive_path = relative_path_string(relative);
        let file_type = entry.file_type();

        let mut header = Header::new_gnu();
        header.set_mtime(NORMALIZED_MTIME);
        header.set_uid(0);
        header.set_gid(0);

        if file_type.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            header.set_cksum();
            builder.append_data(&mut header, &archive_path, std::io::empty())?;
        } else if file_type.is_file() {
            let content = fs::read(entry.path())?;
            header.set_entry_type(EntryType::Regular);
            header.set_mode(file_mode(entry.path())?);
            header.set_size(content.len() as u64);
            header.set_cksum();
            builder.append_data(&mut header, &archive_path, content.as_slice())?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(entry.path())?;
            header.set_entry_type(EntryType::Symlink);
            header.set_mode(0o777);
            header.set_size(0);
            header.set_cksum();
            builder.append_link(&mut header, &archive_path, &target)?;
        }
    }
    Ok(())
}

/// Write an uncompressed tar of `dir` to `dest`
pub fn create_tar(dir: &Path, dest: &Path) -> Result<()> {
    let file = fs::File::create(dest)?;
    let mut builder = Builder::new(file);
    append_dir_sorted(&mut builder, dir)?;
    builder.into_inner()?.sync_all()?;
    debug!("Wrote {}", dest.display());
    Ok(())
}

/// Write a zstd-compressed tar of `dir` to `dest`
pub fn create_tar_zst(dir: &Path, dest: &Path) -> Result<()> {
    let file = fs::File::create(dest)?;
    let encoder = zstd::Encoder::new(file, COMPRESSION_LEVEL)?;
    let mut builder = Builder::new(encoder);
    append_dir_sorted(&mut builder, dir)?;
    let encoder = builder.into_inner()?;
    encoder.finish()?.sync_all()?;
    debug!("Wrote {}", dest.display());
    Ok(())
}

/// Extract an uncompressed tar into `dest`
pub fn unpack_tar(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    let mut archive = Archive::new(fs::File::open(src)?);
    archive.unpack(dest)?;
    Ok(())
}

/// Extract a zstd-compressed tar into `dest`
pub fn unpack_tar_zst(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    let decoder = zstd::Decoder::new(fs::File::open(src)?)?;
    let mut archive = Archive::new(decoder);
    archive.unpack(dest)?;
    Ok(())
}

/// Forward-slash relative path, independent of host separator
pub fn relative_path_string(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
fn file_mode(path: &Path) -> Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(path)?.permissions().mode();
    Ok(if mode & 0o111 != 0 { 0o755 } else { 0o644 })
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> Result<u32> {
    Ok(0o644)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn populate(dir: &Path) {
        fs::create_dir_all(dir.join("b/nested")).unwrap();
        fs::write(dir.join("a.txt"), "alpha").unwrap();
        fs::write(dir.join("b/nested/c.txt"), "gamma").unwrap();
    }

    #[test]
    fn test_same_tree_same_bytes() {
        let temp = TempDir::new().unwrap();
        let first = temp.path().join("first");
        let second = temp.path().join("second");
        populate(&first);
        std::thread::sleep(std::time::Duration::from_millis(20));
        populate(&second);

        let first_tar = temp.path().join("first.tar.zst");
        let second_tar = temp.path().join("second.tar.zst");
        create_tar_zst(&first, &first_tar).unwrap();
        create_tar_zst(&second, &second_tar).unwrap();

        assert_eq!(fs::read(first_tar).unwrap(), fs::read(second_tar).unwrap());
    }

    #[test]
    fn test_unpack_restores_tree() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        populate(&src);

        let tar_path = temp.path().join("out.tar");
        create_tar(&src, &tar_path).unwrap();

        let dest = temp.path().join("dest");
        unpack_tar(&tar_path, &dest).unwrap();
        assert_eq!(fs::read_to_string(dest.join("b/nested/c.txt")).unwrap(), "gamma");
    }

    #[test]
    fn test_relative_path_string() {
        assert_eq!(relative_path_string(Path::new("components/a.tar")), "components/a.tar");
    }
}
