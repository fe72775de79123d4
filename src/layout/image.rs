// src/layout/image.rs
//! Bundled OCI image layout (`images/`)
//!
//! Images mirrored into a package are stored as a standard OCI image layout.
//! Each top-level `index.json` entry carries the original reference in the
//! `org.opencontainers.image.base.name` annotation.

use crate::error::{Error, Result};
use crate::hash;
use crate::oci::Reference;
use crate::oci::manifest::{ANNOTATION_BASE_NAME, ImageIndex, ImageManifest};
use std::fs;
use std::path::{Path, PathBuf};

/// Image layout directory inside a package layout
pub const IMAGES_DIR: &str = "images";

/// A bundled image resolved from the image layout
#[derive(Debug, Clone)]
pub struct ImageHandle {
    pub reference: String,
    pub digest: String,
    pub media_type: String,
    pub manifest: Vec<u8>,
    blobs_dir: PathBuf,
}

impl ImageHandle {
    /// Path of a blob in the layout, by digest
    pub fn blob_path(&self, digest: &str) -> Result<PathBuf> {
        let hex = hash::digest_hex(digest)
            .ok_or_else(|| Error::InvalidReference(format!("unsupported digest {}", digest)))?;
        Ok(self.blobs_dir.join(hex))
    }

    /// Parsed manifest (not valid for multi-platform images)
    pub fn image_manifest(&self) -> Result<ImageManifest> {
        ImageManifest::from_bytes(&self.manifest)
    }
}

fn read_index(images_dir: &Path) -> Result<ImageIndex> {
    let path = images_dir.join("index.json");
    if !path.is_file() {
        return Err(Error::NotFound("bundled image index".to_string()));
    }
    ImageIndex::from_bytes(&fs::read(path)?)
}

/// Canonical spelling used to compare references; a bare name means `latest`
fn normalize(reference: &str) -> String {
    Reference::parse_image(reference)
        .map(|r| r.to_string())
        .unwrap_or_else(|_| reference.to_string())
}

pub(super) fn list_images(images_dir: &Path) -> Result<Vec<String>> {
    let index = read_index(images_dir)?;
    let mut images: Vec<String> = index
        .manifests
        .iter()
        .filter_map(|m| m.annotations.get(ANNOTATION_BASE_NAME).cloned())
        .collect();
    images.sort();
    images.dedup();
    Ok(images)
}

pub(super) fn find_image(images_dir: &Path, reference: &str) -> Result<ImageHandle> {
    let index = read_index(images_dir)?;
    let wanted = normalize(reference);

    let descriptor = index
        .manifests
        .iter()
        .find(|m| {
            m.annotations
                .get(ANNOTATION_BASE_NAME)
                .is_some_and(|name| name == reference || normalize(name) == wanted)
        })
        .ok_or_else(|| Error::NotFound(format!("image {} in package", reference)))?;

    let blobs_dir = images_dir.join("blobs").join("sha256");
    let hex = hash::digest_hex(&descriptor.digest).ok_or_else(|| {
        Error::InvalidReference(format!("unsupported digest {}", descriptor.digest))
    })?;
    let manifest = fs::read(blobs_dir.join(hex))?;
    hash::verify_sha256(&manifest, &descriptor.digest).map_err(|e| Error::ChecksumMismatch {
        path: format!("{}/blobs/sha256/{}", IMAGES_DIR, hex),
        expected: e.expected,
        actual: e.actual,
    })?;

    Ok(ImageHandle {
        reference: reference.to_string(),
        digest: descriptor.digest.clone(),
        media_type: descriptor.media_type.clone(),
        manifest,
        blobs_dir,
    })
}
