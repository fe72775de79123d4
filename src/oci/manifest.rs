// src/oci/manifest.rs
//! OCI manifest, index and descriptor types
//!
//! Annotations are kept in `BTreeMap`s and fields serialize in declaration
//! order, so identical inputs always produce byte-identical JSON and therefore
//! identical digests.

use crate::error::{Error, Result};
use crate::hash;
use crate::package::Metadata;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// OCI image index media type
pub const INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";

/// OCI image manifest media type
pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// Docker manifest list media type, accepted when reading bundled images
pub const DOCKER_LIST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.list.v2+json";

/// Package config blob media type
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.airlift.config.v1+json";

/// Package layer media type (one per layout file)
pub const LAYER_MEDIA_TYPE: &str = "application/vnd.airlift.layer.v1.blob";

pub const ANNOTATION_TITLE: &str = "org.opencontainers.image.title";
pub const ANNOTATION_DESCRIPTION: &str = "org.opencontainers.image.description";
pub const ANNOTATION_URL: &str = "org.opencontainers.image.url";
pub const ANNOTATION_AUTHORS: &str = "org.opencontainers.image.authors";
pub const ANNOTATION_DOCUMENTATION: &str = "org.opencontainers.image.documentation";
pub const ANNOTATION_SOURCE: &str = "org.opencontainers.image.source";
pub const ANNOTATION_VENDOR: &str = "org.opencontainers.image.vendor";
pub const ANNOTATION_BASE_NAME: &str = "org.opencontainers.image.base.name";

/// Platform of an index entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
}

/// Content descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Descriptor {
    /// Describe a byte slice
    pub fn for_bytes(media_type: &str, data: &[u8]) -> Self {
        Self {
            media_type: media_type.to_string(),
            digest: hash::oci_digest(data),
            size: data.len() as u64,
            platform: None,
            annotations: BTreeMap::new(),
        }
    }

    /// Describe a file on disk without loading it
    pub fn for_file(media_type: &str, path: &Path) -> Result<Self> {
        let digest = format!("{}{}", hash::SHA256_PREFIX, hash::sha256_file(path)?);
        Ok(Self {
            media_type: media_type.to_string(),
            digest,
            size: std::fs::metadata(path)?.len(),
            platform: None,
            annotations: BTreeMap::new(),
        })
    }

    /// Attach a title annotation
    pub fn with_title(mut self, title: &str) -> Self {
        self.annotations
            .insert(ANNOTATION_TITLE.to_string(), title.to_string());
        self
    }

    /// Title annotation, the layout-relative path for package layers
    pub fn title(&self) -> Option<&str> {
        self.annotations.get(ANNOTATION_TITLE).map(String::as_str)
    }

    /// Architecture of an index entry
    pub fn architecture(&self) -> Option<&str> {
        self.platform.as_ref().map(|p| p.architecture.as_str())
    }
}

/// OCI image manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ImageManifest {
    pub fn new(config: Descriptor, layers: Vec<Descriptor>, annotations: BTreeMap<String, String>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(MANIFEST_MEDIA_TYPE.to_string()),
            config,
            layers,
            annotations,
        }
    }

    /// Layer with the given title
    pub fn layer(&self, title: &str) -> Option<&Descriptor> {
        self.layers.iter().find(|l| l.title() == Some(title))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| Error::Parse(format!("image manifest: {}", e)))
    }
}

/// OCI image index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ImageIndex {
    pub fn new(manifests: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(INDEX_MEDIA_TYPE.to_string()),
            manifests,
            annotations: BTreeMap::new(),
        }
    }

    /// Replace the entry for `entry`'s architecture and keep entries sorted
    pub fn upsert_platform(&mut self, entry: Descriptor) {
        let arch = entry.architecture().map(str::to_string);
        self.manifests.retain(|m| m.architecture().map(str::to_string) != arch);
        self.manifests.push(entry);
        self.manifests
            .sort_by(|a, b| a.architecture().cmp(&b.architecture()));
    }

    /// Entry for an architecture
    pub fn for_architecture(&self, arch: &str) -> Option<&Descriptor> {
        self.manifests.iter().find(|m| m.architecture() == Some(arch))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| Error::Parse(format!("image index: {}", e)))
    }
}

/// Config blob of a package manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageConfig {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Whether a manifest media type denotes an index
pub fn is_index_media_type(media_type: &str) -> bool {
    media_type == INDEX_MEDIA_TYPE || media_type == DOCKER_LIST_MEDIA_TYPE
}

/// Read the top-level `mediaType` of a manifest or index document
pub fn sniff_media_type(data: &[u8]) -> Option<String> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Head {
        media_type: Option<String>,
        manifests: Option<serde_json::Value>,
    }

    let head: Head = serde_json::from_slice(data).ok()?;
    match head.media_type {
        Some(media_type) => Some(media_type),
        None if head.manifests.is_some() => Some(INDEX_MEDIA_TYPE.to_string()),
        None => Some(MANIFEST_MEDIA_TYPE.to_string()),
    }
}

/// OCI annotations for a package manifest
///
/// Well-known keys are derived from metadata; explicit metadata annotations
/// override them and any other keys pass through unchanged.
pub fn annotations_from_metadata(metadata: &Metadata) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    annotations.insert(ANNOTATION_TITLE.to_string(), metadata.name.clone());

    let derived = [
        (ANNOTATION_DESCRIPTION, &metadata.description),
        (ANNOTATION_URL, &metadata.url),
        (ANNOTATION_AUTHORS, &metadata.authors),
        (ANNOTATION_DOCUMENTATION, &metadata.documentation),
        (ANNOTATION_SOURCE, &metadata.source),
        (ANNOTATION_VENDOR, &metadata.vendor),
    ];
    for (key, value) in derived {
        if let Some(value) = value
            && !value.is_empty()
        {
            annotations.insert(key.to_string(), value.clone());
        }
    }

    for (key, value) in &metadata.annotations {
        annotations.insert(key.clone(), value.clone());
    }
    annotations
}
