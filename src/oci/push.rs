// src/oci/push.rs
//! Publishing a layout to a registry

use super::manifest::{
    CONFIG_MEDIA_TYPE, Descriptor, ImageIndex, ImageManifest, LAYER_MEDIA_TYPE, MANIFEST_MEDIA_TYPE,
    PackageConfig, Platform, annotations_from_metadata,
};
use super::{Distributor, RawManifest, Reference, reference_from_metadata};
use crate::config::SKELETON_ARCH;
use crate::error::{Error, Result};
use crate::layout::PackageLayout;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// OS recorded on package platforms; packages are not OS-specific
const PACKAGE_OS: &str = "multi";

/// Where a blob's bytes come from at upload time
enum BlobSource {
    Bytes(Vec<u8>),
    File(PathBuf),
}

/// Options for publishing
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Overrides the architecture recorded in the package metadata
    pub architecture: Option<String>,
}

/// What a publish produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishResult {
    /// Tagged root reference
    pub reference: Reference,
    /// Digest of the root index
    pub root_digest: String,
    /// Digest of this architecture's manifest
    pub manifest_digest: String,
}

impl Distributor {
    /// Publish a layout to `<location>/<name>:<version>`
    pub async fn publish(
        &self,
        layout: &PackageLayout,
        location: &str,
        options: &PublishOptions,
        cancel: &CancellationToken,
    ) -> Result<PublishResult> {
        if location.trim().is_empty() {
            return Err(Error::Validation("invalid registry".to_string()));
        }
        let reference = reference_from_metadata(location, &layout.package)?;
        self.push(layout, &reference, options, cancel).await
    }

    /// Publish a layout as the architecture-independent skeleton
    pub async fn publish_skeleton(
        &self,
        layout: &PackageLayout,
        location: &str,
        cancel: &CancellationToken,
    ) -> Result<PublishResult> {
        let options = PublishOptions {
            architecture: Some(SKELETON_ARCH.to_string()),
        };
        self.publish(layout, location, &options, cancel).await
    }

    /// Push a layout to an explicit tagged reference
    pub async fn push(
        &self,
        layout: &PackageLayout,
        reference: &Reference,
        options: &PublishOptions,
        cancel: &CancellationToken,
    ) -> Result<PublishResult> {
        let Some(tag) = reference.tag.clone() else {
            return Err(Error::InvalidReference(format!(
                "{} needs a tag to publish to",
                reference
            )));
        };
        let architecture = options
            .architecture
            .clone()
            .or_else(|| layout.package.metadata.architecture.clone())
            .ok_or_else(|| {
                Error::Validation(format!(
                    "package {} has no architecture",
                    layout.package.metadata.name
                ))
            })?;

        info!(
            "Publishing {} ({}) to {}",
            layout.package.metadata.name, architecture, reference
        );

        // One layer per layout file; the BTreeMap keeps them sorted by path.
        // Files are hashed here and only read into memory inside the bounded
        // transfer below.
        let mut blobs = Vec::new();
        let mut layers = Vec::new();
        for (relative, path) in layout.files()? {
            let descriptor = Descriptor::for_file(LAYER_MEDIA_TYPE, &path)?.with_title(&relative);
            layers.push(descriptor.clone());
            blobs.push((descriptor, BlobSource::File(path)));
        }

        let annotations = annotations_from_metadata(&layout.package.metadata);
        let config = PackageConfig {
            architecture: architecture.clone(),
            os: PACKAGE_OS.to_string(),
            annotations: annotations.clone(),
        };
        let config_data = serde_json::to_vec(&config)?;
        let config_descriptor = Descriptor::for_bytes(CONFIG_MEDIA_TYPE, &config_data);
        blobs.push((config_descriptor.clone(), BlobSource::Bytes(config_data)));

        let registry = self.registry();
        self.run_bounded(blobs, cancel, |(descriptor, source)| async move {
            if registry.blob_exists(reference, &descriptor.digest).await? {
                debug!("Blob {} already present", descriptor.digest);
                return Ok(());
            }
            let data = match source {
                BlobSource::Bytes(data) => data,
                BlobSource::File(path) => tokio::fs::read(&path).await?,
            };
            registry
                .push_blob(reference, &data, &descriptor.digest)
                .await?;
            debug!(
                "Pushed {} ({} bytes)",
                descriptor.title().unwrap_or("config"),
                descriptor.size
            );
            Ok(())
        })
        .await?;

        let manifest = ImageManifest::new(config_descriptor, layers, annotations);
        let manifest = RawManifest::new(manifest.to_bytes()?)?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        registry
            .push_manifest(&reference.with_digest(&manifest.digest), &manifest)
            .await?;

        // Only a missing root starts a fresh index; any other failure would
        // drop the entries of previously published architectures.
        let mut index = match registry.pull_manifest(reference).await {
            Ok(existing) if existing.is_index() => ImageIndex::from_bytes(&existing.data)?,
            Ok(_) => {
                debug!("Replacing single-manifest root at {}", reference);
                ImageIndex::new(Vec::new())
            }
            Err(Error::NotFound(_)) => {
                debug!("No existing root at {}", reference);
                ImageIndex::new(Vec::new())
            }
            Err(e) => return Err(e),
        };
        index.upsert_platform(Descriptor {
            media_type: MANIFEST_MEDIA_TYPE.to_string(),
            digest: manifest.digest.clone(),
            size: manifest.data.len() as u64,
            platform: Some(Platform {
                architecture,
                os: PACKAGE_OS.to_string(),
            }),
            annotations: Default::default(),
        });

        let root = RawManifest::new(index.to_bytes()?)?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let tagged = reference.with_tag(&tag);
        registry.push_manifest(&tagged, &root).await?;

        info!("Published {} ({})", tagged, root.digest);
        Ok(PublishResult {
            reference: tagged,
            root_digest: root.digest,
            manifest_digest: manifest.digest,
        })
    }
}
