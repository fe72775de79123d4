// src/oci/pull.rs
//! Pulling a published package into a layout directory

use super::manifest::{Descriptor, ImageIndex, ImageManifest};
use super::{Distributor, RawManifest, Reference};
use crate::config::{SKELETON_ARCH, host_architecture};
use crate::error::{Error, Result};
use crate::hash;
use crate::layout::{LayoutOptions, PackageLayout, component_archive_path};
use crate::package::{ComponentFilter, DEFINITION_FILE, Package};
use std::collections::HashSet;
use std::path::{Component as PathComponent, Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Options for pulling
#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// Architecture to select from the index; defaults to the host
    pub architecture: Option<String>,
    /// Components to download; component archives outside it are skipped
    pub filter: ComponentFilter,
    pub public_key_path: Option<PathBuf>,
}

impl Distributor {
    /// Resolve a reference to the manifest for one architecture
    ///
    /// Falls back to the skeleton entry when the index has no entry for the
    /// requested architecture.
    pub async fn resolve(
        &self,
        reference: &Reference,
        architecture: Option<&str>,
    ) -> Result<(RawManifest, ImageManifest)> {
        if !reference.has_selector() {
            return Err(Error::InvalidReference(format!(
                "{} has no tag or digest",
                reference
            )));
        }
        let root = self.registry().pull_manifest(reference).await?;
        if !root.is_index() {
            let manifest = ImageManifest::from_bytes(&root.data)?;
            return Ok((root, manifest));
        }

        let index = ImageIndex::from_bytes(&root.data)?;
        let wanted = architecture.map(str::to_string).unwrap_or_else(host_architecture);
        let entry = index
            .for_architecture(&wanted)
            .or_else(|| index.for_architecture(SKELETON_ARCH))
            .ok_or_else(|| {
                Error::NotFound(format!("package {} for architecture {}", reference, wanted))
            })?;
        debug!(
            "Resolved {} to {} ({})",
            reference,
            entry.digest,
            entry.architecture().unwrap_or("unknown")
        );

        let raw = self
            .registry()
            .pull_manifest(&reference.with_digest(&entry.digest))
            .await?;
        if raw.digest != entry.digest {
            return Err(Error::ChecksumMismatch {
                path: format!("manifest for {}", reference),
                expected: entry.digest.clone(),
                actual: raw.digest,
            });
        }
        let manifest = ImageManifest::from_bytes(&raw.data)?;
        Ok((raw, manifest))
    }

    /// Read only the package definition of a published package
    pub async fn fetch_definition(
        &self,
        reference: &Reference,
        architecture: Option<&str>,
    ) -> Result<Package> {
        let (_, manifest) = self.resolve(reference, architecture).await?;
        let layer = definition_layer(&manifest, reference)?;
        let data = self.fetch_verified(reference, layer).await?;
        parse_definition(&data)
    }

    /// Pull a package into `output_dir` and load it as a validated layout
    pub async fn pull(
        &self,
        reference: &Reference,
        output_dir: &Path,
        options: &PullOptions,
        cancel: &CancellationToken,
    ) -> Result<PackageLayout> {
        if output_dir.as_os_str().is_empty() {
            return Err(Error::Validation("path must be specified".to_string()));
        }
        tokio::fs::create_dir_all(output_dir).await?;

        let (_, manifest) = self.resolve(reference, options.architecture.as_deref()).await?;
        let definition = parse_definition(
            &self
                .fetch_verified(reference, definition_layer(&manifest, reference)?)
                .await?,
        )?;

        let excluded: HashSet<String> = definition
            .components
            .iter()
            .filter(|c| !options.filter.matches(c))
            .map(|c| component_archive_path(&c.name))
            .collect();

        let mut layers = Vec::new();
        for layer in &manifest.layers {
            let title = layer.title().ok_or_else(|| {
                Error::Parse(format!("layer {} in {} has no title", layer.digest, reference))
            })?;
            if excluded.contains(title) {
                debug!("Skipping filtered {}", title);
                continue;
            }
            layers.push((safe_relative_path(title)?, layer.clone()));
        }

        info!(
            "Pulling {} ({} of {} layers)",
            reference,
            layers.len(),
            manifest.layers.len()
        );

        self.run_bounded(layers, cancel, |(relative, layer)| async move {
            let data = self.fetch_verified(reference, &layer).await?;
            let dest = output_dir.join(&relative);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&dest, &data).await?;
            debug!("Wrote {}", relative.display());
            Ok(())
        })
        .await?;

        let layout = PackageLayout::load_from_dir(
            output_dir,
            &LayoutOptions {
                filter: options.filter.clone(),
                public_key_path: options.public_key_path.clone(),
                skip_signature_validation: false,
            },
        )?;
        info!(
            "Pulled {} {} into {}",
            layout.package.metadata.name,
            layout.package.metadata.version,
            output_dir.display()
        );
        Ok(layout)
    }

    /// Download one blob and check it against its descriptor
    async fn fetch_verified(&self, reference: &Reference, layer: &Descriptor) -> Result<Vec<u8>> {
        let data = self
            .registry()
            .pull_blob(reference, &layer.digest, layer.size)
            .await?;
        hash::verify_sha256(&data, &layer.digest).map_err(|e| Error::ChecksumMismatch {
            path: layer.title().unwrap_or(&layer.digest).to_string(),
            expected: e.expected,
            actual: e.actual,
        })?;
        Ok(data)
    }
}

fn definition_layer<'a>(manifest: &'a ImageManifest, reference: &Reference) -> Result<&'a Descriptor> {
    manifest.layer(DEFINITION_FILE).ok_or_else(|| {
        Error::Parse(format!("{} has no {} layer", reference, DEFINITION_FILE))
    })
}

fn parse_definition(data: &[u8]) -> Result<Package> {
    let text = std::str::from_utf8(data)
        .map_err(|e| Error::Parse(format!("{}: {}", DEFINITION_FILE, e)))?;
    Package::parse(text)
}

/// Reject layer titles that would escape the output directory
fn safe_relative_path(title: &str) -> Result<PathBuf> {
    let path = Path::new(title);
    let safe = !title.is_empty()
        && !title.contains('\\')
        && path
            .components()
            .all(|c| matches!(c, PathComponent::Normal(_)));
    if safe {
        Ok(path.to_path_buf())
    } else {
        Err(Error::Validation(format!("unsafe layer title '{}'", title)))
    }
}
