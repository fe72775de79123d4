// src/oci/copy.rs
//! Registry-to-registry copy
//!
//! Streams every blob and manifest reachable from the source root through
//! memory and pushes the root bytes unchanged, so the destination digest is
//! the source digest.

use super::manifest::{ImageIndex, ImageManifest};
use super::{Distributor, RawManifest, Reference};
use crate::error::{Error, Result};
use crate::hash;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Options for copying
#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    /// Require the source index to carry this architecture
    pub architecture: Option<String>,
}

/// Check that a copy between two references is well formed
pub fn validate_copy_references(source: &Reference, destination: &Reference) -> Result<()> {
    for reference in [source, destination] {
        if !reference.has_selector() {
            return Err(Error::InvalidReference(format!(
                "{} must carry a tag or digest",
                reference
            )));
        }
    }
    if source.name() != destination.name() {
        return Err(Error::RepositoryNameMismatch);
    }
    Ok(())
}

impl Distributor {
    /// Copy a published package to another registry or repository
    ///
    /// Returns the root digest, identical at source and destination.
    pub async fn copy(
        &self,
        source: &Reference,
        destination: &Reference,
        options: &CopyOptions,
        cancel: &CancellationToken,
    ) -> Result<String> {
        validate_copy_references(source, destination)?;

        let root = self.registry().pull_manifest(source).await?;
        if let Some(digest) = &destination.digest
            && digest != &root.digest
        {
            return Err(Error::InvalidReference(format!(
                "destination digest {} does not match source root {}",
                digest, root.digest
            )));
        }
        info!("Copying {} to {} ({})", source, destination, root.digest);

        let children = if root.is_index() {
            let index = ImageIndex::from_bytes(&root.data)?;
            if let Some(arch) = &options.architecture
                && index.for_architecture(arch).is_none()
            {
                return Err(Error::NotFound(format!(
                    "package {} for architecture {}",
                    source, arch
                )));
            }

            let mut children = Vec::new();
            for entry in &index.manifests {
                let child = self
                    .registry()
                    .pull_manifest(&source.with_digest(&entry.digest))
                    .await?;
                if child.digest != entry.digest {
                    return Err(Error::ChecksumMismatch {
                        path: format!("manifest in {}", source),
                        expected: entry.digest.clone(),
                        actual: child.digest,
                    });
                }
                children.push(child);
            }
            children
        } else {
            vec![root.clone()]
        };

        let mut seen = HashSet::new();
        let mut blobs = Vec::new();
        for child in &children {
            let manifest = ImageManifest::from_bytes(&child.data)?;
            for descriptor in std::iter::once(manifest.config).chain(manifest.layers) {
                if seen.insert(descriptor.digest.clone()) {
                    blobs.push(descriptor);
                }
            }
        }

        let registry = self.registry();
        self.run_bounded(blobs, cancel, |descriptor| async move {
            if registry.blob_exists(destination, &descriptor.digest).await? {
                debug!("Blob {} already at destination", descriptor.digest);
                return Ok(());
            }
            let data = registry
                .pull_blob(source, &descriptor.digest, descriptor.size)
                .await?;
            hash::verify_sha256(&data, &descriptor.digest).map_err(|e| Error::ChecksumMismatch {
                path: descriptor.digest.clone(),
                expected: e.expected,
                actual: e.actual,
            })?;
            registry
                .push_blob(destination, &data, &descriptor.digest)
                .await?;
            debug!("Copied blob {} ({} bytes)", descriptor.digest, descriptor.size);
            Ok(())
        })
        .await?;

        if root.is_index() {
            for child in &children {
                self.push_manifest_checked(&destination.with_digest(&child.digest), child, cancel)
                    .await?;
            }
        }

        let target = match &destination.tag {
            Some(tag) => destination.with_tag(tag),
            None => destination.with_digest(&root.digest),
        };
        self.push_manifest_checked(&target, &root, cancel).await?;

        info!("Copied {} to {}", source, target);
        Ok(root.digest)
    }

    async fn push_manifest_checked(
        &self,
        reference: &Reference,
        manifest: &RawManifest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.registry().push_manifest(reference, manifest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Reference {
        Reference::parse(s).unwrap()
    }

    #[test]
    fn test_copy_requires_selectors() {
        let err = validate_copy_references(
            &parse("registry.local/ns/test"),
            &parse("other.local/ns/test:1.0.0"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid reference"));

        let err = validate_copy_references(
            &parse("registry.local/ns/test:1.0.0"),
            &parse("other.local/ns/test"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid reference"));
    }

    #[test]
    fn test_copy_requires_same_name() {
        let err = validate_copy_references(
            &parse("registry.local/ns/test:1.0.0"),
            &parse("other.local/ns/other:1.0.0"),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "source and destination repositories must have the same name"
        );

        assert!(
            validate_copy_references(
                &parse("registry.local/ns/test:1.0.0"),
                &parse("other.local/mirror/deep/test:1.0.0"),
            )
            .is_ok()
        );
    }
}
