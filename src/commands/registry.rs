// src/commands/registry.rs
//! Registry commands: publish, pull, copy

use super::{Session, open_layout};
use airlift::layout::LayoutOptions;
use airlift::oci::{CopyOptions, PublishOptions, PullOptions, Reference};
use airlift::package::ComponentFilter;
use anyhow::{Context, Result};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Publish a package archive or layout directory
pub async fn cmd_publish(
    session: &Session,
    package: &Path,
    location: &str,
    key: Option<&Path>,
    skeleton: bool,
    architecture: Option<String>,
    cancel: &CancellationToken,
) -> Result<()> {
    let options = LayoutOptions {
        public_key_path: key.map(Path::to_path_buf),
        ..Default::default()
    };
    let layout = open_layout(package, &options)?;
    let distributor = session.distributor();

    let result = if skeleton {
        distributor.publish_skeleton(&layout, location, cancel).await
    } else {
        let options = PublishOptions { architecture };
        distributor.publish(&layout, location, &options, cancel).await
    }
    .with_context(|| format!("Failed to publish {}", layout.package.identity()))?;

    println!("Published {}@{}", result.reference, result.root_digest);
    Ok(())
}

/// Pull a package into a local archive
pub async fn cmd_pull(
    session: &Session,
    reference: &str,
    output: &Path,
    key: Option<&Path>,
    components: Vec<String>,
    architecture: Option<String>,
    cancel: &CancellationToken,
) -> Result<()> {
    let reference = Reference::parse(reference)?;
    let options = PullOptions {
        architecture: Some(architecture.unwrap_or_else(|| session.config.architecture.clone())),
        filter: ComponentFilter::empty().with_requested(components),
        public_key_path: key.map(Path::to_path_buf),
    };

    let scratch = tempfile::Builder::new().prefix("airlift-pull-").tempdir()?;
    let layout = session
        .distributor()
        .pull(&reference, &scratch.path().join("layout"), &options, cancel)
        .await
        .with_context(|| format!("Failed to pull {}", reference))?;

    info!("Pulled {}", layout.package.identity());
    let path = layout.archive(output)?;
    println!("Pulled {} to {}", reference, path.display());
    Ok(())
}

/// Copy a package between repositories of the same name
pub async fn cmd_copy(
    session: &Session,
    source: &str,
    destination: &str,
    architecture: Option<String>,
    cancel: &CancellationToken,
) -> Result<()> {
    let source = Reference::parse(source)?;
    let destination = Reference::parse(destination)?;
    let digest = session
        .distributor()
        .copy(&source, &destination, &CopyOptions { architecture }, cancel)
        .await
        .with_context(|| format!("Failed to copy {} to {}", source, destination))?;

    println!("Copied {} to {}@{}", source, destination, digest);
    Ok(())
}
