// src/layout/builder.rs
//! Package layout builder
//!
//! Builds a layout directory from a package definition and a source
//! directory. Paths in the definition (chart directories, values files,
//! manifests, files) are relative to the source directory.

use super::archive;
use super::checksums::{CHECKSUMS_FILE, ChecksumIndex};
use super::image::IMAGES_DIR;
use super::{
    COMPONENTS_DIR, ComponentDir, LayoutOptions, PackageLayout, SBOM_ARCHIVE, SBOM_COMPARE_PAGE,
    component_archive_path,
};
use crate::config::host_architecture;
use crate::error::{Error, Result};
use crate::images::ImageScanner;
use crate::package::{BuildData, Component, DEFINITION_FILE, Package};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Source directory holding SBOM documents
const SBOM_SOURCE_DIR: &str = "sbom";

/// Placeholder viewer written when the SBOM source has none
const COMPARE_PAGE: &str = "<!DOCTYPE html>\n<html><head><title>SBOM comparison</title></head>\
<body><p>Open the SBOM documents in this directory to compare packages.</p></body></html>\n";

/// Builds a package layout from a source directory
pub struct PackageBuilder {
    package: Package,
    source_dir: PathBuf,
    architecture: Option<String>,
    build_data: Option<BuildData>,
}

impl PackageBuilder {
    /// Create a builder for `package` with sources under `source_dir`
    pub fn new(package: Package, source_dir: &Path) -> Self {
        Self {
            package,
            source_dir: source_dir.to_path_buf(),
            architecture: None,
            build_data: None,
        }
    }

    /// Create a builder from the `bundle.toml` in `source_dir`
    pub fn from_source_dir(source_dir: &Path) -> Result<Self> {
        let package = Package::from_file(&source_dir.join(DEFINITION_FILE))?;
        Ok(Self::new(package, source_dir))
    }

    /// Architecture to stamp (default: the definition's, then the host's)
    pub fn with_architecture(mut self, architecture: &str) -> Self {
        self.architecture = Some(architecture.to_string());
        self
    }

    /// Use fixed build provenance instead of the current user and time
    pub fn with_build_data(mut self, build: BuildData) -> Self {
        self.build_data = Some(build);
        self
    }

    /// Build the layout into `output_dir`, which must be empty or absent
    pub fn build(self, output_dir: &Path) -> Result<PackageLayout> {
        if output_dir.as_os_str().is_empty() {
            return Err(Error::Validation("path must be specified".to_string()));
        }
        if output_dir.exists() && fs::read_dir(output_dir)?.next().is_some() {
            return Err(Error::Validation(format!(
                "output directory {} is not empty",
                output_dir.display()
            )));
        }
        self.package.validate()?;

        let mut package = self.package.clone();
        info!(
            "Building package {} {} from {}",
            package.metadata.name,
            package.metadata.version,
            self.source_dir.display()
        );

        fs::create_dir_all(output_dir.join(COMPONENTS_DIR))?;
        for component in &package.components {
            self.write_component(component, output_dir)?;
        }
        self.write_sboms(output_dir)?;
        self.copy_images(output_dir)?;

        let index = ChecksumIndex::from_dir(output_dir)?;
        fs::write(output_dir.join(CHECKSUMS_FILE), index.render())?;

        package.metadata.architecture = Some(
            self.architecture
                .clone()
                .or_else(|| package.metadata.architecture.clone())
                .unwrap_or_else(host_architecture),
        );
        package.metadata.aggregate_checksum = Some(index.aggregate());
        package.build = self.build_data.clone().unwrap_or_else(current_build_data);
        package.build.version = env!("CARGO_PKG_VERSION").to_string();
        package.build.signed = false;
        fs::write(output_dir.join(DEFINITION_FILE), package.to_toml()?)?;

        info!(
            "Built {} ({} components, {} indexed files)",
            package.identity(),
            package.components.len(),
            index.len()
        );
        PackageLayout::load_from_dir(output_dir, &LayoutOptions::default())
    }

    /// Stage a component's content and write its archive
    fn write_component(&self, component: &Component, output_dir: &Path) -> Result<()> {
        let staging = tempfile::Builder::new()
            .prefix("airlift-component-")
            .tempdir()?;
        let stage = staging.path();

        for chart in &component.charts {
            let local_path = chart.local_path.as_deref().ok_or_else(|| {
                Error::Validation(format!(
                    "chart {} in component {} has no local path",
                    chart.name, component.name
                ))
            })?;
            copy_tree(
                &self.source_path(local_path)?,
                &stage.join(ComponentDir::Charts.as_str()).join(&chart.name),
            )?;
            for (i, values) in chart.values_files.iter().enumerate() {
                copy_file(
                    &self.source_path(values)?,
                    &stage
                        .join(ComponentDir::Values.as_str())
                        .join(format!("{}-{}.yaml", chart.name, i)),
                )?;
            }
        }

        let scanner = ImageScanner::new();
        let listed: BTreeSet<&str> = component.images.iter().map(String::as_str).collect();
        for set in &component.manifests {
            for (i, file) in set.files.iter().enumerate() {
                let source = self.source_path(file)?;
                let text = fs::read_to_string(&source)?;
                match scanner.scan_yaml(&text) {
                    Ok(found) => {
                        let unlisted = found
                            .confident
                            .iter()
                            .filter(|image| !listed.contains(image.as_str()));
                        for image in unlisted {
                            warn!(
                                "Component {} manifest {} uses image {} which is not listed",
                                component.name, file, image
                            );
                        }
                    }
                    Err(e) => debug!("Could not scan {} for images: {}", file, e),
                }
                let dest = stage
                    .join(ComponentDir::Manifests.as_str())
                    .join(format!("{}-{}.yaml", set.name, i));
                copy_file(&source, &dest)?;
            }
        }

        for (i, file) in component.files.iter().enumerate() {
            let source = self.source_path(&file.source)?;
            let name = source.file_name().ok_or_else(|| {
                Error::Validation(format!("file source {} has no file name", file.source))
            })?;
            let dest = stage
                .join(ComponentDir::Files.as_str())
                .join(i.to_string())
                .join(name);
            if source.is_dir() {
                copy_tree(&source, &dest)?;
            } else {
                copy_file(&source, &dest)?;
            }
        }

        for repo in &component.repos {
            warn!(
                "Component {}: skipping repository {}, git mirroring is not bundled",
                component.name, repo
            );
        }

        let archive_path = output_dir.join(component_archive_path(&component.name));
        archive::create_tar(stage, &archive_path)?;
        debug!("Wrote component {}", component.name);
        Ok(())
    }

    /// Archive the `sbom/` source directory, adding the viewer if absent
    fn write_sboms(&self, output_dir: &Path) -> Result<()> {
        let source = self.source_dir.join(SBOM_SOURCE_DIR);
        if !source.is_dir() {
            debug!("No SBOM directory in {}", self.source_dir.display());
            return Ok(());
        }
        let staging = tempfile::Builder::new().prefix("airlift-sbom-").tempdir()?;
        copy_tree(&source, staging.path())?;
        let compare = staging.path().join(SBOM_COMPARE_PAGE);
        if !compare.is_file() {
            fs::write(&compare, COMPARE_PAGE)?;
        }
        archive::create_tar(staging.path(), &output_dir.join(SBOM_ARCHIVE))
    }

    /// Copy a pre-populated OCI image layout from the source directory
    fn copy_images(&self, output_dir: &Path) -> Result<()> {
        let source = self.source_dir.join(IMAGES_DIR);
        if !source.join("index.json").is_file() {
            return Ok(());
        }
        copy_tree(&source, &output_dir.join(IMAGES_DIR))?;
        info!("Bundled image layout from {}", source.display());
        Ok(())
    }

    /// Resolve a definition path against the source directory
    fn source_path(&self, relative: &str) -> Result<PathBuf> {
        let path = self.source_dir.join(relative);
        if !path.exists() {
            return Err(Error::NotFound(format!("source {}", path.display())));
        }
        Ok(path)
    }
}

fn current_build_data() -> BuildData {
    BuildData {
        user: std::env::var("USER").unwrap_or_default(),
        terminal: std::env::var("HOSTNAME").unwrap_or_default(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        ..Default::default()
    }
}

fn copy_file(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, dest)?;
    Ok(())
}

/// Recursively copy a directory, following no symlinks
fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io(std::io::Error::other(e)))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| Error::Parse(e.to_string()))?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            copy_file(entry.path(), &target)?;
        } else {
            warn!("Skipping non-regular file {}", entry.path().display());
        }
    }
    Ok(())
}
