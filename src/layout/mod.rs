// src/layout/mod.rs
//! On-disk package layout
//!
//! A layout directory holds:
//! - `bundle.toml` - the package definition
//! - `checksums.txt` - sorted SHA-256 index of every other file
//! - `bundle.toml.sig` - optional detached signature over the definition
//! - `sboms.tar` - optional SBOM archive
//! - `images/` - optional OCI image layout with mirrored images
//! - `components/<name>.tar` - one archive per component
//!
//! Loading validates the signature first and the checksum index second, then
//! applies the component filter. Accessors only see filtered components.

pub mod archive;
mod builder;
mod checksums;
mod image;

pub use builder::PackageBuilder;
pub use checksums::{CHECKSUMS_FILE, ChecksumIndex};
pub use image::{IMAGES_DIR, ImageHandle};

use crate::error::{Error, Result};
use crate::package::{ComponentFilter, DEFINITION_FILE, Package};
use crate::signing::{self, SIGNATURE_FILE, SignatureStatus};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// SBOM archive inside a layout
pub const SBOM_ARCHIVE: &str = "sboms.tar";

/// Directory holding component archives
pub const COMPONENTS_DIR: &str = "components";

/// Prefix of package archive file names
pub const ARCHIVE_PREFIX: &str = "airlift-package";

/// Cross-package SBOM viewer that every SBOM archive carries
pub const SBOM_COMPARE_PAGE: &str = "compare.html";

/// Sub-directories of an expanded component archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentDir {
    Charts,
    Manifests,
    Files,
    Values,
    Repos,
}

impl ComponentDir {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Charts => "charts",
            Self::Manifests => "manifests",
            Self::Files => "files",
            Self::Values => "values",
            Self::Repos => "repos",
        }
    }
}

impl fmt::Display for ComponentDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options applied while loading a layout
#[derive(Debug, Clone, Default)]
pub struct LayoutOptions {
    pub filter: ComponentFilter,
    pub public_key_path: Option<PathBuf>,
    /// Read-only inspection only; never set on paths that deploy or remove
    pub skip_signature_validation: bool,
}

/// A validated package layout
#[derive(Debug)]
pub struct PackageLayout {
    dir: PathBuf,
    /// Definition with the component filter applied
    pub package: Package,
    signature: SignatureStatus,
    _scratch: Option<TempDir>,
}

impl PackageLayout {
    /// Extract a `.tar.zst` package archive to a scratch directory and load it
    pub fn load_from_archive(path: &Path, options: &LayoutOptions) -> Result<Self> {
        if path.as_os_str().is_empty() {
            return Err(Error::Validation("path must be specified".to_string()));
        }
        let scratch = tempfile::Builder::new().prefix("airlift-layout-").tempdir()?;
        archive::unpack_tar_zst(path, scratch.path())?;
        debug!("Extracted {} to {}", path.display(), scratch.path().display());
        let dir = scratch.path().to_path_buf();
        Self::load(dir, Some(scratch), options)
    }

    /// Load a layout directory, or a package archive at any other path
    pub fn open(path: &Path, options: &LayoutOptions) -> Result<Self> {
        if path.is_dir() {
            Self::load_from_dir(path, options)
        } else {
            Self::load_from_archive(path, options)
        }
    }

    /// Load a layout directory in place
    pub fn load_from_dir(dir: &Path, options: &LayoutOptions) -> Result<Self> {
        if dir.as_os_str().is_empty() {
            return Err(Error::Validation("path must be specified".to_string()));
        }
        Self::load(dir.to_path_buf(), None, options)
    }

    fn load(dir: PathBuf, scratch: Option<TempDir>, options: &LayoutOptions) -> Result<Self> {
        let definition_path = dir.join(DEFINITION_FILE);
        if !definition_path.is_file() {
            return Err(Error::NotFound(format!(
                "package definition {}",
                definition_path.display()
            )));
        }
        let definition = fs::read(&definition_path)?;
        let text = std::str::from_utf8(&definition)
            .map_err(|e| Error::Parse(format!("{}: {}", DEFINITION_FILE, e)))?;
        let mut package = Package::parse(text)?;

        let signature = if options.skip_signature_validation {
            warn!("Skipping signature validation for {}", package.metadata.name);
            SignatureStatus::Skipped
        } else {
            let status = signing::verify_definition(
                &dir,
                &definition,
                options.public_key_path.as_deref(),
            )?;
            if status == SignatureStatus::Unsigned && package.build.signed {
                return Err(Error::SignatureInvalid(format!(
                    "definition is marked signed but {} is missing",
                    SIGNATURE_FILE
                )));
            }
            status
        };

        let index = read_checksums(&dir, &package)?;

        let included = options.filter.apply(&package);
        let included_names: HashSet<&str> = included.iter().map(|c| c.name.as_str()).collect();
        let filtered_archives: HashSet<String> = package
            .components
            .iter()
            .filter(|c| !included_names.contains(c.name.as_str()))
            .map(|c| component_archive_path(&c.name))
            .collect();
        index.verify(&dir, |path| filtered_archives.contains(path))?;

        let total = package.components.len();
        package.components = included;
        debug!(
            "Loaded package {} ({} of {} components, {} indexed files)",
            package.metadata.name,
            package.components.len(),
            total,
            index.len()
        );

        Ok(Self {
            dir,
            package,
            signature,
            _scratch: scratch,
        })
    }

    /// Layout root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Result of signature validation at load time
    pub fn signature_status(&self) -> &SignatureStatus {
        &self.signature
    }

    /// Whether a detached signature is present
    pub fn is_signed(&self) -> bool {
        self.dir.join(SIGNATURE_FILE).is_file()
    }

    /// The checksum index as currently on disk
    pub fn checksums(&self) -> Result<ChecksumIndex> {
        ChecksumIndex::parse(&fs::read_to_string(self.dir.join(CHECKSUMS_FILE))?)
    }

    /// Expand a component archive under `base` and return one of its sub-directories
    pub fn component_dir(&self, base: &Path, name: &str, kind: ComponentDir) -> Result<PathBuf> {
        if self.package.component(name).is_none() {
            return Err(Error::ComponentNotFound(name.to_string()));
        }

        let expanded = base.join(name);
        if !expanded.is_dir() {
            let archive_path = self.dir.join(component_archive_path(name));
            if !archive_path.is_file() {
                return Err(Error::ComponentArchiveMissing {
                    name: name.to_string(),
                    path: archive_path,
                });
            }
            archive::unpack_tar(&archive_path, &expanded)?;
            debug!("Expanded component {} into {}", name, expanded.display());
        }

        let path = expanded.join(kind.as_str());
        if !path.is_dir() {
            return Err(Error::ComponentDirMissing {
                name: name.to_string(),
                kind: kind.to_string(),
            });
        }
        Ok(path)
    }

    /// Look up a bundled image by reference
    pub fn image(&self, reference: &str) -> Result<ImageHandle> {
        image::find_image(&self.dir.join(IMAGES_DIR), reference)
    }

    /// References of every bundled image
    pub fn images(&self) -> Result<Vec<String>> {
        let dir = self.dir.join(IMAGES_DIR);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        image::list_images(&dir)
    }

    /// Extract the SBOM archive into `<destination>/<package name>`
    ///
    /// Several packages can share one destination without overwriting each
    /// other's files. Returns the package's SBOM directory.
    pub fn sbom(&self, destination: &Path) -> Result<PathBuf> {
        let name = &self.package.metadata.name;
        let sbom_path = self.dir.join(SBOM_ARCHIVE);
        if !sbom_path.is_file() {
            return Err(Error::NotFound(format!("SBOMs for package {}", name)));
        }
        let target = destination.join(name);
        archive::unpack_tar(&sbom_path, &target)?;
        if !target.join(SBOM_COMPARE_PAGE).is_file() {
            return Err(Error::NotFound(format!(
                "{} in the SBOMs of package {}",
                SBOM_COMPARE_PAGE, name
            )));
        }
        info!("Extracted SBOMs to {}", target.display());
        Ok(target)
    }

    /// Every file in the layout, keyed by forward-slash relative path
    pub fn files(&self) -> Result<BTreeMap<String, PathBuf>> {
        let mut files = BTreeMap::new();
        for entry in WalkDir::new(&self.dir).min_depth(1) {
            let entry = entry.map_err(|e| Error::Io(std::io::Error::other(e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.dir)
                .map_err(|e| Error::Parse(e.to_string()))?;
            files.insert(
                archive::relative_path_string(relative),
                entry.path().to_path_buf(),
            );
        }
        Ok(files)
    }

    /// File name used by `archive`
    pub fn archive_name(&self) -> String {
        let metadata = &self.package.metadata;
        let arch = metadata.architecture.as_deref().unwrap_or("unknown");
        if metadata.version.is_empty() {
            format!("{}-{}-{}.tar.zst", ARCHIVE_PREFIX, metadata.name, arch)
        } else {
            format!(
                "{}-{}-{}-{}.tar.zst",
                ARCHIVE_PREFIX, metadata.name, arch, metadata.version
            )
        }
    }

    /// Write the layout as a deterministic `.tar.zst` into `destination_dir`
    pub fn archive(&self, destination_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(destination_dir)?;
        let path = destination_dir.join(self.archive_name());
        archive::create_tar_zst(&self.dir, &path)?;
        info!("Wrote package archive {}", path.display());
        Ok(path)
    }
}

/// Relative path of a component archive inside a layout
pub fn component_archive_path(name: &str) -> String {
    format!("{}/{}.tar", COMPONENTS_DIR, name)
}

fn read_checksums(dir: &Path, package: &Package) -> Result<ChecksumIndex> {
    let path = dir.join(CHECKSUMS_FILE);
    if !path.is_file() {
        return Err(Error::NotFound(format!("checksum index {}", path.display())));
    }
    let content = fs::read_to_string(&path)?;
    let Some(expected) = package.metadata.aggregate_checksum.as_deref() else {
        return Err(Error::Validation(format!(
            "package {} has no aggregate checksum",
            package.metadata.name
        )));
    };
    let actual = crate::hash::sha256(content.as_bytes());
    if actual != expected.to_lowercase() {
        return Err(Error::ChecksumMismatch {
            path: CHECKSUMS_FILE.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    ChecksumIndex::parse(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::Component;

    /// Hand-built layout with one component archive and no SBOMs
    fn minimal_layout(dir: &Path) {
        let stage = tempfile::tempdir().unwrap();
        fs::create_dir_all(stage.path().join("manifests")).unwrap();
        fs::write(stage.path().join("manifests/app-0.yaml"), "kind: ConfigMap\n").unwrap();

        fs::create_dir_all(dir.join(COMPONENTS_DIR)).unwrap();
        archive::create_tar(stage.path(), &dir.join(component_archive_path("app"))).unwrap();

        let index = ChecksumIndex::from_dir(dir).unwrap();
        fs::write(dir.join(CHECKSUMS_FILE), index.render()).unwrap();

        let mut package = Package::new("minimal", "0.1.0");
        package.metadata.aggregate_checksum = Some(index.aggregate());
        package.components.push(Component {
            name: "app".to_string(),
            ..Default::default()
        });
        fs::write(dir.join(DEFINITION_FILE), package.to_toml().unwrap()).unwrap();
    }

    #[test]
    fn test_load_and_component_dirs() {
        let temp = tempfile::tempdir().unwrap();
        minimal_layout(temp.path());
        let layout = PackageLayout::load_from_dir(temp.path(), &LayoutOptions::default()).unwrap();
        assert_eq!(layout.signature_status(), &SignatureStatus::Unsigned);

        let base = tempfile::tempdir().unwrap();
        let manifests = layout
            .component_dir(base.path(), "app", ComponentDir::Manifests)
            .unwrap();
        assert!(manifests.join("app-0.yaml").is_file());

        let err = layout
            .component_dir(base.path(), "app", ComponentDir::Files)
            .unwrap_err();
        assert_eq!(err.to_string(), "component app could not access a files directory");

        let err = layout
            .component_dir(base.path(), "does-not-exist", ComponentDir::Files)
            .unwrap_err();
        assert_eq!(err.to_string(), "component does-not-exist does not exist in package");
    }

    #[test]
    fn test_missing_component_archive_is_distinct() {
        let temp = tempfile::tempdir().unwrap();
        minimal_layout(temp.path());
        let layout = PackageLayout::load_from_dir(temp.path(), &LayoutOptions::default()).unwrap();
        fs::remove_file(temp.path().join(component_archive_path("app"))).unwrap();

        let base = tempfile::tempdir().unwrap();
        let err = layout
            .component_dir(base.path(), "app", ComponentDir::Manifests)
            .unwrap_err();
        assert!(matches!(err, Error::ComponentArchiveMissing { ref name, .. } if name == "app"));
    }

    #[test]
    fn test_tampered_index_rejected() {
        let temp = tempfile::tempdir().unwrap();
        minimal_layout(temp.path());
        let mut content = fs::read_to_string(temp.path().join(CHECKSUMS_FILE)).unwrap();
        content.push_str(&format!("{} extra\n", "0".repeat(64)));
        fs::write(temp.path().join(CHECKSUMS_FILE), content).unwrap();

        let err = PackageLayout::load_from_dir(temp.path(), &LayoutOptions::default()).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_missing_sbom() {
        let temp = tempfile::tempdir().unwrap();
        minimal_layout(temp.path());
        let layout = PackageLayout::load_from_dir(temp.path(), &LayoutOptions::default()).unwrap();
        let dest = tempfile::tempdir().unwrap();
        assert!(matches!(layout.sbom(dest.path()), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_empty_path_rejected() {
        let err = PackageLayout::load_from_dir(Path::new(""), &LayoutOptions::default()).unwrap_err();
        assert_eq!(err.to_string(), "path must be specified");
    }

    #[test]
    fn test_archive_roundtrip() {
        let temp = tempfile::tempdir().unwrap();
        minimal_layout(temp.path());
        let layout = PackageLayout::load_from_dir(temp.path(), &LayoutOptions::default()).unwrap();

        let out = tempfile::tempdir().unwrap();
        let path = layout.archive(out.path()).unwrap();
        assert!(
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("airlift-package-minimal-")
        );

        let reloaded = PackageLayout::load_from_archive(&path, &LayoutOptions::default()).unwrap();
        assert_eq!(reloaded.package, layout.package);
        assert_eq!(
            reloaded.files().unwrap().keys().collect::<Vec<_>>(),
            layout.files().unwrap().keys().collect::<Vec<_>>()
        );
    }
}
