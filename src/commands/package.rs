// src/commands/package.rs
//! Local package commands: create, sign, keygen, inspect, sbom

use super::{key_password, open_layout};
use airlift::Error;
use airlift::images::{ImageMatches, ImageScanner};
use airlift::layout::{ComponentDir, LayoutOptions, PackageBuilder, PackageLayout};
use airlift::signing::{self, SignatureStatus, SigningKeyPair};
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Build a package archive from a source directory
pub fn cmd_create(
    source_dir: &Path,
    output: &Path,
    architecture: Option<&str>,
    signing_key: Option<&Path>,
) -> Result<()> {
    info!("Creating package from {}", source_dir.display());

    let mut builder = PackageBuilder::from_source_dir(source_dir)
        .with_context(|| format!("Failed to read package definition in {}", source_dir.display()))?;
    if let Some(arch) = architecture {
        builder = builder.with_architecture(arch);
    }

    let scratch = tempfile::Builder::new().prefix("airlift-create-").tempdir()?;
    let mut layout = builder
        .build(&scratch.path().join("layout"))
        .context("Failed to build package layout")?;

    if let Some(key) = signing_key {
        signing::sign_layout(&mut layout, key, key_password().as_deref())
            .context("Failed to sign package")?;
    }

    let path = layout.archive(output)?;
    println!("Created {} ({})", path.display(), layout.package.identity());
    Ok(())
}

/// Sign an existing package archive
pub fn cmd_sign(package: &Path, key: &Path, output: Option<&Path>) -> Result<()> {
    let mut layout = open_layout(package, &LayoutOptions::default())?;
    if layout.is_signed() {
        anyhow::bail!("Package {} is already signed", package.display());
    }

    let signature = signing::sign_layout(&mut layout, key, key_password().as_deref())
        .context("Failed to sign package")?;

    let destination = match output {
        Some(dir) => dir.to_path_buf(),
        None => package
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    let path = layout.archive(&destination)?;
    println!(
        "Signed {} (key id: {})",
        path.display(),
        signature.key_id.as_deref().unwrap_or("none")
    );
    Ok(())
}

/// Generate a key pair as `<name>.key` and `<name>.pub`
pub fn cmd_keygen(output: &Path, name: &str, key_id: Option<&str>, seal: bool) -> Result<()> {
    let password = if seal {
        Some(key_password().with_context(|| {
            format!("--seal needs a password in {}", super::KEY_PASSWORD_ENV)
        })?)
    } else {
        None
    };

    std::fs::create_dir_all(output)?;
    let private_path = output.join(format!("{}.key", name));
    let public_path = output.join(format!("{}.pub", name));
    if private_path.exists() {
        anyhow::bail!("{} already exists", private_path.display());
    }

    let mut keypair = SigningKeyPair::generate();
    if let Some(id) = key_id {
        keypair = keypair.with_key_id(id);
    }
    keypair.save_to_files(&private_path, &public_path, password.as_deref())?;

    println!("Private key: {}", private_path.display());
    println!("Public key:  {}", public_path.display());
    Ok(())
}

/// Print a package definition, or the images it carries
pub fn cmd_inspect(
    package: &Path,
    key: Option<&Path>,
    skip_signature_validation: bool,
    list_images: bool,
) -> Result<()> {
    let options = LayoutOptions {
        public_key_path: key.map(Path::to_path_buf),
        skip_signature_validation,
        ..Default::default()
    };
    let layout = open_layout(package, &options)?;

    if list_images {
        return print_images(&layout);
    }

    match layout.signature_status() {
        SignatureStatus::Unsigned => println!("# unsigned"),
        SignatureStatus::Verified { key_id } => {
            println!("# signature verified (key id: {})", key_id.as_deref().unwrap_or("none"))
        }
        SignatureStatus::Skipped => println!("# signature not checked"),
    }
    print!("{}", layout.package.to_toml()?);
    Ok(())
}

fn print_images(layout: &PackageLayout) -> Result<()> {
    let mut declared: BTreeSet<String> = layout
        .package
        .components
        .iter()
        .flat_map(|c| c.images.iter().cloned())
        .collect();
    declared.extend(layout.images()?);

    let scratch = tempfile::Builder::new().prefix("airlift-inspect-").tempdir()?;
    let scanner = ImageScanner::new();
    let mut found = ImageMatches::default();
    for component in &layout.package.components {
        let dir = match layout.component_dir(scratch.path(), &component.name, ComponentDir::Manifests) {
            Ok(dir) => dir,
            Err(Error::ComponentDirMissing { .. }) => continue,
            Err(e) => return Err(e.into()),
        };
        for entry in WalkDir::new(&dir).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            debug!("Scanning {}", entry.path().display());
            let text = std::fs::read_to_string(entry.path())?;
            found.merge(scanner.scan_yaml(&text)?);
        }
    }

    for image in &declared {
        println!("{}", image);
    }
    for image in found.confident.difference(&declared) {
        println!("{}  # found in manifests", image);
    }
    for image in found.possible.difference(&declared) {
        println!("{}  # possible", image);
    }
    Ok(())
}

/// Extract a package's SBOMs
pub fn cmd_sbom(package: &Path, output: &Path, key: Option<&Path>) -> Result<()> {
    let options = LayoutOptions {
        public_key_path: key.map(Path::to_path_buf),
        ..Default::default()
    };
    let layout = open_layout(package, &options)?;
    let path = layout.sbom(output)?;
    println!("SBOMs extracted to {}", path.display());
    Ok(())
}
