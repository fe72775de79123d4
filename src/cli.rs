// src/cli.rs
//! CLI definitions for airlift
//!
//! Command implementations live in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "airlift")]
#[command(version)]
#[command(about = "Package applications for disconnected clusters", long_about = None)]
pub struct Cli {
    /// Configuration file (default: ./airlift.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Talk to registries over plain HTTP
    #[arg(long, global = true)]
    pub plain_http: bool,

    /// Skip TLS certificate verification for registries
    #[arg(long, global = true)]
    pub insecure_skip_tls_verify: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build a package archive from a directory holding bundle.toml
    Create {
        /// Source directory
        #[arg(default_value = ".")]
        source_dir: PathBuf,

        /// Directory to write the package archive into
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Architecture to build for
        #[arg(short, long)]
        architecture: Option<String>,

        /// Private key to sign the package with
        #[arg(long)]
        signing_key: Option<PathBuf>,
    },

    /// Sign an existing package archive
    Sign {
        /// Package archive
        package: PathBuf,

        /// Private key file
        #[arg(short, long)]
        key: PathBuf,

        /// Directory to write the signed archive into (default: next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate a signing key pair
    Keygen {
        /// Directory for the key files
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Base name of the key files (<name>.key, <name>.pub)
        #[arg(short, long, default_value = "airlift")]
        name: String,

        /// Key identifier recorded in signatures
        #[arg(long)]
        key_id: Option<String>,

        /// Seal the private key with the password in AIRLIFT_KEY_PASSWORD
        #[arg(long)]
        seal: bool,
    },

    /// Publish a package to an OCI registry
    Publish {
        /// Package archive or layout directory
        package: PathBuf,

        /// Registry location, e.g. oci://registry.example.com/packages
        location: String,

        /// Public key to verify a signed package with
        #[arg(short, long)]
        key: Option<PathBuf>,

        /// Publish as the architecture-independent skeleton
        #[arg(long)]
        skeleton: bool,

        /// Override the architecture recorded on the registry
        #[arg(short, long, conflicts_with = "skeleton")]
        architecture: Option<String>,
    },

    /// Pull a package from an OCI registry
    Pull {
        /// Package reference, e.g. oci://registry.example.com/packages/demo:1.0.0
        reference: String,

        /// Directory to write the package archive into
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Public key to verify a signed package with
        #[arg(short, long)]
        key: Option<PathBuf>,

        /// Only download these components (comma-separated)
        #[arg(long, value_delimiter = ',')]
        components: Vec<String>,

        /// Architecture to pull
        #[arg(short, long)]
        architecture: Option<String>,
    },

    /// Copy a package between registries without unpacking it
    Copy {
        /// Source reference (tag or digest required)
        source: String,

        /// Destination reference (tag or digest required)
        destination: String,

        /// Fail unless the package is published for this architecture
        #[arg(short, long)]
        architecture: Option<String>,
    },

    /// Show a package definition
    Inspect {
        /// Package archive or layout directory
        package: PathBuf,

        /// Public key to verify a signed package with
        #[arg(short, long)]
        key: Option<PathBuf>,

        /// Do not check the signature
        #[arg(long, conflicts_with = "key")]
        skip_signature_validation: bool,

        /// List bundled and discovered images instead of the definition
        #[arg(long)]
        list_images: bool,
    },

    /// Extract the SBOMs of a package
    Sbom {
        /// Package archive or layout directory
        package: PathBuf,

        /// Destination directory
        #[arg(short, long, default_value = "sbom")]
        output: PathBuf,

        /// Public key to verify a signed package with
        #[arg(short, long)]
        key: Option<PathBuf>,
    },

    /// Remove a deployed package or some of its components
    Remove {
        /// Package archive, layout directory, or deployed package name
        package: String,

        /// Public key to verify a signed package with
        #[arg(short, long)]
        key: Option<PathBuf>,

        /// Only remove these components (comma-separated)
        #[arg(long, value_delimiter = ',')]
        components: Vec<String>,

        /// Helm binary used to uninstall charts
        #[arg(long, default_value = "helm")]
        helm: PathBuf,
    },

    /// List deployed packages recorded in the ledger
    List,
}
