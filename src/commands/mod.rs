// src/commands/mod.rs
//! Command handlers for the airlift CLI

mod package;
mod registry;
mod remove;

pub use package::{cmd_create, cmd_inspect, cmd_keygen, cmd_sbom, cmd_sign};
pub use registry::{cmd_copy, cmd_publish, cmd_pull};
pub use remove::{cmd_list, cmd_remove};

use airlift::config::Config;
use airlift::layout::{LayoutOptions, PackageLayout};
use airlift::oci::{Distributor, RegistryAuth, RemoteOptions, RemoteRegistry};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

/// Environment variable holding the password of a sealed private key
pub const KEY_PASSWORD_ENV: &str = "AIRLIFT_KEY_PASSWORD";

/// Settings shared by every command
pub struct Session {
    pub config: Config,
    pub remote: RemoteOptions,
}

impl Session {
    /// Distributor over the remote registry, with credentials from the environment
    pub fn distributor(&self) -> Distributor {
        let registry = RemoteRegistry::new(&self.remote, RegistryAuth::from_env());
        Distributor::new(Arc::new(registry)).with_concurrency(self.config.concurrency)
    }
}

/// Password for a sealed private key, if one is set
fn key_password() -> Option<String> {
    std::env::var(KEY_PASSWORD_ENV).ok().filter(|p| !p.is_empty())
}

/// Load a package from a layout directory or a `.tar.zst` archive
fn open_layout(path: &Path, options: &LayoutOptions) -> Result<PackageLayout> {
    PackageLayout::open(path, options)
        .with_context(|| format!("Failed to load package {}", path.display()))
}
