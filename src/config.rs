// src/config.rs
//! Runtime configuration
//!
//! Loaded from `airlift.toml` (explicit path, or the current directory) and
//! then overlaid with `AIRLIFT_*` environment variables. Every field has a
//! serde default so a partial file is valid.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default configuration file name
pub const CONFIG_FILE: &str = "airlift.toml";

/// Architecture label used for architecture-independent skeleton packages
pub const SKELETON_ARCH: &str = "skeleton";

/// airlift configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Parallel blob transfers during push, pull and copy
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Talk to registries over plain HTTP
    #[serde(default)]
    pub plain_http: bool,

    /// Default package architecture
    #[serde(default = "host_architecture")]
    pub architecture: String,

    /// Directory backing the deployment ledger when no cluster API is wired in
    #[serde(default = "default_ledger_dir")]
    pub ledger_dir: PathBuf,

    /// Per-chart uninstall timeout in seconds
    #[serde(default = "default_chart_timeout")]
    pub chart_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            plain_http: false,
            architecture: host_architecture(),
            ledger_dir: default_ledger_dir(),
            chart_timeout_secs: default_chart_timeout(),
        }
    }
}

impl Config {
    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, then apply environment overrides
    ///
    /// With no explicit path, `airlift.toml` in the current directory is used
    /// when present; otherwise defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                debug!("Loading configuration from {}", path.display());
                Self::parse(&std::fs::read_to_string(path)?)?
            }
            None if Path::new(CONFIG_FILE).is_file() => {
                debug!("Loading configuration from ./{}", CONFIG_FILE);
                Self::parse(&std::fs::read_to_string(CONFIG_FILE)?)?
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `AIRLIFT_*` variables read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("AIRLIFT_CONCURRENCY") {
            self.concurrency = value
                .parse()
                .map_err(|_| Error::Validation(format!("AIRLIFT_CONCURRENCY: invalid number '{}'", value)))?;
        }
        if let Some(value) = lookup("AIRLIFT_PLAIN_HTTP") {
            self.plain_http = matches!(value.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(value) = lookup("AIRLIFT_ARCHITECTURE") {
            self.architecture = value;
        }
        if let Some(value) = lookup("AIRLIFT_LEDGER_DIR") {
            self.ledger_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("AIRLIFT_CHART_TIMEOUT") {
            self.chart_timeout_secs = value
                .parse()
                .map_err(|_| Error::Validation(format!("AIRLIFT_CHART_TIMEOUT: invalid number '{}'", value)))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::Validation("concurrency must be at least 1".to_string()));
        }
        if self.architecture.is_empty() {
            return Err(Error::Validation("architecture must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Map the host CPU to the architecture names used in package metadata
pub fn host_architecture() -> String {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "arm" => "arm",
        "s390x" => "s390x",
        "powerpc64" => "ppc64le",
        other => other,
    }
    .to_string()
}

fn default_concurrency() -> usize {
    3
}

fn default_ledger_dir() -> PathBuf {
    PathBuf::from("/var/lib/airlift/ledger")
}

fn default_chart_timeout() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.concurrency, 3);
        assert!(!config.plain_http);
        assert_eq!(config.chart_timeout_secs, 300);
        assert!(!config.architecture.is_empty());
    }

    #[test]
    fn test_partial_file() {
        let config = Config::parse("plain_http = true\narchitecture = \"arm64\"\n").unwrap();
        assert!(config.plain_http);
        assert_eq!(config.architecture, "arm64");
        assert_eq!(config.concurrency, 3);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(Config::parse("concurrency = 0\n").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("AIRLIFT_CONCURRENCY", "8"),
            ("AIRLIFT_PLAIN_HTTP", "true"),
            ("AIRLIFT_LEDGER_DIR", "/tmp/ledger"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.concurrency, 8);
        assert!(config.plain_http);
        assert_eq!(config.ledger_dir, PathBuf::from("/tmp/ledger"));
    }

    #[test]
    fn test_env_bad_number() {
        let mut config = Config::default();
        let result = config.apply_env(|key| (key == "AIRLIFT_CONCURRENCY").then(|| "many".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "chart_timeout_secs = 42\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.chart_timeout_secs, 42);
    }
}
