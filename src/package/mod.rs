// src/package/mod.rs
//! Package definition (bundle.toml) parsing and data structures
//!
//! A package is an ordered list of components plus metadata and build
//! provenance. Component order is significant: it is the deploy order, and
//! removal walks it backwards.

mod filter;

pub use filter::ComponentFilter;

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

/// File name of the package definition inside a layout
pub const DEFINITION_FILE: &str = "bundle.toml";

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9\-]*$").expect("static regex"));

/// Kind of package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PackageKind {
    /// Bootstraps the in-cluster registry and other airlift prerequisites
    Init,
    #[default]
    Application,
}

/// Root structure of bundle.toml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    #[serde(default)]
    pub kind: PackageKind,

    pub metadata: Metadata,

    #[serde(default)]
    pub build: BuildData,

    #[serde(default)]
    pub components: Vec<Component>,
}

/// Package metadata
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    #[serde(default)]
    pub version: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub authors: Option<String>,
    pub documentation: Option<String>,
    pub source: Option<String>,
    pub vendor: Option<String>,
    pub architecture: Option<String>,
    /// SHA-256 of checksums.txt, stamped at build time
    pub aggregate_checksum: Option<String>,
    /// Extra OCI annotations; explicit keys win over derived ones
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Build provenance
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BuildData {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub terminal: String,
    #[serde(default)]
    pub timestamp: String,
    /// airlift version that built the package
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub signed: bool,
    #[serde(default)]
    pub migrations: Vec<String>,
}

/// A deployable unit within a package
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub repos: Vec<String>,
    #[serde(default)]
    pub only: ComponentTarget,
    #[serde(default)]
    pub charts: Vec<Chart>,
    #[serde(default)]
    pub manifests: Vec<ManifestSet>,
    #[serde(default)]
    pub files: Vec<FileSpec>,
    #[serde(default)]
    pub actions: Actions,
}

impl Component {
    /// Whether deploying or removing this component touches the cluster
    pub fn requires_cluster(&self) -> bool {
        !self.charts.is_empty()
            || !self.manifests.is_empty()
            || !self.images.is_empty()
            || !self.repos.is_empty()
    }
}

/// Host restrictions for a component
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComponentTarget {
    /// Only include on this OS (`linux`, `darwin`, `windows`)
    pub local_os: Option<String>,
}

/// A Helm chart shipped inside a component
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Chart {
    pub name: String,
    pub version: Option<String>,
    pub namespace: String,
    pub release_name: Option<String>,
    /// Chart directory relative to the build source directory
    pub local_path: Option<String>,
    #[serde(default)]
    pub values_files: Vec<String>,
}

impl Chart {
    /// Release name used at install time; defaults to the chart name
    pub fn release_name(&self) -> &str {
        self.release_name.as_deref().unwrap_or(&self.name)
    }
}

/// A named group of raw Kubernetes manifests
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ManifestSet {
    pub name: String,
    pub namespace: Option<String>,
    #[serde(default)]
    pub files: Vec<String>,
}

/// A file copied onto the deploying host
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FileSpec {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub executable: bool,
}

/// Lifecycle hook groups
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Actions {
    #[serde(default)]
    pub on_create: ActionSet,
    #[serde(default)]
    pub on_deploy: ActionSet,
    #[serde(default)]
    pub on_remove: ActionSet,
}

/// Ordered hook lists for one lifecycle operation
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionSet {
    #[serde(default)]
    pub defaults: ActionDefaults,
    #[serde(default)]
    pub before: Vec<Action>,
    #[serde(default)]
    pub after: Vec<Action>,
    #[serde(default)]
    pub on_success: Vec<Action>,
    #[serde(default)]
    pub on_failure: Vec<Action>,
}

/// Settings applied to every action in a set unless the action overrides them
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionDefaults {
    #[serde(default)]
    pub mute: bool,
    /// 0 means no limit
    #[serde(default)]
    pub max_total_seconds: u64,
    #[serde(default)]
    pub max_retries: u32,
    pub dir: Option<String>,
    #[serde(default)]
    pub env: Vec<String>,
    pub shell: Option<String>,
}

/// A single hook command
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Action {
    pub cmd: String,
    pub description: Option<String>,
    pub mute: Option<bool>,
    pub max_total_seconds: Option<u64>,
    pub max_retries: Option<u32>,
    pub dir: Option<String>,
    #[serde(default)]
    pub env: Vec<String>,
}

impl Package {
    /// Create an application package with no components
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            kind: PackageKind::Application,
            metadata: Metadata {
                name: name.to_string(),
                version: version.to_string(),
                ..Default::default()
            },
            build: BuildData::default(),
            components: Vec::new(),
        }
    }

    /// Load a definition from a file path
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a definition from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let package: Package = toml::from_str(content)?;
        package.validate()?;
        Ok(package)
    }

    /// Serialize to TOML text
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate names and component uniqueness
    pub fn validate(&self) -> Result<()> {
        if !NAME_PATTERN.is_match(&self.metadata.name) {
            return Err(Error::Validation(format!(
                "invalid package name '{}': must be lowercase alphanumeric with dashes",
                self.metadata.name
            )));
        }
        if self.kind == PackageKind::Application && self.metadata.version.is_empty() {
            return Err(Error::Validation(format!(
                "package {} has no version",
                self.metadata.name
            )));
        }

        let mut seen = HashSet::new();
        for component in &self.components {
            if !NAME_PATTERN.is_match(&component.name) {
                return Err(Error::Validation(format!(
                    "invalid component name '{}'",
                    component.name
                )));
            }
            if !seen.insert(component.name.as_str()) {
                return Err(Error::Validation(format!(
                    "component {} is defined more than once",
                    component.name
                )));
            }
            for chart in &component.charts {
                if chart.name.is_empty() || chart.namespace.is_empty() {
                    return Err(Error::Validation(format!(
                        "chart in component {} needs a name and a namespace",
                        component.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Name, version and architecture identify a package
    pub fn identity(&self) -> String {
        format!(
            "{}:{}:{}",
            self.metadata.name,
            self.metadata.version,
            self.metadata.architecture.as_deref().unwrap_or("unknown")
        )
    }

    /// Look up a component by name
    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }

    /// Whether any component touches the cluster
    pub fn requires_cluster(&self) -> bool {
        self.components.iter().any(Component::requires_cluster)
    }
}
