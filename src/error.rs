// src/error.rs

//! Error types for airlift
//!
//! A single error enum covers the library. Variants are grouped by how the
//! caller is expected to react: validation errors are returned immediately,
//! registry and cluster errors carry the operation context, signature errors
//! block the whole load, and hook errors leave resumable state behind.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using airlift's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Lifecycle hook stage that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    Before,
    After,
    OnSuccess,
    OnFailure,
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Before => write!(f, "before"),
            Self::After => write!(f, "after"),
            Self::OnSuccess => write!(f, "success"),
            Self::OnFailure => write!(f, "failure"),
        }
    }
}

/// Core error types for airlift
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bad caller input: empty paths, unset references, malformed options
    #[error("{0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("component {0} does not exist in package")]
    ComponentNotFound(String),

    #[error("component {name} could not access a {kind} directory")]
    ComponentDirMissing { name: String, kind: String },

    /// Component is defined but its archive is not in the layout
    #[error("component {name} has no archive at {}", path.display())]
    ComponentArchiveMissing { name: String, path: PathBuf },

    #[error("{0} not found")]
    NotFound(String),

    #[error("package is signed but no key was provided")]
    SignedWithoutKey,

    #[error("package signature verification failed: {0}")]
    SignatureInvalid(String),

    #[error("Invalid signature format: {0}")]
    InvalidSignatureFormat(String),

    #[error("Key error: {0}")]
    Key(String),

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("source and destination repositories must have the same name")]
    RepositoryNameMismatch,

    #[error("registry {registry}: {message}")]
    Registry { registry: String, message: String },

    /// The cluster API could not be reached at all
    #[error("cluster unavailable: {0}")]
    ClusterUnavailable(String),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("release {release} in namespace {namespace} not found")]
    ReleaseNotFound { namespace: String, release: String },

    #[error("unable to uninstall the chart {release} in the namespace {namespace}: {message}")]
    Uninstall {
        namespace: String,
        release: String,
        message: String,
    },

    #[error("action failed: {0}")]
    Action(String),

    #[error("unable to run the {stage} action for component ({component}): {source}")]
    Hook {
        stage: HookStage,
        component: String,
        #[source]
        source: Box<Error>,
    },

    #[error("unable to remove the component '{component}': {source}")]
    ComponentRemoval {
        component: String,
        #[source]
        source: Box<Error>,
    },

    #[error("unable to transform the OCIRepo URL: {0}")]
    UrlTransform(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Shorthand for a registry error carrying the registry host
    pub fn registry(registry: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Registry {
            registry: registry.into(),
            message: message.into(),
        }
    }

    /// True when the error means the release is already gone
    pub fn is_release_not_found(&self) -> bool {
        matches!(self, Self::ReleaseNotFound { .. })
    }

    /// True when the error means the cluster could not be reached
    pub fn is_cluster_unavailable(&self) -> bool {
        matches!(self, Self::ClusterUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_messages() {
        let err = Error::ComponentNotFound("does-not-exist".to_string());
        assert_eq!(err.to_string(), "component does-not-exist does not exist in package");

        let err = Error::ComponentDirMissing {
            name: "test".to_string(),
            kind: "files".to_string(),
        };
        assert_eq!(err.to_string(), "component test could not access a files directory");
    }

    #[test]
    fn test_hook_error_wraps_source() {
        let err = Error::Hook {
            stage: HookStage::After,
            component: "podinfo".to_string(),
            source: Box::new(Error::Action("exit status 1".to_string())),
        };
        let msg = err.to_string();
        assert!(msg.contains("after action"));
        assert!(msg.contains("exit status 1"));
    }
}
