// src/transform.rs
//! Repository reference rewriting for the admission layer
//!
//! Points an OCI repository source at the in-cluster registry. The tag gets
//! a CRC32 suffix of the original `host/path` so that artifacts with the same
//! tag from different origins cannot collide in the internal registry.
//! Digests and semver ranges select content, not names, and pass through.

use crate::error::{Error, Result};
use crate::hash;
use crate::oci::{OCI_SCHEME, Reference};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use url::Url;

/// Separator between the original tag and the origin checksum
pub const TAG_CHECKSUM_INFIX: &str = "-zarf-";

/// Secret referenced by rewritten sources
pub const DEFAULT_PULL_SECRET: &str = "private-registry";

/// How a repository source selects its artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositorySelector {
    Tag(String),
    SemVer(String),
    Digest(String),
    None,
}

/// The part of an OCI repository source the rewrite looks at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySpec {
    /// `oci://host/path`
    pub url: String,
    pub selector: RepositorySelector,
}

#[derive(Debug, Clone)]
pub struct RewriteOptions {
    /// Keep the tag as-is (chart artifacts are mirrored under their own tag)
    pub preserve_tag: bool,
    pub pull_secret: String,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self {
            preserve_tag: false,
            pull_secret: DEFAULT_PULL_SECRET.to_string(),
        }
    }
}

/// JSON-patch operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
}

/// One RFC 6902 operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    pub value: Value,
}

impl PatchOperation {
    pub fn replace(path: &str, value: Value) -> Self {
        Self {
            op: PatchOp::Replace,
            path: path.to_string(),
            value,
        }
    }

    pub fn add(path: &str, value: Value) -> Self {
        Self {
            op: PatchOp::Add,
            path: path.to_string(),
            value,
        }
    }
}

/// Rewritten source plus the patch that applies it
#[derive(Debug, Clone, PartialEq)]
pub struct RewriteResult {
    pub url: String,
    pub selector: RepositorySelector,
    pub patches: Vec<PatchOperation>,
}

/// Rewrite a repository source to the internal registry
///
/// `service_address` is the in-cluster address of the registry when one is
/// known; it takes precedence over `registry_address` as the target. A url
/// already on either address is left alone.
pub fn rewrite_repository(
    spec: &RepositorySpec,
    registry_address: &str,
    service_address: Option<&str>,
    options: &RewriteOptions,
) -> Result<RewriteResult> {
    let (host, path) = split_oci_url(&spec.url)?;

    let internal = host == registry_address || service_address == Some(host.as_str());
    let (url, selector) = if internal {
        (spec.url.clone(), spec.selector.clone())
    } else {
        let target = service_address.unwrap_or(registry_address);
        let selector = match &spec.selector {
            RepositorySelector::Tag(tag) if !options.preserve_tag => {
                RepositorySelector::Tag(checksum_tag(tag, &host, &path))
            }
            other => other.clone(),
        };
        (format!("{}{}/{}", OCI_SCHEME, target, path), selector)
    };

    let mut patches = vec![
        PatchOperation::replace("/spec/url", Value::String(url.clone())),
        PatchOperation::add("/spec/secretRef", json!({ "name": options.pull_secret })),
    ];
    if let RepositorySelector::Tag(tag) = &selector {
        patches.push(PatchOperation::replace(
            "/spec/ref/tag",
            Value::String(tag.clone()),
        ));
    }

    Ok(RewriteResult {
        url,
        selector,
        patches,
    })
}

/// `<tag>-zarf-<crc32(host/path)>`
pub fn checksum_tag(tag: &str, host: &str, path: &str) -> String {
    format!(
        "{}{}{}",
        tag,
        TAG_CHECKSUM_INFIX,
        hash::crc32(&format!("{}/{}", host, path))
    )
}

/// Split `oci://host[:port]/path` into host and path
fn split_oci_url(raw: &str) -> Result<(String, String)> {
    let url = Url::parse(raw).map_err(|e| Error::UrlTransform(format!("{}: {}", raw, e)))?;
    if url.scheme() != OCI_SCHEME.trim_end_matches("://") {
        return Err(Error::UrlTransform(format!(
            "{}: unsupported scheme {}",
            raw,
            url.scheme()
        )));
    }
    let host = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => return Err(Error::UrlTransform(format!("{}: missing host", raw))),
    };
    let path = url.path().trim_matches('/').to_string();

    Reference::parse(&format!("{}/{}", host, path))
        .map_err(|e| Error::UrlTransform(format!("{}: {}", raw, e)))?;
    Ok((host, path))
}
