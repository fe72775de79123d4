// src/oci/reference.rs
//! OCI reference parsing
//!
//! Parses references like `ghcr.io/org/package:1.0.0` or
//! `oci://127.0.0.1:5000/ns/package@sha256:...` into structured parts.
//! Package references keep an absent tag absent; image references default
//! to `latest` the way container runtimes do.

use crate::error::{Error, Result};
use crate::package::Package;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Default registry when none is specified
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag for image references
const DEFAULT_TAG: &str = "latest";

/// Scheme accepted in front of package references
pub const OCI_SCHEME: &str = "oci://";

static REPOSITORY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*$")
        .expect("static regex")
});

static TAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w][\w.-]{0,127}$").expect("static regex"));

static DIGEST_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[a-fA-F0-9]{32,}$").expect("static regex"));

/// Parsed OCI reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    /// Registry host, with port if any
    pub registry: String,
    /// Repository path
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl Reference {
    /// Parse a reference, leaving the tag unset when absent
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        let reference = reference.strip_prefix(OCI_SCHEME).unwrap_or(reference);
        if reference.is_empty() {
            return Err(Error::InvalidReference("empty reference".to_string()));
        }

        // Digest first (@ separator)
        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((name, digest)) => {
                if !DIGEST_PATTERN.is_match(digest) {
                    return Err(Error::InvalidReference(format!(
                        "invalid digest in '{}': expected algorithm:hex",
                        reference
                    )));
                }
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // Tag: the last colon after the last slash. Without a slash, a
        // numeric suffix is a port rather than a tag.
        let (name, tag) = match name_tag.rfind('/') {
            Some(slash) => match name_tag[slash + 1..].rfind(':') {
                Some(colon) => (
                    &name_tag[..slash + 1 + colon],
                    Some(&name_tag[slash + 2 + colon..]),
                ),
                None => (name_tag, None),
            },
            None => match name_tag.rsplit_once(':') {
                Some((_, after)) if after.chars().all(|c| c.is_ascii_digit()) => (name_tag, None),
                Some((name, tag)) => (name, Some(tag)),
                None => (name_tag, None),
            },
        };

        if let Some(tag) = tag
            && !TAG_PATTERN.is_match(tag)
        {
            return Err(Error::InvalidReference(format!(
                "invalid tag '{}' in '{}'",
                tag, reference
            )));
        }

        let (registry, repository) = split_registry_repository(name)?;
        if !REPOSITORY_PATTERN.is_match(&repository) {
            return Err(Error::InvalidReference(format!(
                "invalid repository '{}' in '{}'",
                repository, reference
            )));
        }

        Ok(Self {
            registry,
            repository,
            tag: tag.map(str::to_string),
            digest,
        })
    }

    /// Parse an image reference, defaulting the tag to `latest`
    pub fn parse_image(reference: &str) -> Result<Self> {
        let mut parsed = Self::parse(reference)?;
        if parsed.tag.is_none() && parsed.digest.is_none() {
            parsed.tag = Some(DEFAULT_TAG.to_string());
        }
        Ok(parsed)
    }

    /// Whether a tag or digest pins the reference
    pub fn has_selector(&self) -> bool {
        self.tag.is_some() || self.digest.is_some()
    }

    /// Digest if present, otherwise tag
    pub fn selector(&self) -> Option<&str> {
        self.digest.as_deref().or(self.tag.as_deref())
    }

    /// Final path segment of the repository
    pub fn name(&self) -> &str {
        self.repository
            .rsplit('/')
            .next()
            .unwrap_or(&self.repository)
    }

    /// Same repository, selected by tag
    pub fn with_tag(&self, tag: &str) -> Self {
        Self {
            tag: Some(tag.to_string()),
            digest: None,
            ..self.clone()
        }
    }

    /// Same repository, selected by digest
    pub fn with_digest(&self, digest: &str) -> Self {
        Self {
            tag: None,
            digest: Some(digest.to_string()),
            ..self.clone()
        }
    }

    /// `registry/repository` without selector
    pub fn repository_url(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

/// Split a name into registry and repository components
fn split_registry_repository(name: &str) -> Result<(String, String)> {
    // The first component is a registry when it looks like a host
    if let Some((first, rest)) = name.split_once('/')
        && (first.contains('.') || first.contains(':') || first == "localhost")
    {
        if rest.is_empty() {
            return Err(Error::InvalidReference(format!(
                "empty repository in '{}'",
                name
            )));
        }
        return Ok((first.to_string(), rest.to_string()));
    }

    let repository = if name.contains('/') {
        name.to_string()
    } else {
        format!("library/{}", name)
    };
    Ok((DEFAULT_REGISTRY.to_string(), repository))
}

/// Package reference for a registry location: `<location>/<name>:<version>`
pub fn reference_from_metadata(location: &str, package: &Package) -> Result<Reference> {
    let location = location.trim();
    let location = location
        .strip_prefix(OCI_SCHEME)
        .unwrap_or(location)
        .trim_end_matches('/');
    if location.is_empty() {
        return Err(Error::Validation("invalid registry".to_string()));
    }
    if package.metadata.version.is_empty() {
        return Err(Error::Validation(format!(
            "package {} has no version to tag with",
            package.metadata.name
        )));
    }

    // Tags cannot carry '+', registries conventionally swap it for '_'
    let tag = package.metadata.version.replace('+', "_");
    Reference::parse(&format!("{}/{}:{}", location, package.metadata.name, tag))
}
