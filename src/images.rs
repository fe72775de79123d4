// src/images.rs
//! Image discovery in rendered Kubernetes manifests
//!
//! Workload kinds with a pod template are read structurally through a
//! kind-keyed registry of pod spec locators. Every other kind falls back to a
//! pattern scan of its JSON form for `"image":"..."` fields. A looser pattern
//! runs over every document and produces "possible" images, which are never
//! reported when already found with confidence.

use crate::error::{Error, Result};
use crate::oci::Reference;
use regex::Regex;
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;
use tracing::debug;

static IMAGE_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?mi)"image":"((([a-z0-9._-]+)/)?([a-z0-9._-]+)(:([a-z0-9._-]+))?)""#)
        .expect("static regex")
});

static FUZZY_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?mi)["|=]([a-z0-9\-./:]+:[\w.\-]*[a-z.\-][\w.\-]*)""#).expect("static regex")
});

/// Container lists inside a pod spec
const CONTAINER_FIELDS: [&str; 3] = ["initContainers", "containers", "ephemeralContainers"];

/// Finds the pod spec inside a document of a known kind
pub type PodSpecLocator = fn(&Value) -> Option<&Value>;

/// Images found in a set of documents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageMatches {
    /// Images read from container specs or `image` fields
    pub confident: BTreeSet<String>,
    /// Image-like strings found anywhere, minus the confident ones
    pub possible: BTreeSet<String>,
}

impl ImageMatches {
    /// Fold another result in, keeping the two sets disjoint
    pub fn merge(&mut self, other: ImageMatches) {
        self.confident.extend(other.confident);
        self.possible.extend(other.possible);
        self.possible.retain(|image| !self.confident.contains(image));
    }

    pub fn is_empty(&self) -> bool {
        self.confident.is_empty() && self.possible.is_empty()
    }
}

/// Kind-keyed image extractor
pub struct ImageScanner {
    locators: HashMap<String, PodSpecLocator>,
}

impl Default for ImageScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageScanner {
    /// Scanner with the built-in workload kinds registered
    pub fn new() -> Self {
        let mut scanner = Self::empty();
        for kind in [
            "Deployment",
            "StatefulSet",
            "DaemonSet",
            "ReplicaSet",
            "ReplicationController",
            "Job",
        ] {
            scanner.register(kind, pod_template_spec);
        }
        scanner.register("CronJob", cron_job_spec);
        scanner.register("Pod", pod_spec);
        scanner
    }

    /// Scanner that only uses the pattern fallback
    pub fn empty() -> Self {
        Self {
            locators: HashMap::new(),
        }
    }

    /// Register or replace the locator for a kind
    pub fn register(&mut self, kind: &str, locator: PodSpecLocator) {
        self.locators.insert(kind.to_string(), locator);
    }

    /// Scan a multi-document YAML stream
    pub fn scan_yaml(&self, text: &str) -> Result<ImageMatches> {
        let mut documents = Vec::new();
        for document in serde_yaml::Deserializer::from_str(text) {
            let value = Value::deserialize(document)?;
            if !value.is_null() {
                documents.push(value);
            }
        }
        self.scan(&documents)
    }

    /// Scan parsed documents
    pub fn scan(&self, documents: &[Value]) -> Result<ImageMatches> {
        let mut matches = ImageMatches::default();
        for document in documents {
            let kind = document.get("kind").and_then(Value::as_str).unwrap_or_default();
            let json = serde_json::to_string(document)
                .map_err(|e| Error::Parse(format!("{} document: {}", kind, e)))?;

            match self.locators.get(kind) {
                Some(locate) => {
                    if let Some(spec) = locate(document) {
                        for image in container_images(spec) {
                            matches.confident.insert(image);
                        }
                    }
                }
                None => {
                    for capture in IMAGE_FIELD.captures_iter(&json) {
                        debug!("Found {} image {} by pattern", kind, &capture[1]);
                        matches.confident.insert(capture[1].to_string());
                    }
                }
            }

            for capture in FUZZY_IMAGE.captures_iter(&json) {
                matches.possible.insert(capture[1].to_string());
            }
        }
        let confident = &matches.confident;
        matches.possible.retain(|image| !confident.contains(image));
        Ok(matches)
    }
}

fn pod_spec(document: &Value) -> Option<&Value> {
    document.get("spec")
}

fn pod_template_spec(document: &Value) -> Option<&Value> {
    document.get("spec")?.get("template")?.get("spec")
}

fn cron_job_spec(document: &Value) -> Option<&Value> {
    document
        .get("spec")?
        .get("jobTemplate")?
        .get("spec")?
        .get("template")?
        .get("spec")
}

/// Valid image references of every container in a pod spec
fn container_images(spec: &Value) -> Vec<String> {
    CONTAINER_FIELDS
        .iter()
        .filter_map(|field| spec.get(*field)?.as_sequence())
        .flatten()
        .filter_map(|container| container.get("image")?.as_str())
        .filter(|image| Reference::parse_image(image).is_ok())
        .map(str::to_string)
        .collect()
}
