// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use airlift::layout::{PackageBuilder, PackageLayout};
use airlift::ledger::{DeployedPackage, InstalledChart, Ledger, MemorySecretStore};
use airlift::oci::{MemoryRegistry, RawManifest, Reference, Registry};
use airlift::lifecycle::{ActionRunner, ReleaseUninstaller, Remover};
use airlift::package::{Action, ActionDefaults, BuildData, Chart, Component, ManifestSet, Package};
use airlift::signing::SigningKeyPair;
use airlift::{Error, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Fixed provenance so repeated builds are byte-identical
pub fn fixed_build_data() -> BuildData {
    BuildData {
        user: "ci".to_string(),
        terminal: "builder".to_string(),
        timestamp: "2024-01-01T00:00:00Z".to_string(),
        ..Default::default()
    }
}

/// Write a chart, values and a manifest under `root` and return a package using them
pub fn write_sources(root: &Path) -> Package {
    fs::create_dir_all(root.join("chart/templates")).unwrap();
    fs::write(root.join("chart/Chart.yaml"), "name: podinfo\nversion: 6.4.0\n").unwrap();
    fs::write(root.join("chart/templates/svc.yaml"), "kind: Service\n").unwrap();
    fs::write(root.join("values.yaml"), "replicaCount: 1\n").unwrap();
    fs::write(
        root.join("deploy.yaml"),
        "kind: Deployment\nspec:\n  template:\n    spec:\n      containers:\n        - image: ghcr.io/stefanprodan/podinfo:6.4.0\n",
    )
    .unwrap();

    let mut package = Package::new("podinfo", "6.4.0");
    package.metadata.description = Some("podinfo test package".to_string());
    package.components.push(Component {
        name: "podinfo".to_string(),
        required: true,
        images: vec!["ghcr.io/stefanprodan/podinfo:6.4.0".to_string()],
        charts: vec![Chart {
            name: "podinfo".to_string(),
            namespace: "podinfo".to_string(),
            local_path: Some("chart".to_string()),
            values_files: vec!["values.yaml".to_string()],
            ..Default::default()
        }],
        ..Default::default()
    });
    package.components.push(Component {
        name: "extras".to_string(),
        manifests: vec![ManifestSet {
            name: "extras".to_string(),
            namespace: Some("podinfo".to_string()),
            files: vec!["deploy.yaml".to_string()],
        }],
        ..Default::default()
    });
    package
}

/// Build the test package for `architecture` into a fresh directory
///
/// Returns (TempDir, layout) - keep the TempDir alive to prevent cleanup.
pub fn build_layout(architecture: &str) -> (TempDir, PackageLayout) {
    let temp = tempfile::tempdir().unwrap();
    let source = temp.path().join("src");
    fs::create_dir_all(&source).unwrap();
    let package = write_sources(&source);

    let layout = PackageBuilder::new(package, &source)
        .with_architecture(architecture)
        .with_build_data(fixed_build_data())
        .build(&temp.path().join("layout"))
        .unwrap();
    (temp, layout)
}

/// Generate a key pair; returns (TempDir, private key, public key)
pub fn signing_keys() -> (TempDir, PathBuf, PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let private = temp.path().join("test.key");
    let public = temp.path().join("test.pub");
    SigningKeyPair::generate()
        .with_key_id("test")
        .save_to_files(&private, &public, None)
        .unwrap();
    (temp, private, public)
}

pub fn action(cmd: &str) -> Action {
    Action {
        cmd: cmd.to_string(),
        ..Default::default()
    }
}

/// A package with components `a` then `b`, each owning one chart
pub fn two_component_package() -> Package {
    let mut package = Package::new("demo", "1.0.0");
    for name in ["a", "b"] {
        package.components.push(Component {
            name: name.to_string(),
            charts: vec![Chart {
                name: format!("{}-chart", name),
                namespace: "demo".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        });
    }
    package
}

/// Ledger record with every component of `package` installed
pub fn deployed(package: &Package) -> DeployedPackage {
    let mut record = DeployedPackage::new(package.clone());
    for component in &package.components {
        for chart in &component.charts {
            record.record_chart(
                &component.name,
                InstalledChart::new(&chart.namespace, chart.release_name()),
            );
        }
    }
    record
}

/// Uninstaller that records calls instead of talking to a cluster
#[derive(Default)]
pub struct FakeUninstaller {
    calls: Mutex<Vec<String>>,
    missing: HashSet<String>,
    failing: HashSet<String>,
}

impl FakeUninstaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report this release as already gone
    pub fn with_missing(mut self, release: &str) -> Self {
        self.missing.insert(release.to_string());
        self
    }

    /// Fail uninstalling this release
    pub fn with_failing(mut self, release: &str) -> Self {
        self.failing.insert(release.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReleaseUninstaller for FakeUninstaller {
    async fn uninstall(
        &self,
        chart: &InstalledChart,
        _timeout: Duration,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.calls.lock().unwrap().push(chart.chart_name.clone());
        if self.missing.contains(&chart.chart_name) {
            return Err(Error::ReleaseNotFound {
                namespace: chart.namespace.clone(),
                release: chart.chart_name.clone(),
            });
        }
        if self.failing.contains(&chart.chart_name) {
            return Err(Error::Uninstall {
                namespace: chart.namespace.clone(),
                release: chart.chart_name.clone(),
                message: "timed out waiting for the condition".to_string(),
            });
        }
        Ok(())
    }
}

/// Action runner that records commands and fails the ones it is told to
#[derive(Default)]
pub struct ScriptedActions {
    ran: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl ScriptedActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, cmd: &str) {
        self.failing.lock().unwrap().insert(cmd.to_string());
    }

    pub fn heal(&self, cmd: &str) {
        self.failing.lock().unwrap().remove(cmd);
    }

    pub fn ran(&self) -> Vec<String> {
        self.ran.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionRunner for ScriptedActions {
    async fn run(
        &self,
        _defaults: &ActionDefaults,
        actions: &[Action],
        _cancel: &CancellationToken,
    ) -> Result<()> {
        for action in actions {
            self.ran.lock().unwrap().push(action.cmd.clone());
            if self.failing.lock().unwrap().contains(&action.cmd) {
                return Err(Error::Action(format!(
                    "command \"{}\" failed with exit code 1",
                    action.cmd
                )));
            }
        }
        Ok(())
    }
}

pub type TestRemover = Remover<MemorySecretStore, FakeUninstaller, ScriptedActions>;

/// Remover over an in-memory ledger
pub fn remover(uninstaller: FakeUninstaller) -> TestRemover {
    Remover::new(
        Ledger::new(MemorySecretStore::new()),
        uninstaller,
        ScriptedActions::new(),
    )
}

/// Registry that can fail the next tagged manifest read
pub struct FlakyRegistry {
    inner: Arc<MemoryRegistry>,
    fail_next_tag_pull: AtomicBool,
}

impl FlakyRegistry {
    pub fn new(inner: Arc<MemoryRegistry>) -> Self {
        Self {
            inner,
            fail_next_tag_pull: AtomicBool::new(false),
        }
    }

    pub fn fail_next_tag_pull(&self) {
        self.fail_next_tag_pull.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Registry for FlakyRegistry {
    async fn pull_manifest(&self, reference: &Reference) -> Result<RawManifest> {
        if reference.digest.is_none() && self.fail_next_tag_pull.swap(false, Ordering::SeqCst) {
            return Err(Error::registry(&reference.registry, "503 service unavailable"));
        }
        self.inner.pull_manifest(reference).await
    }

    async fn push_manifest(&self, reference: &Reference, manifest: &RawManifest) -> Result<()> {
        self.inner.push_manifest(reference, manifest).await
    }

    async fn blob_exists(&self, repository: &Reference, digest: &str) -> Result<bool> {
        self.inner.blob_exists(repository, digest).await
    }

    async fn pull_blob(&self, repository: &Reference, digest: &str, size: u64) -> Result<Vec<u8>> {
        self.inner.pull_blob(repository, digest, size).await
    }

    async fn push_blob(&self, repository: &Reference, data: &[u8], digest: &str) -> Result<()> {
        self.inner.push_blob(repository, data, digest).await
    }
}
