// src/ledger/mod.rs
//! Deployment ledger
//!
//! The ledger records which components and chart releases of a package are
//! installed on a cluster. One record per package name is stored as JSON in
//! the `data` field of a secret in the `airlift` namespace.
//!
//! Component order in a record is installation order. Removal consumes it
//! from the back, and a record with no components left is deleted rather
//! than kept empty. A component with no charts that is still listed is a
//! removal that has not finished yet.

mod store;

pub use store::{DirSecretStore, MemorySecretStore, Secret, SecretStore};

use crate::error::{Error, Result};
use crate::package::Package;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Namespace holding ledger secrets
pub const LEDGER_NAMESPACE: &str = "airlift";

/// Prefix of ledger secret names
pub const SECRET_PREFIX: &str = "airlift-package-";

/// Label marking secrets written by airlift
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Label carrying the package name
pub const PACKAGE_INFO_LABEL: &str = "package-deploy-info";

/// Secret data key holding the JSON record
pub const DATA_KEY: &str = "data";

/// What is installed for one package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployedPackage {
    pub name: String,
    /// Package definition as deployed
    pub data: Package,
    #[serde(default)]
    pub cli_version: String,
    #[serde(default)]
    pub generation: u64,
    #[serde(default)]
    pub deployed_components: Vec<DeployedComponent>,
}

/// What is installed for one component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployedComponent {
    pub name: String,
    #[serde(default)]
    pub installed_charts: Vec<InstalledChart>,
    #[serde(default)]
    pub observed_generation: u64,
}

impl DeployedComponent {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            installed_charts: Vec::new(),
            observed_generation: 0,
        }
    }
}

/// A chart release owned by a component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledChart {
    pub namespace: String,
    /// Release name
    pub chart_name: String,
}

impl InstalledChart {
    pub fn new(namespace: &str, release: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            chart_name: release.to_string(),
        }
    }
}

impl DeployedPackage {
    /// Fresh record for a package about to be deployed
    pub fn new(package: Package) -> Self {
        Self {
            name: package.metadata.name.clone(),
            data: package,
            cli_version: env!("CARGO_PKG_VERSION").to_string(),
            generation: 1,
            deployed_components: Vec::new(),
        }
    }

    pub fn component(&self, name: &str) -> Option<&DeployedComponent> {
        self.deployed_components.iter().find(|c| c.name == name)
    }

    pub fn component_mut(&mut self, name: &str) -> Option<&mut DeployedComponent> {
        self.deployed_components.iter_mut().find(|c| c.name == name)
    }

    /// Record an installed release, appending the component if it is new
    pub fn record_chart(&mut self, component: &str, chart: InstalledChart) {
        let generation = self.generation;
        if self.component(component).is_none() {
            self.deployed_components.push(DeployedComponent::new(component));
        }
        if let Some(deployed) = self.component_mut(component) {
            deployed.observed_generation = generation;
            if !deployed.installed_charts.contains(&chart) {
                deployed.installed_charts.push(chart);
            }
        }
    }

    /// Drop a component from the record
    pub fn remove_component(&mut self, name: &str) {
        self.deployed_components.retain(|c| c.name != name);
    }

    fn to_secret(&self) -> Result<Secret> {
        Ok(Secret {
            name: secret_name(&self.name),
            namespace: LEDGER_NAMESPACE.to_string(),
            labels: BTreeMap::from([
                (MANAGED_BY_LABEL.to_string(), "airlift".to_string()),
                (PACKAGE_INFO_LABEL.to_string(), self.name.clone()),
            ]),
            data: BTreeMap::from([(DATA_KEY.to_string(), serde_json::to_vec(self)?)]),
        })
    }

    fn from_secret(secret: &Secret) -> Result<Self> {
        let data = secret.data.get(DATA_KEY).ok_or_else(|| {
            Error::Ledger(format!("secret {} has no {} field", secret.name, DATA_KEY))
        })?;
        serde_json::from_slice(data)
            .map_err(|e| Error::Ledger(format!("secret {}: {}", secret.name, e)))
    }
}

/// Name of the secret holding a package's record
pub fn secret_name(package: &str) -> String {
    format!("{}{}", SECRET_PREFIX, package)
}

/// Ledger records over a secret store
pub struct Ledger<S> {
    store: S,
}

impl<S: SecretStore> Ledger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Read a package's record; an absent record is `None`
    pub async fn get(&self, package: &str) -> Result<Option<DeployedPackage>> {
        match self.store.get(LEDGER_NAMESPACE, &secret_name(package)).await? {
            Some(secret) => DeployedPackage::from_secret(&secret).map(Some),
            None => Ok(None),
        }
    }

    /// Create or replace a record
    pub async fn put(&self, record: &DeployedPackage) -> Result<()> {
        self.store.apply(&record.to_secret()?).await?;
        debug!(
            package = %record.name,
            components = record.deployed_components.len(),
            "Stored ledger record"
        );
        Ok(())
    }

    /// Delete a record
    pub async fn delete(&self, package: &str) -> Result<()> {
        self.store
            .delete(LEDGER_NAMESPACE, &secret_name(package))
            .await
    }

    /// Every record, sorted by package name
    pub async fn list(&self) -> Result<Vec<DeployedPackage>> {
        let selector = BTreeMap::from([(MANAGED_BY_LABEL.to_string(), "airlift".to_string())]);
        self.store
            .list(LEDGER_NAMESPACE, &selector)
            .await?
            .iter()
            .filter(|s| s.labels.contains_key(PACKAGE_INFO_LABEL))
            .map(DeployedPackage::from_secret)
            .collect()
    }

    /// Store a record, downgrading failure to a warning
    ///
    /// Returns whether the write landed.
    pub async fn persist(&self, record: &DeployedPackage) -> bool {
        match self.put(record).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    package = %record.name,
                    error = %e,
                    "Unable to update the ledger record (this may be normal if the cluster was removed)"
                );
                false
            }
        }
    }

    /// Delete a record, downgrading failure to a warning
    pub async fn forget(&self, package: &str) -> bool {
        match self.delete(package).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    package = %package,
                    error = %e,
                    "Unable to delete the ledger record (this may be normal if the cluster was removed)"
                );
                false
            }
        }
    }
}
