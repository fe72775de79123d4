// src/ledger/store.rs
//! Secret storage backends for the ledger
//!
//! The ledger only needs upsert, read, delete and list on small named
//! secrets. Errors from a store that cannot be reached at all are reported
//! as [`Error::ClusterUnavailable`] so callers can tell them apart from
//! decode failures.

use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// A named, labeled blob of data in a namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default, with = "base64_values")]
    pub data: BTreeMap<String, Vec<u8>>,
}

/// Key-value access to secrets
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Create or replace a secret
    async fn apply(&self, secret: &Secret) -> Result<()>;

    /// Read a secret; a missing secret is `None`
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    /// Delete a secret; a missing secret is [`Error::NotFound`]
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;

    /// Secrets in a namespace carrying every label in `selector`
    async fn list(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<Secret>>;
}

fn matches_selector(secret: &Secret, selector: &BTreeMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(k, v)| secret.labels.get(k).is_some_and(|actual| actual == v))
}

/// In-process store
///
/// Keeps a history of every applied secret and can be switched offline to
/// exercise the unavailable paths.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<(String, String), Secret>>,
    history: Mutex<Vec<Secret>>,
    offline: AtomicBool,
    read_only: AtomicBool,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the cluster were gone
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Keep serving reads but fail every write
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Every secret passed to `apply`, in order
    pub fn history(&self) -> Vec<Secret> {
        self.history
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::ClusterUnavailable("memory store is offline".to_string()));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        self.check_online()?;
        if self.read_only.load(Ordering::SeqCst) {
            return Err(Error::ClusterUnavailable("memory store is read-only".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn apply(&self, secret: &Secret) -> Result<()> {
        self.check_writable()?;
        if let Ok(mut history) = self.history.lock() {
            history.push(secret.clone());
        }
        self.secrets.write().await.insert(
            (secret.namespace.clone(), secret.name.clone()),
            secret.clone(),
        );
        Ok(())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        self.check_online()?;
        Ok(self
            .secrets
            .read()
            .await
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        self.check_writable()?;
        self.secrets
            .write()
            .await
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("secret {}/{}", namespace, name)))
    }

    async fn list(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<Secret>> {
        self.check_online()?;
        let secrets = self.secrets.read().await;
        let mut found: Vec<Secret> = secrets
            .values()
            .filter(|s| s.namespace == namespace && matches_selector(s, selector))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }
}

/// One JSON file per secret under `<root>/<namespace>/<name>.json`
pub struct DirSecretStore {
    root: PathBuf,
}

impl DirSecretStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn secret_path(&self, namespace: &str, name: &str) -> PathBuf {
        self.root.join(namespace).join(format!("{}.json", name))
    }

    fn unavailable(&self, e: std::io::Error) -> Error {
        Error::ClusterUnavailable(format!("secret store {}: {}", self.root.display(), e))
    }
}

#[async_trait]
impl SecretStore for DirSecretStore {
    async fn apply(&self, secret: &Secret) -> Result<()> {
        let path = self.secret_path(&secret.namespace, &secret.name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.unavailable(e))?;
        }
        let data = serde_json::to_vec_pretty(secret)?;

        // Write atomically via temp file
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, data)
            .await
            .map_err(|e| self.unavailable(e))?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .map_err(|e| self.unavailable(e))?;
        debug!("Applied secret {}/{}", secret.namespace, secret.name);
        Ok(())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let path = self.secret_path(namespace, name);
        match tokio::fs::read(&path).await {
            Ok(data) => {
                let secret = serde_json::from_slice(&data).map_err(|e| {
                    Error::Ledger(format!("corrupt secret {}: {}", path.display(), e))
                })?;
                Ok(Some(secret))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.unavailable(e)),
        }
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        match tokio::fs::remove_file(self.secret_path(namespace, name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::NotFound(format!("secret {}/{}", namespace, name)))
            }
            Err(e) => Err(self.unavailable(e)),
        }
    }

    async fn list(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Result<Vec<Secret>> {
        let dir = self.root.join(namespace);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.unavailable(e)),
        };

        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| self.unavailable(e))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = tokio::fs::read(&path).await.map_err(|e| self.unavailable(e))?;
            let secret: Secret = serde_json::from_slice(&data)
                .map_err(|e| Error::Ledger(format!("corrupt secret {}: {}", path.display(), e)))?;
            if matches_selector(&secret, selector) {
                found.push(secret);
            }
        }
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }
}

/// Secret data is base64 on the wire, like a Kubernetes secret
mod base64_values {
    use super::BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        data: &BTreeMap<String, Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        data.iter()
            .map(|(k, v)| (k.as_str(), BASE64.encode(v)))
            .collect::<BTreeMap<_, _>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, Vec<u8>>, D::Error> {
        BTreeMap::<String, String>::deserialize(deserializer)?
            .into_iter()
            .map(|(k, v)| {
                BASE64
                    .decode(v)
                    .map(|bytes| (k, bytes))
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}
