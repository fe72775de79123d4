// src/oci/registry.rs
//! Registry backends
//!
//! The distributor talks to registries only through the [`Registry`] trait.
//! [`RemoteRegistry`] speaks the OCI distribution API; [`MemoryRegistry`]
//! lives in this process and backs air-gapped staging and tests.

use super::manifest::{
    DOCKER_LIST_MEDIA_TYPE, INDEX_MEDIA_TYPE, ImageIndex, ImageManifest, MANIFEST_MEDIA_TYPE,
    is_index_media_type, sniff_media_type,
};
use super::reference::Reference;
use crate::error::{Error, Result};
use crate::hash;
use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::errors::{OciDistributionError, OciErrorCode};
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, RegistryOperation};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// Manifest or index bytes with their digest and media type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawManifest {
    pub data: Vec<u8>,
    pub digest: String,
    pub media_type: String,
}

impl RawManifest {
    /// Wrap bytes, computing digest and reading the media type
    pub fn new(data: Vec<u8>) -> Result<Self> {
        let media_type = sniff_media_type(&data)
            .ok_or_else(|| Error::Parse("manifest is not a JSON document".to_string()))?;
        Ok(Self {
            digest: hash::oci_digest(&data),
            media_type,
            data,
        })
    }

    pub fn is_index(&self) -> bool {
        is_index_media_type(&self.media_type)
    }
}

/// Minimal registry operations needed for push, pull and copy
#[async_trait]
pub trait Registry: Send + Sync {
    /// Fetch a manifest or index by the reference's tag or digest
    async fn pull_manifest(&self, reference: &Reference) -> Result<RawManifest>;

    /// Store a manifest under the reference's tag, or by digest alone
    async fn push_manifest(&self, reference: &Reference, manifest: &RawManifest) -> Result<()>;

    /// Whether the repository already holds a blob
    async fn blob_exists(&self, repository: &Reference, digest: &str) -> Result<bool>;

    async fn pull_blob(&self, repository: &Reference, digest: &str, size: u64) -> Result<Vec<u8>>;

    async fn push_blob(&self, repository: &Reference, data: &[u8], digest: &str) -> Result<()>;
}

/// Registry credentials
#[derive(Debug, Clone, Default)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Anonymous access
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Username/password access
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Credentials from `REGISTRY_USERNAME` / `REGISTRY_PASSWORD`, else anonymous
    pub fn from_env() -> Self {
        match (
            std::env::var("REGISTRY_USERNAME").ok(),
            std::env::var("REGISTRY_PASSWORD").ok(),
        ) {
            (Some(username), Some(password)) => Self::basic(username, password),
            _ => Self::anonymous(),
        }
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Connection options for remote registries
#[derive(Debug, Clone, Default)]
pub struct RemoteOptions {
    pub plain_http: bool,
    pub insecure_skip_tls_verify: bool,
}

/// OCI distribution API client
pub struct RemoteRegistry {
    client: Client,
    auth: RegistryAuth,
}

impl RemoteRegistry {
    pub fn new(options: &RemoteOptions, auth: RegistryAuth) -> Self {
        let config = ClientConfig {
            protocol: if options.plain_http {
                ClientProtocol::Http
            } else {
                ClientProtocol::Https
            },
            accept_invalid_certificates: options.insecure_skip_tls_verify,
            ..Default::default()
        };
        Self {
            client: Client::new(config),
            auth,
        }
    }

    fn to_oci_reference(reference: &Reference) -> Result<oci_distribution::Reference> {
        let text = match (&reference.digest, &reference.tag) {
            (Some(digest), _) => format!("{}@{}", reference.repository_url(), digest),
            (None, Some(tag)) => format!("{}:{}", reference.repository_url(), tag),
            (None, None) => {
                return Err(Error::InvalidReference(format!(
                    "{} has no tag or digest",
                    reference
                )));
            }
        };
        text.parse::<oci_distribution::Reference>()
            .map_err(|e| Error::InvalidReference(format!("{}: {}", text, e)))
    }

    /// Repository-only operations still need a selector for the client
    fn repository_reference(repository: &Reference) -> Result<oci_distribution::Reference> {
        if repository.has_selector() {
            Self::to_oci_reference(repository)
        } else {
            Self::to_oci_reference(&repository.with_tag("latest"))
        }
    }

    async fn authenticate(
        &self,
        reference: &oci_distribution::Reference,
        registry: &str,
        operation: RegistryOperation,
    ) -> Result<()> {
        self.client
            .auth(reference, &self.auth.to_oci_auth(), operation)
            .await
            .map_err(|e| Error::registry(registry, format!("authentication failed: {}", e)))?;
        Ok(())
    }
}

/// A manifest or repository the registry does not know is `NotFound`
fn manifest_pull_error(reference: &Reference, error: OciDistributionError) -> Error {
    let unknown = match &error {
        OciDistributionError::ImageManifestNotFoundError(_) => true,
        OciDistributionError::RegistryError { envelope, .. } => envelope
            .errors
            .iter()
            .any(|e| matches!(e.code, OciErrorCode::ManifestUnknown | OciErrorCode::NameUnknown)),
        _ => false,
    };
    if unknown {
        Error::NotFound(format!("manifest {}", reference))
    } else {
        Error::registry(
            &reference.registry,
            format!("failed to pull manifest {}: {}", reference, error),
        )
    }
}

#[async_trait]
impl Registry for RemoteRegistry {
    async fn pull_manifest(&self, reference: &Reference) -> Result<RawManifest> {
        let oci_ref = Self::to_oci_reference(reference)?;
        let (data, digest) = self
            .client
            .pull_manifest_raw(
                &oci_ref,
                &self.auth.to_oci_auth(),
                &[INDEX_MEDIA_TYPE, MANIFEST_MEDIA_TYPE, DOCKER_LIST_MEDIA_TYPE],
            )
            .await
            .map_err(|e| manifest_pull_error(reference, e))?;

        let manifest = RawManifest::new(data)?;
        if manifest.digest != digest {
            return Err(Error::registry(
                &reference.registry,
                format!("manifest digest mismatch: registry reported {}, content is {}", digest, manifest.digest),
            ));
        }
        debug!(reference = %reference, digest = %manifest.digest, "Pulled manifest");
        Ok(manifest)
    }

    async fn push_manifest(&self, reference: &Reference, manifest: &RawManifest) -> Result<()> {
        let oci_ref = Self::to_oci_reference(reference)?;
        self.authenticate(&oci_ref, &reference.registry, RegistryOperation::Push)
            .await?;
        let content_type = http::HeaderValue::from_str(&manifest.media_type)
            .map_err(|e| Error::Parse(format!("media type {}: {}", manifest.media_type, e)))?;
        self.client
            .push_manifest_raw(&oci_ref, manifest.data.clone(), content_type)
            .await
            .map_err(|e| {
                Error::registry(&reference.registry, format!("failed to push manifest {}: {}", reference, e))
            })?;
        debug!(reference = %reference, digest = %manifest.digest, "Pushed manifest");
        Ok(())
    }

    async fn blob_exists(&self, _repository: &Reference, _digest: &str) -> Result<bool> {
        // The client exposes no HEAD; registries deduplicate uploads server side.
        Ok(false)
    }

    async fn pull_blob(&self, repository: &Reference, digest: &str, size: u64) -> Result<Vec<u8>> {
        let oci_ref = Self::repository_reference(repository)?;
        self.authenticate(&oci_ref, &repository.registry, RegistryOperation::Pull)
            .await?;

        let descriptor = OciDescriptor {
            digest: digest.to_string(),
            size: size as i64,
            media_type: String::new(),
            urls: None,
            annotations: None,
        };
        let mut data = Vec::with_capacity(size as usize);
        self.client
            .pull_blob(&oci_ref, &descriptor, &mut data)
            .await
            .map_err(|e| {
                Error::registry(&repository.registry, format!("failed to pull blob {}: {}", digest, e))
            })?;
        Ok(data)
    }

    async fn push_blob(&self, repository: &Reference, data: &[u8], digest: &str) -> Result<()> {
        let oci_ref = Self::repository_reference(repository)?;
        self.authenticate(&oci_ref, &repository.registry, RegistryOperation::Push)
            .await?;
        self.client
            .push_blob(&oci_ref, data, digest)
            .await
            .map_err(|e| {
                Error::registry(&repository.registry, format!("failed to push blob {}: {}", digest, e))
            })?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Repository {
    blobs: HashMap<String, Vec<u8>>,
    manifests: HashMap<String, RawManifest>,
    tags: HashMap<String, String>,
}

impl Repository {
    /// Digests a manifest points at, and whether each must be a manifest
    fn references(manifest: &RawManifest) -> Result<Vec<(String, bool)>> {
        if manifest.is_index() {
            let index = ImageIndex::from_bytes(&manifest.data)?;
            Ok(index.manifests.into_iter().map(|m| (m.digest, true)).collect())
        } else {
            let image = ImageManifest::from_bytes(&manifest.data)?;
            Ok(std::iter::once(image.config)
                .chain(image.layers)
                .map(|d| (d.digest, false))
                .collect())
        }
    }
}

/// In-process registry
///
/// Enforces what a conformant registry enforces on push: blob digests must
/// match content and manifests may only reference content already present.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    repositories: RwLock<HashMap<String, Repository>>,
    blob_uploads: AtomicUsize,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blob uploads accepted so far
    pub fn blob_uploads(&self) -> usize {
        self.blob_uploads.load(Ordering::Relaxed)
    }

    /// Tags present in a repository, sorted
    pub async fn tags(&self, repository: &Reference) -> Vec<String> {
        let repositories = self.repositories.read().await;
        let mut tags: Vec<String> = repositories
            .get(&repository.repository_url())
            .map(|r| r.tags.keys().cloned().collect())
            .unwrap_or_default();
        tags.sort();
        tags
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn pull_manifest(&self, reference: &Reference) -> Result<RawManifest> {
        let repositories = self.repositories.read().await;
        let not_found = || Error::NotFound(format!("manifest {}", reference));
        let repo = repositories
            .get(&reference.repository_url())
            .ok_or_else(not_found)?;

        let digest = match (&reference.digest, &reference.tag) {
            (Some(digest), _) => digest.clone(),
            (None, Some(tag)) => repo.tags.get(tag).cloned().ok_or_else(not_found)?,
            (None, None) => {
                return Err(Error::InvalidReference(format!(
                    "{} has no tag or digest",
                    reference
                )));
            }
        };
        repo.manifests.get(&digest).cloned().ok_or_else(not_found)
    }

    async fn push_manifest(&self, reference: &Reference, manifest: &RawManifest) -> Result<()> {
        hash::verify_sha256(&manifest.data, &manifest.digest)
            .map_err(|e| Error::registry(&reference.registry, format!("manifest {}", e)))?;
        if let Some(digest) = &reference.digest
            && digest != &manifest.digest
        {
            return Err(Error::registry(
                &reference.registry,
                format!("manifest digest {} does not match reference {}", manifest.digest, digest),
            ));
        }

        let mut repositories = self.repositories.write().await;
        let repo = repositories.entry(reference.repository_url()).or_default();

        for (digest, is_manifest) in Repository::references(manifest)? {
            let present = if is_manifest {
                repo.manifests.contains_key(&digest)
            } else {
                repo.blobs.contains_key(&digest)
            };
            if !present {
                return Err(Error::registry(
                    &reference.registry,
                    format!("manifest references unknown content {}", digest),
                ));
            }
        }

        repo.manifests
            .insert(manifest.digest.clone(), manifest.clone());
        if let Some(tag) = &reference.tag {
            repo.tags.insert(tag.clone(), manifest.digest.clone());
        }
        Ok(())
    }

    async fn blob_exists(&self, repository: &Reference, digest: &str) -> Result<bool> {
        let repositories = self.repositories.read().await;
        Ok(repositories
            .get(&repository.repository_url())
            .is_some_and(|r| r.blobs.contains_key(digest)))
    }

    async fn pull_blob(&self, repository: &Reference, digest: &str, _size: u64) -> Result<Vec<u8>> {
        let repositories = self.repositories.read().await;
        repositories
            .get(&repository.repository_url())
            .and_then(|r| r.blobs.get(digest).cloned())
            .ok_or_else(|| Error::NotFound(format!("blob {} in {}", digest, repository.repository_url())))
    }

    async fn push_blob(&self, repository: &Reference, data: &[u8], digest: &str) -> Result<()> {
        hash::verify_sha256(data, digest)
            .map_err(|e| Error::registry(&repository.registry, format!("blob {}", e)))?;
        let mut repositories = self.repositories.write().await;
        repositories
            .entry(repository.repository_url())
            .or_default()
            .blobs
            .insert(digest.to_string(), data.to_vec());
        self.blob_uploads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::manifest::{CONFIG_MEDIA_TYPE, Descriptor, LAYER_MEDIA_TYPE};
    use std::collections::BTreeMap;

    fn repo() -> Reference {
        Reference::parse("registry.local/ns/pkg").unwrap()
    }

    fn registry_error(body: &str) -> OciDistributionError {
        OciDistributionError::RegistryError {
            envelope: serde_json::from_str(body).unwrap(),
            url: "https://registry.local/v2/ns/pkg/manifests/1.0.0".to_string(),
        }
    }

    #[test]
    fn test_unknown_manifest_maps_to_not_found() {
        let tagged = repo().with_tag("1.0.0");
        let err = manifest_pull_error(
            &tagged,
            registry_error(r#"{"errors":[{"code":"MANIFEST_UNKNOWN","message":"manifest unknown"}]}"#),
        );
        assert!(matches!(err, Error::NotFound(_)));

        let err = manifest_pull_error(
            &tagged,
            registry_error(r#"{"errors":[{"code":"DENIED","message":"requested access is denied"}]}"#),
        );
        assert!(matches!(err, Error::Registry { .. }));

        let err = manifest_pull_error(
            &tagged,
            OciDistributionError::ServerError {
                code: 503,
                url: "https://registry.local/v2/".to_string(),
                message: "service unavailable".to_string(),
            },
        );
        assert!(matches!(err, Error::Registry { .. }));
    }

    #[tokio::test]
    async fn test_blob_digest_enforced() {
        let registry = MemoryRegistry::new();
        let digest = hash::oci_digest(b"data");
        assert!(registry.push_blob(&repo(), b"other", &digest).await.is_err());
        registry.push_blob(&repo(), b"data", &digest).await.unwrap();
        assert!(registry.blob_exists(&repo(), &digest).await.unwrap());
        assert_eq!(registry.pull_blob(&repo(), &digest, 4).await.unwrap(), b"data");
        assert_eq!(registry.blob_uploads(), 1);
    }

    #[tokio::test]
    async fn test_manifest_requires_blobs() {
        let registry = MemoryRegistry::new();
        let config = Descriptor::for_bytes(CONFIG_MEDIA_TYPE, b"{}");
        let layer = Descriptor::for_bytes(LAYER_MEDIA_TYPE, b"layer");
        let manifest = ImageManifest::new(config, vec![layer], BTreeMap::new());
        let raw = RawManifest::new(manifest.to_bytes().unwrap()).unwrap();
        let tagged = repo().with_tag("1.0.0");

        assert!(registry.push_manifest(&tagged, &raw).await.is_err());

        registry
            .push_blob(&repo(), b"{}", &hash::oci_digest(b"{}"))
            .await
            .unwrap();
        registry
            .push_blob(&repo(), b"layer", &hash::oci_digest(b"layer"))
            .await
            .unwrap();
        registry.push_manifest(&tagged, &raw).await.unwrap();

        assert_eq!(registry.pull_manifest(&tagged).await.unwrap(), raw);
        assert_eq!(
            registry
                .pull_manifest(&repo().with_digest(&raw.digest))
                .await
                .unwrap()
                .digest,
            raw.digest
        );
        assert_eq!(registry.tags(&repo()).await, ["1.0.0"]);
        assert!(matches!(
            registry.pull_manifest(&repo().with_tag("missing")).await,
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_remote_reference_conversion() {
        let r = Reference::parse("127.0.0.1:5000/ns/pkg:1.0.0").unwrap();
        let oci = RemoteRegistry::to_oci_reference(&r).unwrap();
        assert_eq!(oci.registry(), "127.0.0.1:5000");
        assert_eq!(oci.repository(), "ns/pkg");
        assert_eq!(oci.tag(), Some("1.0.0"));

        assert!(RemoteRegistry::to_oci_reference(&repo()).is_err());
        assert!(RemoteRegistry::repository_reference(&repo()).is_ok());
    }
}
