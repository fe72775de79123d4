// src/oci/mod.rs
//! Registry distribution of packages
//!
//! A published package is an OCI image index tagged with the package version.
//! Each index entry is a per-architecture image manifest whose layers are the
//! layout files, one blob per file, titled with the file's relative path.
//!
//! ```text
//! <location>/<name>:<version>   (index)
//!   ├── amd64 -> manifest { config, layers: [bundle.toml, checksums.txt, components/*.tar, ...] }
//!   └── arm64 -> manifest { ... }
//! ```
//!
//! All transfers go through the [`Registry`] trait with a bounded number of
//! in-flight blobs.

mod copy;
pub mod manifest;
mod pull;
mod push;
mod reference;
mod registry;

pub use copy::{CopyOptions, validate_copy_references};
pub use pull::PullOptions;
pub use push::{PublishOptions, PublishResult};
pub use reference::{OCI_SCHEME, Reference, reference_from_metadata};
pub use registry::{MemoryRegistry, RawManifest, Registry, RegistryAuth, RemoteOptions, RemoteRegistry};

use crate::error::{Error, Result};
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Default number of parallel blob transfers
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Push, pull and copy packages through a registry backend
#[derive(Clone)]
pub struct Distributor {
    registry: Arc<dyn Registry>,
    concurrency: usize,
}

impl Distributor {
    /// Create a distributor over a registry backend
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Set the number of parallel blob transfers (at least one)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// The underlying registry backend
    pub fn registry(&self) -> &dyn Registry {
        self.registry.as_ref()
    }

    /// Run `op` over `items` with at most `concurrency` in flight
    ///
    /// Stops at the first error. Cancellation drops the in-flight transfers
    /// and returns [`Error::Cancelled`].
    async fn run_bounded<T, F, Fut>(
        &self,
        items: Vec<T>,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<()>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let transfers = stream::iter(items)
            .map(|item| {
                let permit = semaphore.clone();
                let transfer = op(item);
                async move {
                    let _permit = permit
                        .acquire()
                        .await
                        .map_err(|e| Error::Validation(format!("transfer pool closed: {}", e)))?;
                    transfer.await
                }
            })
            .buffer_unordered(self.concurrency);
        let mut transfers = std::pin::pin!(transfers);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                next = transfers.next() => match next {
                    Some(result) => result?,
                    None => return Ok(()),
                },
            }
        }
    }
}
