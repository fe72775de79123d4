// src/lib.rs

//! airlift
//!
//! Declarative application bundles for disconnected clusters.
//!
//! # Architecture
//!
//! - Layouts: a package is a directory (or `.tar.zst` archive) with a TOML
//!   definition, a checksum index and one archive per component
//! - Signatures: one Ed25519 signature over the definition covers the whole
//!   layout through the aggregate checksum
//! - Distribution: packages travel as OCI image indexes, one manifest per
//!   architecture
//! - Ledger: what is deployed lives in secrets, one record per package
//! - Removal: components are taken down in reverse order through a
//!   resumable state machine

pub mod config;
mod error;
pub mod hash;
pub mod images;
pub mod layout;
pub mod ledger;
pub mod lifecycle;
pub mod oci;
pub mod package;
pub mod signing;
pub mod transform;

pub use error::{Error, HookStage, Result};
