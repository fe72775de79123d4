// src/signing.rs
//! Package signing and signature verification
//!
//! Packages are signed with Ed25519 over the exact bytes of `bundle.toml`.
//! The definition carries the aggregate checksum of `checksums.txt`, and
//! that file pins every other file in the layout, so one detached signature
//! covers the whole package.
//!
//! Private keys are TOML key files. They may be sealed with a password
//! (PBKDF2-HMAC-SHA256 key derivation, AES-256-GCM).

use crate::error::{Error, Result};
use crate::layout::PackageLayout;
use crate::package::{DEFINITION_FILE, Package};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::fs;
use std::num::NonZeroU32;
use std::path::Path;
use tracing::{debug, info, warn};

/// Detached signature file written next to the definition
pub const SIGNATURE_FILE: &str = "bundle.toml.sig";

const ALGORITHM: &str = "ed25519";
const SEAL_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;

/// Detached signature over a package definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageSignature {
    /// Signature algorithm (currently only "ed25519")
    pub algorithm: String,
    /// Base64-encoded signature bytes
    pub signature: String,
    /// Base64-encoded public key
    pub public_key: String,
    /// Optional key identifier (fingerprint or name)
    #[serde(default)]
    pub key_id: Option<String>,
    /// Timestamp when signed (RFC 3339)
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Outcome of checking a layout's signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    Unsigned,
    Verified { key_id: Option<String> },
    /// Caller asked to skip verification (read-only inspection)
    Skipped,
}

/// A signing key pair for packages
pub struct SigningKeyPair {
    signing_key: SigningKey,
    key_id: Option<String>,
}

impl SigningKeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
            key_id: None,
        }
    }

    /// Set a human-readable key identifier
    pub fn with_key_id(mut self, id: &str) -> Self {
        self.key_id = Some(id.to_string());
        self
    }

    /// Get the public key
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Get the public key as base64
    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.verifying_key().as_bytes())
    }

    /// Get the key ID
    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    /// Sign content and return a PackageSignature
    pub fn sign(&self, content: &[u8]) -> PackageSignature {
        let signature = self.signing_key.sign(content);

        PackageSignature {
            algorithm: ALGORITHM.to_string(),
            signature: BASE64.encode(signature.to_bytes()),
            public_key: self.public_key_base64(),
            key_id: self.key_id.clone(),
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    /// Save the key pair to files, sealing the private key when a password is given
    pub fn save_to_files(
        &self,
        private_path: &Path,
        public_path: &Path,
        password: Option<&str>,
    ) -> Result<()> {
        let secret = self.signing_key.to_bytes();
        let private_data = match password {
            Some(password) => {
                let (sealed, params) = seal(&secret, password)?;
                KeyFile {
                    algorithm: ALGORITHM.to_string(),
                    key: BASE64.encode(sealed),
                    key_id: self.key_id.clone(),
                    sealed: Some(params),
                }
            }
            None => KeyFile {
                algorithm: ALGORITHM.to_string(),
                key: BASE64.encode(secret),
                key_id: self.key_id.clone(),
                sealed: None,
            },
        };
        fs::write(private_path, toml::to_string_pretty(&private_data)?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(private_path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(private_path, perms)?;
        }

        let public_data = KeyFile {
            algorithm: ALGORITHM.to_string(),
            key: self.public_key_base64(),
            key_id: self.key_id.clone(),
            sealed: None,
        };
        fs::write(public_path, toml::to_string_pretty(&public_data)?)?;

        debug!(
            "Wrote key pair {} / {}",
            private_path.display(),
            public_path.display()
        );
        Ok(())
    }

    /// Load a key pair from a private key file
    pub fn load_from_file(path: &Path, password: Option<&str>) -> Result<Self> {
        let key_file = read_key_file(path)?;
        let raw = BASE64
            .decode(&key_file.key)
            .map_err(|e| Error::Key(format!("invalid base64 in {}: {}", path.display(), e)))?;

        let key_bytes = match (&key_file.sealed, password) {
            (Some(params), Some(password)) => unseal(raw, params, password)?,
            (Some(_), None) => {
                return Err(Error::Key(format!(
                    "{} is password protected but no password was provided",
                    path.display()
                )));
            }
            (None, _) => raw,
        };

        let key_array: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| Error::Key("invalid key length".to_string()))?;

        Ok(Self {
            signing_key: SigningKey::from_bytes(&key_array),
            key_id: key_file.key_id,
        })
    }
}

/// Key file format
#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    algorithm: String,
    key: String,
    #[serde(default)]
    key_id: Option<String>,
    #[serde(default)]
    sealed: Option<SealParams>,
}

/// Parameters needed to unseal a password-protected private key
#[derive(Debug, Serialize, Deserialize)]
struct SealParams {
    salt: String,
    nonce: String,
    iterations: u32,
}

fn read_key_file(path: &Path) -> Result<KeyFile> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Key(format!("failed to read key {}: {}", path.display(), e)))?;
    let key_file: KeyFile = toml::from_str(&content)
        .map_err(|e| Error::Key(format!("failed to parse key {}: {}", path.display(), e)))?;

    if key_file.algorithm != ALGORITHM {
        return Err(Error::Key(format!(
            "unsupported key algorithm: {}",
            key_file.algorithm
        )));
    }
    Ok(key_file)
}

fn derive_key(password: &str, salt: &[u8], iterations: u32) -> Result<LessSafeKey> {
    let iterations = NonZeroU32::new(iterations)
        .ok_or_else(|| Error::Key("seal iterations must be non-zero".to_string()))?;
    let mut key = [0u8; 32];
    ring::pbkdf2::derive(
        ring::pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt,
        password.as_bytes(),
        &mut key,
    );
    let unbound = UnboundKey::new(&aead::AES_256_GCM, &key)
        .map_err(|_| Error::Key("failed to create sealing key".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}

fn seal(secret: &[u8], password: &str) -> Result<(Vec<u8>, SealParams)> {
    let rng = SystemRandom::new();
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; aead::NONCE_LEN];
    rng.fill(&mut salt)
        .map_err(|_| Error::Key("failed to generate salt".to_string()))?;
    rng.fill(&mut nonce)
        .map_err(|_| Error::Key("failed to generate nonce".to_string()))?;

    let key = derive_key(password, &salt, SEAL_ITERATIONS)?;
    let mut in_out = secret.to_vec();
    key.seal_in_place_append_tag(
        Nonce::assume_unique_for_key(nonce),
        Aad::from(ALGORITHM.as_bytes()),
        &mut in_out,
    )
    .map_err(|_| Error::Key("failed to seal private key".to_string()))?;

    Ok((
        in_out,
        SealParams {
            salt: BASE64.encode(salt),
            nonce: BASE64.encode(nonce),
            iterations: SEAL_ITERATIONS,
        },
    ))
}

fn unseal(mut sealed: Vec<u8>, params: &SealParams, password: &str) -> Result<Vec<u8>> {
    let salt = BASE64
        .decode(&params.salt)
        .map_err(|e| Error::Key(format!("invalid salt: {}", e)))?;
    let nonce: [u8; aead::NONCE_LEN] = BASE64
        .decode(&params.nonce)
        .map_err(|e| Error::Key(format!("invalid nonce: {}", e)))?
        .try_into()
        .map_err(|_| Error::Key("invalid nonce length".to_string()))?;

    let key = derive_key(password, &salt, params.iterations)?;
    let plaintext = key
        .open_in_place(
            Nonce::assume_unique_for_key(nonce),
            Aad::from(ALGORITHM.as_bytes()),
            &mut sealed,
        )
        .map_err(|_| Error::Key("wrong password or corrupted private key".to_string()))?;
    Ok(plaintext.to_vec())
}

/// Load a public key from a key file
pub fn load_public_key(path: &Path) -> Result<VerifyingKey> {
    let key_file = read_key_file(path)?;
    let bytes: [u8; 32] = BASE64
        .decode(&key_file.key)
        .map_err(|e| Error::Key(format!("invalid base64 in {}: {}", path.display(), e)))?
        .try_into()
        .map_err(|_| Error::Key("invalid public key length".to_string()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| Error::Key(e.to_string()))
}

/// Verify a signature over content with a trusted key
pub fn verify_signature(
    content: &[u8],
    signature: &PackageSignature,
    key: &VerifyingKey,
) -> Result<()> {
    if signature.algorithm != ALGORITHM {
        return Err(Error::InvalidSignatureFormat(format!(
            "unsupported algorithm: {}",
            signature.algorithm
        )));
    }

    let sig_bytes = BASE64
        .decode(&signature.signature)
        .map_err(|e| Error::InvalidSignatureFormat(e.to_string()))?;
    let sig = Signature::from_slice(&sig_bytes)
        .map_err(|e| Error::InvalidSignatureFormat(e.to_string()))?;

    key.verify_strict(content, &sig)
        .map_err(|e| Error::SignatureInvalid(e.to_string()))
}

/// Check the detached signature of a layout directory
///
/// A signed layout must be verified; no key is a hard error. A key supplied
/// for an unsigned layout is only worth a warning.
pub fn verify_definition(
    dir: &Path,
    definition: &[u8],
    public_key_path: Option<&Path>,
) -> Result<SignatureStatus> {
    let sig_path = dir.join(SIGNATURE_FILE);
    if !sig_path.is_file() {
        if public_key_path.is_some() {
            warn!("A public key was provided but the package is not signed");
        }
        return Ok(SignatureStatus::Unsigned);
    }

    let Some(key_path) = public_key_path else {
        return Err(Error::SignedWithoutKey);
    };

    let signature: PackageSignature = serde_json::from_slice(&fs::read(&sig_path)?)
        .map_err(|e| Error::InvalidSignatureFormat(e.to_string()))?;
    let key = load_public_key(key_path)?;
    verify_signature(definition, &signature, &key)?;

    debug!(
        "Verified package signature (key id: {})",
        signature.key_id.as_deref().unwrap_or("none")
    );
    Ok(SignatureStatus::Verified {
        key_id: signature.key_id,
    })
}

/// Sign a layout in place
///
/// Marks the on-disk definition as signed, rewrites it, and writes the
/// detached signature over the new bytes.
pub fn sign_layout(
    layout: &mut PackageLayout,
    key_path: &Path,
    password: Option<&str>,
) -> Result<PackageSignature> {
    let keypair = SigningKeyPair::load_from_file(key_path, password)?;

    let definition_path = layout.dir().join(DEFINITION_FILE);
    let mut package = Package::from_file(&definition_path)?;
    package.build.signed = true;
    let definition = package.to_toml()?;
    fs::write(&definition_path, &definition)?;

    let signature = keypair.sign(definition.as_bytes());
    fs::write(
        layout.dir().join(SIGNATURE_FILE),
        serde_json::to_vec_pretty(&signature)?,
    )?;
    layout.package.build.signed = true;

    info!(
        "Signed package {} {}",
        package.metadata.name, package.metadata.version
    );
    Ok(signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn keypair_files(dir: &Path, password: Option<&str>) -> (SigningKeyPair, std::path::PathBuf, std::path::PathBuf) {
        let private_path = dir.join("key.private");
        let public_path = dir.join("key.public");
        let keypair = SigningKeyPair::generate().with_key_id("test-key");
        keypair
            .save_to_files(&private_path, &public_path, password)
            .unwrap();
        (keypair, private_path, public_path)
    }

    #[test]
    fn test_generate_and_sign() {
        let keypair = SigningKeyPair::generate().with_key_id("test-key");
        let content = b"test definition content";
        let signature = keypair.sign(content);

        assert_eq!(signature.algorithm, "ed25519");
        assert!(signature.timestamp.is_some());
        assert_eq!(signature.key_id, Some("test-key".to_string()));
        verify_signature(content, &signature, &keypair.verifying_key()).unwrap();
    }

    #[test]
    fn test_tampered_content_fails() {
        let keypair = SigningKeyPair::generate();
        let signature = keypair.sign(b"original");
        let err = verify_signature(b"modified", &signature, &keypair.verifying_key()).unwrap_err();
        assert!(matches!(err, Error::SignatureInvalid(_)));
    }

    #[test]
    fn test_wrong_key_fails() {
        let signature = SigningKeyPair::generate().sign(b"content");
        let other = SigningKeyPair::generate();
        assert!(verify_signature(b"content", &signature, &other.verifying_key()).is_err());
    }

    #[test]
    fn test_save_and_load_plain() {
        let temp_dir = TempDir::new().unwrap();
        let (keypair, private_path, public_path) = keypair_files(temp_dir.path(), None);

        let loaded = SigningKeyPair::load_from_file(&private_path, None).unwrap();
        assert_eq!(loaded.public_key_base64(), keypair.public_key_base64());
        assert_eq!(loaded.key_id(), Some("test-key"));

        let public = load_public_key(&public_path).unwrap();
        assert_eq!(public, keypair.verifying_key());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&private_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_sealed_key_requires_password() {
        let temp_dir = TempDir::new().unwrap();
        let (keypair, private_path, _) = keypair_files(temp_dir.path(), Some("hunter2"));

        let content = fs::read_to_string(&private_path).unwrap();
        assert!(content.contains("[sealed]"));

        assert!(SigningKeyPair::load_from_file(&private_path, None).is_err());
        assert!(SigningKeyPair::load_from_file(&private_path, Some("wrong")).is_err());

        let loaded = SigningKeyPair::load_from_file(&private_path, Some("hunter2")).unwrap();
        assert_eq!(loaded.public_key_base64(), keypair.public_key_base64());
    }

    #[test]
    fn test_verify_definition_states() {
        let temp_dir = TempDir::new().unwrap();
        let layout_dir = temp_dir.path().join("layout");
        fs::create_dir(&layout_dir).unwrap();
        let (keypair, _, public_path) = keypair_files(temp_dir.path(), None);
        let definition = b"[metadata]\nname = \"x\"\n";

        // Unsigned, with or without a key
        assert_eq!(
            verify_definition(&layout_dir, definition, None).unwrap(),
            SignatureStatus::Unsigned
        );
        assert_eq!(
            verify_definition(&layout_dir, definition, Some(&public_path)).unwrap(),
            SignatureStatus::Unsigned
        );

        let signature = keypair.sign(definition);
        fs::write(
            layout_dir.join(SIGNATURE_FILE),
            serde_json::to_vec(&signature).unwrap(),
        )
        .unwrap();

        let err = verify_definition(&layout_dir, definition, None).unwrap_err();
        assert_eq!(err.to_string(), "package is signed but no key was provided");

        let status = verify_definition(&layout_dir, definition, Some(&public_path)).unwrap();
        assert_eq!(
            status,
            SignatureStatus::Verified {
                key_id: Some("test-key".to_string())
            }
        );

        assert!(verify_definition(&layout_dir, b"tampered", Some(&public_path)).is_err());
    }
}
