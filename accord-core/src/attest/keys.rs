//! Ed25519 attestation keys
//!
//! Private keys are stored as PKCS#8 PEM, public keys as SPKI PEM. The key id
//! defaults to the first 16 hex characters of SHA-256 over the public key's
//! SubjectPublicKeyInfo DER encoding.

use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use super::error::AttestError;
use crate::canonical::sha256_hex;

pub const PRIVATE_KEY_FILE: &str = "ed25519.key";
pub const PUBLIC_KEY_FILE: &str = "ed25519.pub";

const LINE_ENDING: LineEnding = LineEnding::LF;

/// Key id for a public key: SHA-256 of its SPKI DER, truncated to 16 hex chars
pub fn fingerprint(verifying_key: &VerifyingKey) -> Result<String, AttestError> {
    let der = verifying_key
        .to_public_key_der()
        .map_err(|e| AttestError::KeyEncode(e.to_string()))?;
    let digest = sha256_hex(der.as_bytes());
    Ok(digest[..16].to_string())
}

/// A signing key plus the id recorded in envelope signatures
pub struct AttestationKey {
    signing_key: SigningKey,
    key_id: String,
}

impl std::fmt::Debug for AttestationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttestationKey")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl AttestationKey {
    pub fn generate() -> Result<Self, AttestError> {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Result<Self, AttestError> {
        let key_id = fingerprint(&signing_key.verifying_key())?;
        Ok(Self {
            signing_key,
            key_id,
        })
    }

    /// Deterministic key from a 32-byte seed
    pub fn from_seed(seed: [u8; 32]) -> Result<Self, AttestError> {
        Self::from_signing_key(SigningKey::from_bytes(&seed))
    }

    /// Override the fingerprint-derived key id
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        let key_id = key_id.into();
        if !key_id.is_empty() {
            self.key_id = key_id;
        }
        self
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    pub fn from_pkcs8_pem(pem: &str, origin: &Path) -> Result<Self, AttestError> {
        let signing_key = SigningKey::from_pkcs8_pem(pem).map_err(|e| AttestError::KeyParse {
            path: origin.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_signing_key(signing_key)
    }

    pub fn load(path: &Path) -> Result<Self, AttestError> {
        let pem = fs::read_to_string(path).map_err(|source| AttestError::KeyRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_pkcs8_pem(&pem, path)
    }

    pub fn to_pkcs8_pem(&self) -> Result<String, AttestError> {
        self.signing_key
            .to_pkcs8_pem(LINE_ENDING)
            .map(|pem| pem.to_string())
            .map_err(|e| AttestError::KeyEncode(e.to_string()))
    }

    pub fn public_key_pem(&self) -> Result<String, AttestError> {
        self.verifying_key()
            .to_public_key_pem(LINE_ENDING)
            .map_err(|e| AttestError::KeyEncode(e.to_string()))
    }
}

pub fn parse_verifying_key(pem: &str, origin: &Path) -> Result<VerifyingKey, AttestError> {
    VerifyingKey::from_public_key_pem(pem).map_err(|e| AttestError::KeyParse {
        path: origin.to_path_buf(),
        reason: e.to_string(),
    })
}

pub fn load_verifying_key(path: &Path) -> Result<VerifyingKey, AttestError> {
    let pem = fs::read_to_string(path).map_err(|source| AttestError::KeyRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_verifying_key(&pem, path)
}

/// Paths written by [`keygen`]
#[derive(Debug, Clone)]
pub struct KeyPaths {
    pub private_key: PathBuf,
    pub public_key: PathBuf,
    pub key_id: String,
}

fn write_key_file(path: &Path, contents: &str, private: bool) -> Result<(), AttestError> {
    let write_err = |source| AttestError::KeyWrite {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    fs::write(path, contents).map_err(write_err)?;
    if private {
        restrict_permissions(path).map_err(write_err)?;
    }
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Generate a key pair into `dir` as `ed25519.key` / `ed25519.pub`
pub fn keygen(dir: &Path, force: bool) -> Result<KeyPaths, AttestError> {
    let private_key = dir.join(PRIVATE_KEY_FILE);
    let public_key = dir.join(PUBLIC_KEY_FILE);
    if !force {
        for path in [&private_key, &public_key] {
            if path.exists() {
                return Err(AttestError::KeyExists { path: path.clone() });
            }
        }
    }

    let key = AttestationKey::generate()?;
    write_key_file(&private_key, &key.to_pkcs8_pem()?, true)?;
    write_key_file(&public_key, &key.public_key_pem()?, false)?;

    info!(key_id = %key.key_id(), dir = %dir.display(), "generated attestation key");
    Ok(KeyPaths {
        private_key,
        public_key,
        key_id: key.key_id().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::Verifier;
    use tempfile::TempDir;

    #[test]
    fn test_keygen_roundtrip() {
        let dir = TempDir::new().unwrap();
        let paths = keygen(dir.path(), false).unwrap();

        let key = AttestationKey::load(&paths.private_key).unwrap();
        let public = load_verifying_key(&paths.public_key).unwrap();
        assert_eq!(key.verifying_key(), public);
        assert_eq!(key.key_id(), paths.key_id);
        assert_eq!(paths.key_id.len(), 16);

        let sig = key.sign(b"message");
        assert!(public.verify(b"message", &sig).is_ok());
    }

    #[test]
    fn test_keygen_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        keygen(dir.path(), false).unwrap();
        let err = keygen(dir.path(), false).unwrap_err();
        assert!(matches!(err, AttestError::KeyExists { .. }));
        keygen(dir.path(), true).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_private_key_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let paths = keygen(dir.path(), false).unwrap();
        let mode = fs::metadata(&paths.private_key).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = AttestationKey::from_seed([7u8; 32]).unwrap();
        let b = AttestationKey::from_seed([7u8; 32]).unwrap();
        let c = AttestationKey::from_seed([8u8; 32]).unwrap();
        assert_eq!(a.key_id(), b.key_id());
        assert_ne!(a.key_id(), c.key_id());
        assert_eq!(a.with_key_id("ops-2026").key_id(), "ops-2026");
    }

    #[test]
    fn test_garbage_key_is_parse_error() {
        let err = parse_verifying_key("not a pem", Path::new("k.pub")).unwrap_err();
        assert_eq!(err.error_code(), crate::ErrorCode::SigInvalid);
    }
}
