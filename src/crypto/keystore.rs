//! Host identity key management.
//!
//! The bridge's durable identity is a single x25519 key pair, created
//! lazily on first use and persisted as hex-encoded JSON under the data
//! directory. Per-device symmetric keys are derived from the x25519
//! shared secret with HKDF-SHA256, bound to a purpose string so the
//! authentication and encryption keys can never be confused for each
//! other.

use std::path::PathBuf;

use hkdf::Hkdf;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{CryptoError, StorageError};
use crate::storage;

/// What a derived per-device key will be used for.
///
/// The purpose feeds the HKDF info parameter, giving each use a distinct
/// key from the same agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPurpose {
    /// Keyed MAC over request metadata.
    Auth,
    /// AEAD payload encryption.
    Encrypt,
}

impl KeyPurpose {
    fn info(self) -> &'static [u8] {
        match self {
            KeyPurpose::Auth => b"deskbridge-auth",
            KeyPurpose::Encrypt => b"deskbridge-encrypt",
        }
    }
}

/// The host's long-term asymmetric identity.
///
/// The private half never leaves this struct; `Debug` prints only the
/// public key.
#[derive(Clone)]
pub struct HostIdentity {
    secret: StaticSecret,
    public: PublicKey,
}

impl std::fmt::Debug for HostIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostIdentity")
            .field("public_key", &hex::encode(self.public.as_bytes()))
            .finish_non_exhaustive()
    }
}

impl HostIdentity {
    fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Hex-encoded public key, as handed to pairing devices.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public.as_bytes())
    }

    /// Derive a 32-byte symmetric key for `purpose` shared with the
    /// device that owns `device_public_hex`.
    ///
    /// Rejects malformed public keys and the all-zero shared secret a
    /// low-order point would produce.
    pub fn derive_device_key(
        &self,
        device_public_hex: &str,
        purpose: KeyPurpose,
    ) -> Result<[u8; 32], CryptoError> {
        let device_public = parse_public_key(device_public_hex)?;
        let shared = self.secret.diffie_hellman(&device_public);

        if bool::from(shared.as_bytes().ct_eq(&[0u8; 32])) {
            return Err(CryptoError::InvalidKey(
                "key agreement produced a degenerate shared secret".to_string(),
            ));
        }

        let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
        let mut okm = [0u8; 32];
        hk.expand(purpose.info(), &mut okm)
            .expect("32 bytes is a valid HKDF-SHA256 output length");
        Ok(okm)
    }
}

/// Parse a hex-encoded x25519 public key.
pub fn parse_public_key(public_hex: &str) -> Result<PublicKey, CryptoError> {
    let bytes = hex::decode(public_hex)
        .map_err(|e| CryptoError::InvalidKey(format!("public key is not hex: {e}")))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("public key must be 32 bytes".to_string()))?;
    Ok(PublicKey::from(bytes))
}

/// On-disk form of the key pair.
#[derive(Serialize, Deserialize)]
struct StoredKeyPair {
    private_key: String,
    public_key: String,
}

/// Loads, creates, and deletes the persisted host identity.
pub struct KeyStore {
    path: PathBuf,
}

impl KeyStore {
    /// Create a key store backed by the given file path.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load the persisted identity, or generate and persist a fresh one.
    ///
    /// Idempotent across restarts. A generated identity that cannot be
    /// persisted is not returned — the caller must not rely on an
    /// identity that would vanish on restart.
    pub async fn get_or_create(&self) -> Result<HostIdentity, StorageError> {
        if let Some(stored) = storage::read_json::<StoredKeyPair>(&self.path).await? {
            return self.decode(stored);
        }

        let identity = HostIdentity::generate();
        let stored = StoredKeyPair {
            private_key: hex::encode(identity.secret.as_bytes()),
            public_key: identity.public_key_hex(),
        };
        storage::write_json_atomic(&self.path, &stored).await?;
        storage::restrict_permissions(&self.path).await?;

        tracing::info!(
            public_key = %identity.public_key_hex(),
            "Generated new host identity"
        );
        Ok(identity)
    }

    /// Remove the persisted key pair.
    ///
    /// Returns whether a file was deleted. The next `get_or_create`
    /// mints a fresh identity, invalidating every existing pairing.
    pub async fn delete_persisted(&self) -> Result<bool, StorageError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::warn!("Host identity deleted; all pairings are now invalid");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(self.path.display().to_string(), e)),
        }
    }

    fn decode(&self, stored: StoredKeyPair) -> Result<HostIdentity, StorageError> {
        let corrupt = |message: String| StorageError::Corrupt {
            path: self.path.display().to_string(),
            message,
        };

        let bytes = hex::decode(&stored.private_key)
            .map_err(|e| corrupt(format!("private key is not hex: {e}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| corrupt("private key must be 32 bytes".to_string()))?;

        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);

        // The stored public key is derived data; a mismatch means the
        // file was hand-edited or truncated.
        if hex::encode(public.as_bytes()) != stored.public_key {
            return Err(corrupt(
                "stored public key does not match private key".to_string(),
            ));
        }

        Ok(HostIdentity { secret, public })
    }
}
