//! AEAD secure channel for device payloads.
//!
//! Payloads exchanged with a paired device are protected with
//! AES-256-GCM under the device's derived encryption key. Each message
//! carries a fresh 96-bit nonce; the transport envelope is
//! `base64(nonce || ciphertext || tag)`. Nonce reuse under one key would
//! void both confidentiality and integrity, so nonces are always drawn
//! from the OS RNG at encryption time and never supplied by callers.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CryptoError;

/// AES-GCM nonce size in bytes.
const NONCE_LEN: usize = 12;

/// GCM authentication tag size in bytes.
const TAG_LEN: usize = 16;

/// Symmetric AEAD channel bound to one derived key.
pub struct SecureChannel {
    cipher: Aes256Gcm,
}

impl SecureChannel {
    /// Build a channel from a 32-byte derived key.
    pub fn new(key: &[u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypt a plaintext into a transport envelope.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        Ok(BASE64.encode([nonce.as_slice(), &ciphertext].concat()))
    }

    /// Decrypt a transport envelope back into the plaintext.
    ///
    /// Fails with [`CryptoError::DecryptionFailed`] on a tampered or
    /// truncated envelope or a wrong key — never returns altered bytes.
    pub fn decrypt(&self, envelope: &str) -> Result<Vec<u8>, CryptoError> {
        let raw = BASE64
            .decode(envelope)
            .map_err(|e| CryptoError::InvalidEnvelope(format!("not base64: {e}")))?;

        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::InvalidEnvelope(format!(
                "envelope too short: {} bytes",
                raw.len()
            )));
        }

        let nonce = Nonce::from_slice(&raw[..NONCE_LEN]);
        self.cipher
            .decrypt(nonce, &raw[NONCE_LEN..])
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    /// Serialize a value to JSON and encrypt it.
    pub fn encrypt_json<T: Serialize>(&self, value: &T) -> Result<String, CryptoError> {
        let plaintext = serde_json::to_vec(value)?;
        self.encrypt(&plaintext)
    }

    /// Decrypt an envelope and deserialize the JSON plaintext.
    pub fn decrypt_json<T: DeserializeOwned>(&self, envelope: &str) -> Result<T, CryptoError> {
        let plaintext = self.decrypt(envelope)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn channel() -> SecureChannel {
        SecureChannel::new(&[7u8; 32])
    }

    #[test]
    fn test_round_trip_utf8() {
        let ch = channel();
        let envelope = ch.encrypt("hello from the bridge".as_bytes()).unwrap();
        let plaintext = ch.decrypt(&envelope).unwrap();
        assert_eq!(plaintext, b"hello from the bridge");
    }

    #[test]
    fn test_round_trip_empty_and_embedded_nul() {
        let ch = channel();

        let empty = ch.encrypt(b"").unwrap();
        assert_eq!(ch.decrypt(&empty).unwrap(), b"");

        let with_nul = b"voice\0memo\0payload";
        let envelope = ch.encrypt(with_nul).unwrap();
        assert_eq!(ch.decrypt(&envelope).unwrap(), with_nul);
    }

    #[test]
    fn test_fresh_nonce_per_message() {
        let ch = channel();
        let a = ch.encrypt(b"same plaintext").unwrap();
        let b = ch.encrypt(b"same plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_every_flipped_byte_fails_authentication() {
        let ch = channel();
        let envelope = ch.encrypt(b"integrity matters").unwrap();
        let mut raw = BASE64.decode(&envelope).unwrap();

        for i in 0..raw.len() {
            raw[i] ^= 0x01;
            let tampered = BASE64.encode(&raw);
            assert!(
                ch.decrypt(&tampered).is_err(),
                "byte {i} flip went undetected"
            );
            raw[i] ^= 0x01;
        }
    }

    #[test]
    fn test_truncated_envelope_is_rejected() {
        let ch = channel();
        let err = ch.decrypt(&BASE64.encode([0u8; 8])).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidEnvelope(_)));
    }

    #[test]
    fn test_garbage_envelope_is_rejected() {
        let ch = channel();
        assert!(matches!(
            ch.decrypt("%%not-base64%%"),
            Err(CryptoError::InvalidEnvelope(_))
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let envelope = channel().encrypt(b"secret").unwrap();
        let other = SecureChannel::new(&[8u8; 32]);
        assert!(matches!(
            other.decrypt(&envelope),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let ch = channel();
        let value = serde_json::json!({
            "kind": "memo",
            "text": "remind me to water the plants",
            "tags": ["home", "recurring"],
        });

        let envelope = ch.encrypt_json(&value).unwrap();
        let decoded: serde_json::Value = ch.decrypt_json(&envelope).unwrap();
        assert_eq!(decoded, value);
    }
}
