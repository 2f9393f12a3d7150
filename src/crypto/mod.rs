//! Cryptographic primitives for the bridge.
//!
//! The host holds a long-term x25519 identity ([`keystore`]). Per-device
//! symmetric keys are derived from the x25519 agreement with a
//! purpose-specific HKDF step, and payloads are protected with
//! AES-256-GCM ([`channel`]).

pub mod channel;
pub mod keystore;

pub use channel::SecureChannel;
pub use keystore::{HostIdentity, KeyPurpose, KeyStore};
