//! Request authentication: replay protection and signature verification.

pub mod nonce;
pub mod verifier;

pub use nonce::NonceStore;
pub use verifier::{AuthHeaders, RequestAuthenticator, canonical_string, compute_signature, is_exempt};
