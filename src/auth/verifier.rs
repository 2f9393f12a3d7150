//! Inbound request verification.
//!
//! A paired device signs every request with a keyed MAC over a canonical
//! string of the request's method, path, timestamp, nonce, and body
//! digest. Verification checks, in order: header shape, timestamp
//! freshness, nonce uniqueness, device key availability, and finally the
//! MAC itself in constant time. The ordering keeps the cheap rejections
//! first and records the nonce before any signature work, so a replayed
//! request is refused even when its signature is perfectly valid.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, Method};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::auth::nonce::NonceStore;
use crate::error::AuthError;
use crate::pairing::DeviceRegistry;

type HmacSha256 = Hmac<Sha256>;

/// Paths reachable without authentication.
///
/// The pairing handshake cannot require prior authentication, and health
/// probes must work before any device is paired.
const EXEMPT: &[(&str, &str)] = &[("GET", "/health"), ("POST", "/pair"), ("GET", "/pair/pending")];

/// Whether a (method, path) pair is exempt from authentication.
pub fn is_exempt(method: &Method, path: &str) -> bool {
    if EXEMPT
        .iter()
        .any(|(m, p)| *m == method.as_str() && *p == path)
    {
        return true;
    }

    // Approve/reject carry the device id as a path segment.
    method == Method::POST
        && path.starts_with("/pair/")
        && (path.ends_with("/approve") || path.ends_with("/reject"))
}

/// Authentication metadata extracted from request headers.
#[derive(Debug, Clone)]
pub struct AuthHeaders {
    pub device_id: String,
    pub timestamp: i64,
    pub nonce: String,
    pub signature: String,
}

impl AuthHeaders {
    /// Pull the four required headers out of a header map.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AuthError> {
        let get = |name: &str| -> Result<&str, AuthError> {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .ok_or(AuthError::MalformedAuthHeader)
        };

        let timestamp = get("x-timestamp")?
            .parse::<i64>()
            .map_err(|_| AuthError::MalformedAuthHeader)?;

        Ok(Self {
            device_id: get("x-device-id")?.to_string(),
            timestamp,
            nonce: get("x-nonce")?.to_string(),
            signature: get("x-signature")?.to_string(),
        })
    }
}

/// Build the canonical string a request signature covers.
pub fn canonical_string(
    method: &str,
    path: &str,
    timestamp: i64,
    nonce: &str,
    body: &[u8],
) -> String {
    let body_digest = hex::encode(Sha256::digest(body));
    format!("{method}\n{path}\n{timestamp}\n{nonce}\n{body_digest}")
}

/// Compute the hex HMAC-SHA256 signature for a canonical string.
pub fn compute_signature(key: &[u8; 32], canonical: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(canonical.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies that requests originate from paired devices and are not
/// replays.
pub struct RequestAuthenticator {
    registry: Arc<DeviceRegistry>,
    nonces: NonceStore,
    timestamp_window: Duration,
}

impl RequestAuthenticator {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        nonces: NonceStore,
        timestamp_window: Duration,
    ) -> Self {
        Self {
            registry,
            nonces,
            timestamp_window,
        }
    }

    /// Verify one request. Returns the authenticated device id.
    pub async fn verify(
        &self,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<String, AuthError> {
        let auth = AuthHeaders::from_headers(headers)?;

        let skew_secs = (Utc::now().timestamp() - auth.timestamp).abs();
        if skew_secs > self.timestamp_window.as_secs() as i64 {
            return Err(AuthError::StaleTimestamp { skew_secs });
        }

        if !self.nonces.check(&auth.nonce) {
            return Err(AuthError::ReplayDetected);
        }

        // Fail closed: a storage fault during lookup denies the request
        // rather than letting it through unverified.
        let key = match self.registry.get_device_auth_key(&auth.device_id).await {
            Ok(Some(key)) => key,
            Ok(None) => return Err(AuthError::UnknownDevice),
            Err(e) => {
                tracing::error!(error = %e, "Device store unavailable during auth");
                return Err(AuthError::UnknownDevice);
            }
        };

        let canonical =
            canonical_string(method.as_str(), path, auth.timestamp, &auth.nonce, body);
        let expected = compute_signature(&key, &canonical);

        let supplied = hex::decode(&auth.signature).map_err(|_| AuthError::InvalidSignature)?;
        let expected_raw = hex::decode(&expected).expect("computed signature is hex");
        if !bool::from(supplied.ct_eq(&expected_raw)) {
            return Err(AuthError::InvalidSignature);
        }

        if let Err(e) = self.registry.update_last_seen(&auth.device_id).await {
            tracing::warn!(device_id = %auth.device_id, error = %e, "Failed to record device activity");
        }

        Ok(auth.device_id)
    }

    /// The replay cache, exposed for observability.
    pub fn nonces(&self) -> &NonceStore {
        &self.nonces
    }
}
