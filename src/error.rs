//! Error types for deskbridge.

/// Top-level error type for the bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Match error: {0}")]
    Match(#[from] MatchError),

    #[error("Forward error: {0}")]
    Forward(#[from] ForwardError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Could not resolve a data directory for this platform")]
    NoDataDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Request authentication failures.
///
/// Every variant maps to HTTP 401 with a machine-readable kind. The
/// message for `UnknownDevice` deliberately covers both "never paired"
/// and "expired", so callers cannot probe which device ids exist.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Missing or malformed authentication headers")]
    MalformedAuthHeader,

    #[error("Request timestamp outside acceptance window ({skew_secs}s skew)")]
    StaleTimestamp { skew_secs: i64 },

    #[error("Nonce has already been used")]
    ReplayDetected,

    #[error("Device is not paired or its pairing has expired")]
    UnknownDevice,

    #[error("Request signature did not verify")]
    InvalidSignature,
}

impl AuthError {
    /// Stable machine-readable kind for API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MalformedAuthHeader => "malformed_auth_header",
            AuthError::StaleTimestamp { .. } => "stale_timestamp",
            AuthError::ReplayDetected => "replay_detected",
            AuthError::UnknownDevice => "unknown_device",
            AuthError::InvalidSignature => "invalid_signature",
        }
    }
}

/// Errors from the AEAD secure channel and key handling.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Decryption failed: envelope did not authenticate")]
    DecryptionFailed,

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Invalid ciphertext envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from persistent stores (identity, devices, confirmed mappings).
///
/// Writes are temp-file-then-rename, so a failed save never leaves a
/// half-written file behind.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Stored file at {path} is corrupt: {message}")]
    Corrupt { path: String, message: String },
}

impl StorageError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Session discovery and cache errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    #[error("Session scan failed: {0}")]
    ScanFailed(String),
}

/// Terminal/session matching errors.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("No confirmed mapping for fingerprint: {fingerprint}")]
    MappingNotFound { fingerprint: String },

    #[error("Window enumeration failed: {0}")]
    WindowEnumerationFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Failures forwarding payloads to the local message sink.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("Message sink unreachable after {attempts} attempts: {last_error}")]
    SinkUnavailable { attempts: u32, last_error: String },

    #[error("Sink rejected payload with status {status}")]
    SinkRejected { status: u16 },
}
