//! Bridge configuration.
//!
//! All knobs are environment-driven with sensible defaults so the binary
//! runs with zero configuration. Tests construct `BridgeConfig` directly
//! and point `data_dir`/`session_root` at temp directories.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Tunable weights for the fuzzy matcher.
///
/// These are heuristics, not contracts. The defaults are chosen so a
/// folder-name hit on a recently active session clears the confidence
/// threshold on its own, while path fragments need corroboration.
#[derive(Debug, Clone)]
pub struct MatchWeights {
    /// Score for the session's folder name appearing in the window title.
    pub folder_name_hit: u8,
    /// Score per project path component found in the window title.
    pub path_component_hit: u8,
    /// Cap on accumulated path-component score.
    pub path_component_cap: u8,
    /// Maximum recency bonus; decays linearly to zero over `recency_horizon`.
    pub recency_max: u8,
    /// Age at which the recency bonus reaches zero.
    pub recency_horizon: Duration,
    /// Bonus for sessions with a live (recently written) transcript.
    pub live_bonus: u8,
    /// Bonus when exactly one terminal matches the session.
    pub uniqueness_bonus: u8,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            folder_name_hit: 45,
            path_component_hit: 12,
            path_component_cap: 24,
            recency_max: 20,
            recency_horizon: Duration::from_secs(24 * 3600),
            live_bonus: 8,
            uniqueness_bonus: 15,
        }
    }
}

/// Top-level configuration for the bridge daemon.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address the HTTP bridge binds to.
    pub bind_addr: SocketAddr,
    /// Per-user application data directory (identity, devices, mappings).
    pub data_dir: PathBuf,
    /// Days of inactivity after which a paired device expires.
    pub device_expiry_days: i64,
    /// Acceptance window for request timestamps, either side of now.
    pub timestamp_window: Duration,
    /// How long a consumed nonce is remembered.
    pub nonce_ttl: Duration,
    /// Entry count that triggers an eager nonce sweep.
    pub nonce_max_size: usize,
    /// Minimum interval between periodic nonce sweeps.
    pub nonce_cleanup_interval: Duration,
    /// Root directory scanned for work-session transcripts.
    pub session_root: PathBuf,
    /// Session cache staleness threshold and background poll interval.
    pub session_poll: Duration,
    /// Transcript mtime window within which a session counts as live.
    pub session_live_window: Duration,
    /// Match summary staleness threshold.
    pub match_stale: Duration,
    /// Minimum confidence for an algorithmic match to be reported.
    pub match_min_confidence: u8,
    /// Fuzzy matcher scoring weights.
    pub match_weights: MatchWeights,
    /// Base URL of the local message sink.
    pub sink_url: String,
    /// Maximum delivery attempts against the sink.
    pub forward_max_attempts: u32,
    /// Base delay for forward retry backoff.
    pub forward_base_delay: Duration,
    /// Whether loopback peers bypass request authentication.
    pub allow_loopback_bypass: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7171".parse().expect("static addr"),
            data_dir: PathBuf::from("."),
            device_expiry_days: 30,
            timestamp_window: Duration::from_secs(30),
            nonce_ttl: Duration::from_secs(60),
            nonce_max_size: 10_000,
            nonce_cleanup_interval: Duration::from_secs(30),
            session_root: PathBuf::from("."),
            session_poll: Duration::from_secs(30),
            session_live_window: Duration::from_secs(300),
            match_stale: Duration::from_secs(60),
            match_min_confidence: 40,
            match_weights: MatchWeights::default(),
            sink_url: "http://127.0.0.1:7172".to_string(),
            forward_max_attempts: 3,
            forward_base_delay: Duration::from_millis(250),
            allow_loopback_bypass: true,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from the environment.
    ///
    /// Reads a `.env` file if present, then environment variables, falling
    /// back to defaults. Fails if the per-user data directory cannot be
    /// resolved or a value does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let mut config = Self::default();

        config.data_dir = match std::env::var("DESKBRIDGE_DATA_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => dirs::data_dir()
                .ok_or(ConfigError::NoDataDir)?
                .join("deskbridge"),
        };

        config.session_root = match std::env::var("DESKBRIDGE_SESSION_ROOT") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => dirs::home_dir()
                .ok_or(ConfigError::NoDataDir)?
                .join(".deskbridge")
                .join("projects"),
        };

        if let Ok(addr) = std::env::var("DESKBRIDGE_BIND") {
            config.bind_addr = addr.parse().map_err(|e| ConfigError::InvalidValue {
                key: "DESKBRIDGE_BIND".to_string(),
                message: format!("{e}"),
            })?;
        }

        if let Some(days) = parse_env_u64("DESKBRIDGE_DEVICE_EXPIRY_DAYS")? {
            config.device_expiry_days = days as i64;
        }
        if let Some(secs) = parse_env_u64("DESKBRIDGE_TIMESTAMP_WINDOW_SECS")? {
            config.timestamp_window = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env_u64("DESKBRIDGE_NONCE_TTL_SECS")? {
            config.nonce_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env_u64("DESKBRIDGE_SESSION_POLL_SECS")? {
            config.session_poll = Duration::from_secs(secs);
        }
        if let Some(conf) = parse_env_u64("DESKBRIDGE_MATCH_MIN_CONFIDENCE")? {
            config.match_min_confidence = conf.min(100) as u8;
        }
        if let Ok(url) = std::env::var("DESKBRIDGE_SINK_URL") {
            config.sink_url = url;
        }
        if let Ok(val) = std::env::var("DESKBRIDGE_LOOPBACK_BYPASS") {
            config.allow_loopback_bypass = val != "0" && !val.eq_ignore_ascii_case("false");
        }

        config.validate()?;
        Ok(config)
    }

    /// Enforce cross-field invariants.
    ///
    /// The nonce TTL must cover the full timestamp acceptance window
    /// (past and future skew), otherwise a nonce could be evicted while
    /// its timestamp still verifies, reopening a replay gap.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nonce_ttl < self.timestamp_window * 2 {
            return Err(ConfigError::InvalidValue {
                key: "DESKBRIDGE_NONCE_TTL_SECS".to_string(),
                message: format!(
                    "nonce TTL ({}s) must be at least twice the timestamp window ({}s)",
                    self.nonce_ttl.as_secs(),
                    self.timestamp_window.as_secs()
                ),
            });
        }
        if self.match_min_confidence > 100 {
            return Err(ConfigError::InvalidValue {
                key: "DESKBRIDGE_MATCH_MIN_CONFIDENCE".to_string(),
                message: "confidence is a 0-100 scale".to_string(),
            });
        }
        Ok(())
    }

    /// Path of the persisted host identity file.
    pub fn identity_path(&self) -> PathBuf {
        self.data_dir.join("identity.json")
    }

    /// Path of the persisted paired-devices file.
    pub fn devices_path(&self) -> PathBuf {
        self.data_dir.join("devices.json")
    }

    /// Path of the persisted confirmed-mappings file.
    pub fn confirmed_mappings_path(&self) -> PathBuf {
        self.data_dir.join("confirmed_matches.json")
    }
}

fn parse_env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{e}"),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BridgeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.device_expiry_days, 30);
        assert_eq!(config.nonce_max_size, 10_000);
    }

    #[test]
    fn test_nonce_ttl_must_cover_timestamp_window() {
        let config = BridgeConfig {
            nonce_ttl: Duration::from_secs(30),
            timestamp_window: Duration::from_secs(30),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_state_file_paths_live_under_data_dir() {
        let config = BridgeConfig {
            data_dir: PathBuf::from("/tmp/deskbridge-test"),
            ..Default::default()
        };
        assert_eq!(
            config.identity_path(),
            PathBuf::from("/tmp/deskbridge-test/identity.json")
        );
        assert_eq!(
            config.devices_path(),
            PathBuf::from("/tmp/deskbridge-test/devices.json")
        );
        assert_eq!(
            config.confirmed_mappings_path(),
            PathBuf::from("/tmp/deskbridge-test/confirmed_matches.json")
        );
    }
}
