//! In-memory replay-protection cache.
//!
//! Each authenticated request carries a single-use nonce. The store
//! remembers consumed nonces for a bounded TTL and rejects repeats
//! inside that window. Entries are swept on an interval, or eagerly when
//! the map grows past its size cap (the safety valve against adversarial
//! or buggy clients hammering fresh nonces).
//!
//! The TTL must be at least as large as the authenticator's timestamp
//! acceptance window; [`crate::config::BridgeConfig::validate`] enforces
//! that relationship.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Inner {
    /// Nonce value → expiry instant.
    seen: HashMap<String, Instant>,
    last_cleanup: Instant,
}

/// Bounded-window replay detector.
pub struct NonceStore {
    inner: Mutex<Inner>,
    ttl: Duration,
    max_size: usize,
    cleanup_interval: Duration,
}

impl NonceStore {
    pub fn new(ttl: Duration, max_size: usize, cleanup_interval: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                seen: HashMap::new(),
                last_cleanup: Instant::now(),
            }),
            ttl,
            max_size,
            cleanup_interval,
        }
    }

    /// Record the nonce if fresh.
    ///
    /// Returns `true` and records the nonce when it has not been seen
    /// inside its TTL; returns `false` without re-recording otherwise.
    /// Atomic per nonce: two concurrent calls with the same value cannot
    /// both return `true`.
    pub fn check(&self, nonce: &str) -> bool {
        self.check_at(nonce, Instant::now())
    }

    /// Read-only probe; never records.
    pub fn has_seen(&self, nonce: &str) -> bool {
        let now = Instant::now();
        let inner = self.inner.lock().expect("nonce lock poisoned");
        inner.seen.get(nonce).is_some_and(|&exp| exp > now)
    }

    /// Number of live entries (expired-but-unswept included).
    pub fn len(&self) -> usize {
        self.inner.lock().expect("nonce lock poisoned").seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_at(&self, nonce: &str, now: Instant) -> bool {
        let mut inner = self.inner.lock().expect("nonce lock poisoned");

        let due = now.duration_since(inner.last_cleanup) >= self.cleanup_interval;
        if due || inner.seen.len() >= self.max_size {
            inner.seen.retain(|_, &mut exp| exp > now);
            inner.last_cleanup = now;
        }

        if inner.seen.get(nonce).is_some_and(|&exp| exp > now) {
            return false;
        }

        inner.seen.insert(nonce.to_string(), now + self.ttl);
        true
    }
}
