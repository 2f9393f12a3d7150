//! Session cache with staleness tracking and single-flight refresh.
//!
//! Request handlers read from the cache; a rescan happens only when the
//! cache has outlived the poll interval, a caller forces it, or the
//! background poll fires. Concurrent refreshes coalesce: whoever loses
//! the race reuses the winner's result instead of double-scanning.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::error::SessionError;
use crate::sessions::scan::{Session, scan_sessions};

/// Upper bound on a single filesystem scan.
const SCAN_TIMEOUT: Duration = Duration::from_secs(5);

struct CachedScan {
    sessions: Vec<Session>,
    refreshed_at: Instant,
    last_refresh: DateTime<Utc>,
}

/// Cache freshness snapshot for observability.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    /// `"cold"`, `"refreshing"`, or `"warm"`.
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_age_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh: Option<DateTime<Utc>>,
}

/// Polls and caches the host's active work sessions.
pub struct SessionCache {
    root: PathBuf,
    poll: Duration,
    live_window: Duration,
    cached: RwLock<Option<CachedScan>>,
    refresh_lock: Mutex<()>,
    refreshing: AtomicBool,
    poll_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SessionCache {
    pub fn new(root: PathBuf, poll: Duration, live_window: Duration) -> Self {
        Self {
            root,
            poll,
            live_window,
            cached: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            refreshing: AtomicBool::new(false),
            poll_handle: Mutex::new(None),
        }
    }

    /// Return cached sessions, rescanning when forced or stale.
    pub async fn get_sessions(&self, force_refresh: bool) -> Result<Vec<Session>, SessionError> {
        if !force_refresh {
            let cached = self.cached.read().await;
            if let Some(scan) = cached.as_ref() {
                if scan.refreshed_at.elapsed() < self.poll {
                    return Ok(scan.sessions.clone());
                }
            }
        }
        self.refresh().await
    }

    /// Targeted lookup. On a cache miss the caller may retry once with
    /// `force_refresh`, since a just-created session may not be cached
    /// yet; [`Self::get_session_with_retry`] wraps that pattern.
    pub async fn get_session(
        &self,
        id: &str,
        force_refresh: bool,
    ) -> Result<Option<Session>, SessionError> {
        Ok(self
            .get_sessions(force_refresh)
            .await?
            .into_iter()
            .find(|s| s.id == id))
    }

    /// Cached lookup with a single forced retry on miss.
    pub async fn get_session_with_retry(&self, id: &str) -> Result<Option<Session>, SessionError> {
        if let Some(session) = self.get_session(id, false).await? {
            return Ok(Some(session));
        }
        self.get_session(id, true).await
    }

    /// Cache freshness for clients deciding whether to force a refresh.
    pub async fn get_status(&self) -> CacheStatus {
        if self.refreshing.load(Ordering::Relaxed) {
            return CacheStatus {
                state: "refreshing",
                cache_age_ms: None,
                last_refresh: self.cached.read().await.as_ref().map(|s| s.last_refresh),
            };
        }

        match self.cached.read().await.as_ref() {
            Some(scan) => CacheStatus {
                state: "warm",
                cache_age_ms: Some(scan.refreshed_at.elapsed().as_millis() as u64),
                last_refresh: Some(scan.last_refresh),
            },
            None => CacheStatus {
                state: "cold",
                cache_age_ms: None,
                last_refresh: None,
            },
        }
    }

    async fn refresh(&self) -> Result<Vec<Session>, SessionError> {
        let started = Instant::now();
        let _guard = self.refresh_lock.lock().await;

        // Single-flight: if another task finished a refresh while we
        // waited for the lock, its result is fresh enough.
        {
            let cached = self.cached.read().await;
            if let Some(scan) = cached.as_ref() {
                if scan.refreshed_at >= started {
                    return Ok(scan.sessions.clone());
                }
            }
        }

        self.refreshing.store(true, Ordering::Relaxed);
        let result = tokio::time::timeout(
            SCAN_TIMEOUT,
            scan_sessions(&self.root, self.live_window),
        )
        .await;
        self.refreshing.store(false, Ordering::Relaxed);

        let sessions = match result {
            Ok(Ok(sessions)) => sessions,
            Ok(Err(e)) => return self.fall_back(e).await,
            Err(_) => {
                return self
                    .fall_back(SessionError::ScanFailed(format!(
                        "scan exceeded {}s",
                        SCAN_TIMEOUT.as_secs()
                    )))
                    .await;
            }
        };

        *self.cached.write().await = Some(CachedScan {
            sessions: sessions.clone(),
            refreshed_at: Instant::now(),
            last_refresh: Utc::now(),
        });
        tracing::debug!(count = sessions.len(), "Session cache refreshed");
        Ok(sessions)
    }

    /// A failed rescan keeps serving the previous cache; the error only
    /// surfaces when there is nothing cached at all.
    async fn fall_back(&self, error: SessionError) -> Result<Vec<Session>, SessionError> {
        let cached = self.cached.read().await;
        match cached.as_ref() {
            Some(scan) => {
                tracing::warn!(error = %error, "Session rescan failed, serving stale cache");
                Ok(scan.sessions.clone())
            }
            None => Err(error),
        }
    }

    /// Spawn the background polling loop.
    pub async fn spawn_poll_task(self: &Arc<Self>) {
        let cache = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(cache.poll);
            loop {
                timer.tick().await;
                if let Err(e) = cache.get_sessions(true).await {
                    tracing::warn!(error = %e, "Background session poll failed");
                }
            }
        });

        if let Some(old) = self.poll_handle.lock().await.replace(handle) {
            old.abort();
        }
    }

    /// Cancel the background polling loop. In-flight request handlers
    /// are unaffected.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.poll_handle.lock().await.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_cache(poll: Duration) -> (Arc<SessionCache>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("-Users-sam-notes");
        tokio::fs::create_dir_all(&folder).await.unwrap();
        tokio::fs::write(folder.join("sess-a.jsonl"), "{}\n{}\n")
            .await
            .unwrap();

        let cache = Arc::new(SessionCache::new(
            dir.path().to_path_buf(),
            poll,
            Duration::from_secs(300),
        ));
        (cache, dir)
    }

    #[tokio::test]
    async fn test_cold_cache_scans_then_serves_cached() {
        let (cache, dir) = seeded_cache(Duration::from_secs(3600)).await;

        assert_eq!(cache.get_status().await.state, "cold");
        let sessions = cache.get_sessions(false).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(cache.get_status().await.state, "warm");

        // A session added after the scan is invisible until forced.
        let folder = dir.path().join("-Users-sam-notes");
        tokio::fs::write(folder.join("sess-b.jsonl"), "{}\n")
            .await
            .unwrap();
        assert_eq!(cache.get_sessions(false).await.unwrap().len(), 1);
        assert_eq!(cache.get_sessions(true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_get_session_with_retry_finds_new_session() {
        let (cache, dir) = seeded_cache(Duration::from_secs(3600)).await;
        cache.get_sessions(false).await.unwrap();

        let folder = dir.path().join("-Users-sam-notes");
        tokio::fs::write(folder.join("sess-new.jsonl"), "{}\n")
            .await
            .unwrap();

        // The plain cached lookup misses; the retry path forces a rescan.
        assert!(cache.get_session("sess-new", false).await.unwrap().is_none());
        let found = cache.get_session_with_retry("sess-new").await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_missing_session_is_none_not_error() {
        let (cache, _dir) = seeded_cache(Duration::from_secs(3600)).await;
        assert!(cache.get_session_with_retry("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_cache_refreshes_on_read() {
        let (cache, dir) = seeded_cache(Duration::ZERO).await;
        cache.get_sessions(false).await.unwrap();

        let folder = dir.path().join("-Users-sam-notes");
        tokio::fs::write(folder.join("sess-b.jsonl"), "{}\n")
            .await
            .unwrap();

        // poll = 0 means every read sees the cache as stale.
        assert_eq!(cache.get_sessions(false).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_forced_refreshes_coalesce() {
        let (cache, _dir) = seeded_cache(Duration::from_secs(3600)).await;

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_sessions(true).await.unwrap().len() })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn test_shutdown_aborts_poller() {
        let (cache, _dir) = seeded_cache(Duration::from_millis(10)).await;
        cache.spawn_poll_task().await;
        cache.shutdown().await;
        assert!(cache.poll_handle.lock().await.is_none());
    }
}
