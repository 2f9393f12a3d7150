//! User-confirmed terminal → session mappings.
//!
//! When the user confirms a match, the terminal's fingerprint maps
//! durably to a session id, overriding the algorithmic score from then
//! on. The map is a flat JSON object on disk, loaded at startup; every
//! mutation persists immediately so a crash never loses a confirmation
//! or resurrects a deleted one.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::RwLock;

use crate::error::{MatchError, StorageError};
use crate::storage;

/// Durable fingerprint → session-id overrides.
pub struct ConfirmedMappings {
    path: PathBuf,
    map: RwLock<HashMap<String, String>>,
}

impl ConfirmedMappings {
    /// Load the persisted map, or start empty if none exists.
    pub async fn load(path: PathBuf) -> Result<Self, StorageError> {
        let map: HashMap<String, String> = storage::read_json(&path).await?.unwrap_or_default();
        if !map.is_empty() {
            tracing::info!(count = map.len(), "Loaded confirmed match mappings");
        }
        Ok(Self {
            path,
            map: RwLock::new(map),
        })
    }

    /// Look up the confirmed session for a fingerprint.
    pub async fn get(&self, fingerprint: &str) -> Option<String> {
        self.map.read().await.get(fingerprint).cloned()
    }

    /// Record a confirmation. Returns the new mapping count.
    pub async fn confirm(
        &self,
        fingerprint: String,
        session_id: String,
    ) -> Result<usize, StorageError> {
        let mut map = self.map.write().await;
        map.insert(fingerprint, session_id);
        storage::write_json_atomic(&self.path, &*map).await?;
        Ok(map.len())
    }

    /// Delete a confirmation.
    ///
    /// Fails with [`MatchError::MappingNotFound`] when the fingerprint
    /// has no mapping; the deletion is persisted before returning.
    pub async fn remove(&self, fingerprint: &str) -> Result<(), MatchError> {
        let mut map = self.map.write().await;
        if map.remove(fingerprint).is_none() {
            return Err(MatchError::MappingNotFound {
                fingerprint: fingerprint.to_string(),
            });
        }
        storage::write_json_atomic(&self.path, &*map)
            .await
            .map_err(MatchError::Storage)
    }

    /// Snapshot of all mappings.
    pub async fn all(&self) -> HashMap<String, String> {
        self.map.read().await.clone()
    }

    /// Number of confirmed mappings.
    pub async fn count(&self) -> usize {
        self.map.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_starts_empty_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let mappings = ConfirmedMappings::load(dir.path().join("confirmed.json"))
            .await
            .unwrap();
        assert_eq!(mappings.count().await, 0);
    }

    #[tokio::test]
    async fn test_confirmations_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("confirmed.json");

        let mappings = ConfirmedMappings::load(path.clone()).await.unwrap();
        mappings
            .confirm("kitty|notes".to_string(), "sess-a".to_string())
            .await
            .unwrap();

        let reloaded = ConfirmedMappings::load(path).await.unwrap();
        assert_eq!(reloaded.get("kitty|notes").await.as_deref(), Some("sess-a"));
    }

    #[tokio::test]
    async fn test_remove_persists_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("confirmed.json");

        let mappings = ConfirmedMappings::load(path.clone()).await.unwrap();
        mappings
            .confirm("kitty|notes".to_string(), "sess-a".to_string())
            .await
            .unwrap();
        mappings.remove("kitty|notes").await.unwrap();

        let reloaded = ConfirmedMappings::load(path).await.unwrap();
        assert_eq!(reloaded.count().await, 0);
    }

    #[tokio::test]
    async fn test_remove_unknown_fingerprint_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mappings = ConfirmedMappings::load(dir.path().join("confirmed.json"))
            .await
            .unwrap();

        let err = mappings.remove("ghost|window").await.unwrap_err();
        assert!(matches!(err, MatchError::MappingNotFound { .. }));
    }

    #[tokio::test]
    async fn test_reconfirming_overwrites_session() {
        let dir = tempfile::tempdir().unwrap();
        let mappings = ConfirmedMappings::load(dir.path().join("confirmed.json"))
            .await
            .unwrap();

        mappings
            .confirm("kitty|notes".to_string(), "sess-a".to_string())
            .await
            .unwrap();
        let count = mappings
            .confirm("kitty|notes".to_string(), "sess-b".to_string())
            .await
            .unwrap();

        assert_eq!(count, 1);
        assert_eq!(mappings.get("kitty|notes").await.as_deref(), Some("sess-b"));
    }
}
