//! Durable storage for paired devices.
//!
//! The registry treats its backing store as a tiny single-table database:
//! `load` the full device list, mutate, `save` it back. The file-backed
//! implementation keeps `devices.json` under the data directory; the
//! in-memory implementation backs unit tests without touching disk.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::pairing::registry::PairedDevice;
use crate::storage;

/// Whole-list load/save contract for the paired-device table.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Load all paired devices. An absent backing file is an empty list.
    async fn load(&self) -> Result<Vec<PairedDevice>, StorageError>;

    /// Replace the full device list.
    async fn save(&self, devices: &[PairedDevice]) -> Result<(), StorageError>;
}

/// File-backed device store (`devices.json`, atomic writes).
pub struct FileDeviceStore {
    path: PathBuf,
}

impl FileDeviceStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl DeviceStore for FileDeviceStore {
    async fn load(&self) -> Result<Vec<PairedDevice>, StorageError> {
        Ok(storage::read_json(&self.path).await?.unwrap_or_default())
    }

    async fn save(&self, devices: &[PairedDevice]) -> Result<(), StorageError> {
        storage::write_json_atomic(&self.path, &devices).await
    }
}

/// In-memory device store for tests.
#[derive(Default)]
pub struct InMemoryDeviceStore {
    devices: Mutex<Vec<PairedDevice>>,
}

impl InMemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceStore for InMemoryDeviceStore {
    async fn load(&self) -> Result<Vec<PairedDevice>, StorageError> {
        Ok(self.devices.lock().await.clone())
    }

    async fn save(&self, devices: &[PairedDevice]) -> Result<(), StorageError> {
        *self.devices.lock().await = devices.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_device(id: &str) -> PairedDevice {
        PairedDevice {
            id: id.to_string(),
            name: "iPhone".to_string(),
            public_key: "aa".repeat(32),
            paired_at: Utc::now(),
            last_seen: None,
        }
    }

    #[tokio::test]
    async fn test_file_store_missing_file_is_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDeviceStore::new(dir.path().join("devices.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDeviceStore::new(dir.path().join("devices.json"));

        store
            .save(&[sample_device("dev-1"), sample_device("dev-2")])
            .await
            .unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, "dev-1");
    }

    #[tokio::test]
    async fn test_in_memory_store_round_trip() {
        let store = InMemoryDeviceStore::new();
        store.save(&[sample_device("dev-1")]).await.unwrap();
        assert_eq!(store.load().await.unwrap().len(), 1);

        store.save(&[]).await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }
}
