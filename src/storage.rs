//! JSON file persistence helpers shared by the durable stores.
//!
//! Every store in the bridge (host identity, paired devices, confirmed
//! mappings) is a single small JSON file. Writes go through a temp file
//! followed by a rename so a crash mid-write can never leave a torn file.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StorageError;

/// Read and deserialize a JSON file, returning `None` if it does not exist.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::io(path.display().to_string(), e)),
    };

    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| StorageError::Corrupt {
            path: path.display().to_string(),
            message: e.to_string(),
        })
}

/// Serialize a value and write it atomically (temp file, then rename).
///
/// Creates the parent directory on first use.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::io(parent.display().to_string(), e))?;
    }

    let content = serde_json::to_string_pretty(value)?;
    let tmp_path = path.with_extension("json.tmp");

    tokio::fs::write(&tmp_path, &content)
        .await
        .map_err(|e| StorageError::io(tmp_path.display().to_string(), e))?;

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| StorageError::io(path.display().to_string(), e))
}

/// Restrict a file to owner read/write. No-op on non-unix platforms.
pub async fn restrict_permissions(path: &Path) -> Result<(), StorageError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|e| StorageError::io(path.display().to_string(), e))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
