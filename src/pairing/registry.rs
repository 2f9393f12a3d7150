//! Paired-device registry and pairing lifecycle.
//!
//! Per device id the lifecycle is `unregistered → pending → active →
//! {expired, revoked}`. An expired device only becomes active again
//! through a brand-new pairing flow. Pending requests are held in memory
//! and discarded on restart; active devices are persisted through a
//! [`DeviceStore`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::crypto::{HostIdentity, KeyPurpose};
use crate::error::{CryptoError, StorageError};
use crate::pairing::store::DeviceStore;

/// How long an unapproved pairing request stays claimable.
const PENDING_EXPIRY_MINUTES: i64 = 10;

/// A device that has completed pairing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairedDevice {
    /// Unique identifier, chosen by the device.
    pub id: String,
    /// Human-readable device name.
    pub name: String,
    /// Hex-encoded x25519 public key.
    pub public_key: String,
    /// When pairing was approved.
    pub paired_at: DateTime<Utc>,
    /// When the device last made an authenticated request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl PairedDevice {
    /// The timestamp inactivity is measured from.
    fn last_activity(&self) -> DateTime<Utc> {
        self.last_seen.unwrap_or(self.paired_at)
    }
}

/// An unconfirmed pairing request awaiting human approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPairing {
    pub id: String,
    pub name: String,
    pub public_key: String,
    pub requested_at: DateTime<Utc>,
}

/// Manages pairing approval and the durable device table.
///
/// All mutations of the persisted list are serialized behind a single
/// write lock around load-mutate-save, so concurrent approvals and
/// revocations cannot drop each other's updates.
pub struct DeviceRegistry {
    identity: HostIdentity,
    store: Arc<dyn DeviceStore>,
    pending: RwLock<HashMap<String, PendingPairing>>,
    write_lock: Mutex<()>,
    expiry: Duration,
}

impl DeviceRegistry {
    /// Create a registry over the given identity and device store.
    pub fn new(identity: HostIdentity, store: Arc<dyn DeviceStore>, expiry_days: i64) -> Self {
        Self {
            identity,
            store,
            pending: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
            expiry: Duration::days(expiry_days),
        }
    }

    /// Hex-encoded host public key, shared with pairing devices so they
    /// can derive the same per-purpose keys after approval.
    pub fn host_public_key(&self) -> String {
        self.identity.public_key_hex()
    }

    /// Record a pairing request for later approval.
    ///
    /// The public key is validated up front so a malformed key is
    /// rejected before it can ever reach the approval screen. A repeat
    /// request for the same id overwrites the earlier one.
    pub async fn add_pending_pairing(
        &self,
        id: String,
        name: String,
        public_key: String,
    ) -> Result<PendingPairing, CryptoError> {
        crate::crypto::keystore::parse_public_key(&public_key)?;

        let pending = PendingPairing {
            id: id.clone(),
            name,
            public_key,
            requested_at: Utc::now(),
        };

        tracing::info!(device_id = %id, name = %pending.name, "Pairing requested");
        self.pending.write().await.insert(id, pending.clone());
        Ok(pending)
    }

    /// List pairing requests still awaiting approval.
    ///
    /// Requests older than the pending expiry are dropped on the way out.
    pub async fn list_pending(&self) -> Vec<PendingPairing> {
        let cutoff = Utc::now() - Duration::minutes(PENDING_EXPIRY_MINUTES);
        let mut pending = self.pending.write().await;
        pending.retain(|_, p| p.requested_at > cutoff);

        let mut list: Vec<PendingPairing> = pending.values().cloned().collect();
        list.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
        list
    }

    /// Approve a pending pairing, promoting it to a paired device.
    ///
    /// Returns `None` if no (unexpired) pending request exists for the
    /// id. Re-pairing an already-active id overwrites its public key and
    /// `paired_at` and clears `last_seen` rather than duplicating the
    /// entry.
    pub async fn approve_pairing(
        &self,
        device_id: &str,
    ) -> Result<Option<PairedDevice>, StorageError> {
        let pending = {
            let mut pending = self.pending.write().await;
            match pending.remove(device_id) {
                Some(p) => p,
                None => return Ok(None),
            }
        };

        if Utc::now() - pending.requested_at > Duration::minutes(PENDING_EXPIRY_MINUTES) {
            tracing::warn!(device_id = %device_id, "Pairing request expired before approval");
            return Ok(None);
        }

        let device = PairedDevice {
            id: pending.id,
            name: pending.name,
            public_key: pending.public_key,
            paired_at: Utc::now(),
            last_seen: None,
        };

        let _guard = self.write_lock.lock().await;
        let mut devices = self.store.load().await?;
        devices.retain(|d| d.id != device.id);
        devices.push(device.clone());
        self.store.save(&devices).await?;

        tracing::info!(device_id = %device.id, name = %device.name, "Device paired");
        Ok(Some(device))
    }

    /// Discard a pending request without creating a device.
    ///
    /// Returns whether a request existed.
    pub async fn reject_pairing(&self, device_id: &str) -> bool {
        let existed = self.pending.write().await.remove(device_id).is_some();
        if existed {
            tracing::info!(device_id = %device_id, "Pairing rejected");
        }
        existed
    }

    /// List all paired devices, oldest pairing first.
    pub async fn list_devices(&self) -> Result<Vec<PairedDevice>, StorageError> {
        let mut devices = self.store.load().await?;
        devices.sort_by(|a, b| a.paired_at.cmp(&b.paired_at));
        Ok(devices)
    }

    /// Look up a single paired device.
    pub async fn get_device(&self, device_id: &str) -> Result<Option<PairedDevice>, StorageError> {
        Ok(self
            .store
            .load()
            .await?
            .into_iter()
            .find(|d| d.id == device_id))
    }

    /// Explicitly revoke a device. Returns whether one was removed.
    pub async fn remove_device(&self, device_id: &str) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut devices = self.store.load().await?;
        let before = devices.len();
        devices.retain(|d| d.id != device_id);

        if devices.len() == before {
            return Ok(false);
        }

        self.store.save(&devices).await?;
        tracing::info!(device_id = %device_id, "Device revoked");
        Ok(true)
    }

    /// Remove every paired device. Returns how many were revoked.
    pub async fn revoke_all_devices(&self) -> Result<usize, StorageError> {
        let _guard = self.write_lock.lock().await;
        let devices = self.store.load().await?;
        let count = devices.len();
        if count > 0 {
            self.store.save(&[]).await?;
            tracing::warn!(count, "All paired devices revoked");
        }
        Ok(count)
    }

    /// Whether a device's inactivity window has elapsed.
    pub fn is_device_expired(&self, device: &PairedDevice) -> bool {
        Utc::now() - device.last_activity() > self.expiry
    }

    /// Drop all expired devices from durable storage.
    ///
    /// Runs at process start and periodically thereafter. Idempotent: a
    /// second call without new activity removes nothing.
    pub async fn prune_expired_devices(&self) -> Result<usize, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut devices = self.store.load().await?;
        let before = devices.len();
        devices.retain(|d| !self.is_device_expired(d));
        let pruned = before - devices.len();

        if pruned > 0 {
            self.store.save(&devices).await?;
            tracing::info!(pruned, "Pruned expired devices");
        }
        Ok(pruned)
    }

    /// Record activity for a device after a successful authenticated
    /// request. Persisted so expiry survives restarts.
    pub async fn update_last_seen(&self, device_id: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut devices = self.store.load().await?;
        if let Some(device) = devices.iter_mut().find(|d| d.id == device_id) {
            device.last_seen = Some(Utc::now());
            self.store.save(&devices).await?;
        }
        Ok(())
    }

    /// Derive the request-authentication key shared with a device.
    ///
    /// `None` for unknown or expired devices — an expired device's shared
    /// secret is never accepted even though it remains derivable.
    pub async fn get_device_auth_key(
        &self,
        device_id: &str,
    ) -> Result<Option<[u8; 32]>, StorageError> {
        self.derive_key(device_id, KeyPurpose::Auth).await
    }

    /// Derive the payload-encryption key shared with a device. Same
    /// unknown/expired gating as [`Self::get_device_auth_key`].
    pub async fn get_device_encryption_key(
        &self,
        device_id: &str,
    ) -> Result<Option<[u8; 32]>, StorageError> {
        self.derive_key(device_id, KeyPurpose::Encrypt).await
    }

    async fn derive_key(
        &self,
        device_id: &str,
        purpose: KeyPurpose,
    ) -> Result<Option<[u8; 32]>, StorageError> {
        let device = match self.get_device(device_id).await? {
            Some(d) if !self.is_device_expired(&d) => d,
            _ => return Ok(None),
        };

        match self.identity.derive_device_key(&device.public_key, purpose) {
            Ok(key) => Ok(Some(key)),
            Err(e) => {
                // The key was validated at pairing time, so this means the
                // stored entry was edited or damaged since.
                tracing::warn!(device_id = %device_id, error = %e, "Stored device key unusable");
                Ok(None)
            }
        }
    }

    /// Spawn the periodic prune loop.
    pub fn spawn_prune_task(
        self: &Arc<Self>,
        interval: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.tick().await; // first tick fires immediately
            loop {
                timer.tick().await;
                if let Err(e) = registry.prune_expired_devices().await {
                    tracing::warn!(error = %e, "Device prune failed");
                }
            }
        })
    }
}
