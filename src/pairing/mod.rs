//! Device pairing and the paired-device registry.
//!
//! A companion device submits its public key and waits for a human on the
//! host to approve it. Approved devices are persisted; unapproved requests
//! live only in memory and die with the process.

pub mod registry;
pub mod store;

pub use registry::{DeviceRegistry, PairedDevice, PendingPairing};
pub use store::{DeviceStore, FileDeviceStore, InMemoryDeviceStore};
