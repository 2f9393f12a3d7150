//! deskbridge — secure pairing and authenticated bridge between a
//! workstation host and its companion devices.
//!
//! A companion device pairs with the host through a human-approved
//! handshake, then issues authenticated, replay-protected, optionally
//! AEAD-encrypted requests. The bridge also watches the host's
//! long-running work sessions and fuzzily matches them against open
//! terminal windows so the companion can address "the session in this
//! window".

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod forward;
pub mod matching;
pub mod pairing;
pub mod server;
pub mod sessions;
pub mod storage;

pub use config::BridgeConfig;
pub use error::BridgeError;
pub use server::{AppState, BridgeServer};
