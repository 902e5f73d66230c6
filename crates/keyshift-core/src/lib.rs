//! Core library for `keyshift`.
//!
//! Contains the unified (encrypted, storage-backed) secrets store, the
//! secrets plugin store, the persisted startup policy, the migration gate
//! and runner that move unified secrets into the plugin, and the API key
//! store. This crate depends on `keyshift-storage` for the storage backend
//! trait and knows nothing about specific databases.

pub mod apikey;
pub mod crypto;
pub mod error;
pub mod gate;
pub mod item;
pub mod kvstore;
pub mod migration;
pub mod namespaced;
pub mod plugin;
pub mod startup;
