//! `keyshift` startup runner.
//!
//! Reads configuration from the environment, opens the storage backends,
//! and runs the unified-to-plugin secrets migration under the persisted
//! startup policy.

pub mod bootstrap;
pub mod config;
