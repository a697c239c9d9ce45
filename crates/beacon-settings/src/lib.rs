//! # beacon-settings
//!
//! Layered configuration for the Beacon heartbeat server and client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`BeaconSettings::default()`]
//! 2. **User file**: `~/.beacon/settings.json` or an explicit path, deep-merged over defaults
//! 3. **Environment variables**: `BEACON_*` overrides (highest priority)
//!
//! The result is validated before it is returned. There is no global
//! instance; callers pass the loaded value to the components that need it.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_from, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::*;
