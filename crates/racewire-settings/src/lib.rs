//! # racewire-settings
//!
//! Layered configuration for the broadcaster.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RacewireSettings::default()`]
//! 2. **User file**: `~/.racewire/settings.json` or an explicit path,
//!    deep-merged over defaults
//! 3. **Environment variables**: `RACEWIRE_*` overrides
//!
//! The binary applies command-line flags last.

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
};
pub use types::*;
