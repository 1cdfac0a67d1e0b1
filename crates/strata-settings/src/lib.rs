//! # strata-settings
//!
//! Configuration management with layered sources for Strata.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`StrataSettings::default()`]
//! 2. **User file**: `~/.strata/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `STRATA_*` overrides (highest priority)
//!
//! Command-line flags of the `strata` binary are applied on top of the
//! loaded value by the caller.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path, strata_home};
pub use types::*;
