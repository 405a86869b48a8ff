//! # courier-settings
//!
//! Layered configuration for Courier.
//!
//! Settings are resolved from three layers, lowest priority first:
//! 1. **Compiled defaults** ([`CourierSettings::default()`])
//! 2. **User file** `~/.courier/settings.json`, deep-merged over defaults
//! 3. **Environment** `COURIER_*` overrides

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    load_with_env, settings_path,
};
pub use types::{ClientSettings, CourierSettings, EngineSettings, LoggingSettings};

use std::sync::OnceLock;

static SETTINGS: OnceLock<CourierSettings> = OnceLock::new();

/// Global settings, loaded on first access.
///
/// Falls back to compiled defaults if loading fails.
pub fn get_settings() -> &'static CourierSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "failed to load settings, using defaults");
            CourierSettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// Hands the value back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: CourierSettings) -> std::result::Result<(), CourierSettings> {
    SETTINGS.set(settings)
}
