//! # feedlink-settings
//!
//! Layered configuration for feedlink connections.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** ([`LinkSettings::default()`])
//! 2. **User file** `~/.feedlink/settings.json`, deep-merged over defaults
//! 3. **Environment variables** `FEEDLINK_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_overrides, deep_merge, load_settings, load_settings_from_path, load_settings_with,
    settings_path,
};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = LinkSettings::default();
        let _path = settings_path();
        let merged = deep_merge(serde_json::json!({"x": 1}), serde_json::json!({"y": 2}));
        assert_eq!(merged["x"], 1);
        assert_eq!(merged["y"], 2);
    }
}
