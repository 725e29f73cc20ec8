use crate::common::CONFIG_DIR;
use std::path::PathBuf;

/// Overrides [`CONFIG_DIR`] when set
pub const CONFIG_DIR_ENV: &str = "MPGPU_CONFIG_DIR";

pub fn config_dir() -> PathBuf {
    std::env::var_os(CONFIG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_DIR))
}

pub fn settings_path() -> PathBuf {
    config_dir().join("settings.toml")
}

pub fn load_all() -> anyhow::Result<crate::core::config::Settings> {
    crate::core::config::Settings::load(settings_path())
}
