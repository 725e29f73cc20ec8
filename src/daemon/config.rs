use crate::core::config::{self, Settings};
use anyhow::Result;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub settings: Settings,
    /// Window in which an identical tick error is logged only once
    pub error_debounce_ms: u128,
}

impl DaemonConfig {
    pub fn load() -> Result<Self> {
        Ok(Self {
            settings: Settings::load(config::settings_path())?,
            error_debounce_ms: 30_000,
        })
    }
}
