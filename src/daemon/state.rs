use crate::core::config::ThermalConfig;
use crate::core::thermal::{ThermalGovernor, ThermalMonitor};

/// Thermal zone polling plus the throttle state it drives
pub struct ThermalState {
    pub monitor: ThermalMonitor,
    pub governor: ThermalGovernor,
}

impl ThermalState {
    pub fn from_config(cfg: &ThermalConfig) -> Option<Self> {
        cfg.enabled.then(|| Self {
            monitor: ThermalMonitor::new(),
            governor: ThermalGovernor::new(cfg.throttle_celsius, cfg.release_celsius, cfg.throttle_step),
        })
    }
}
