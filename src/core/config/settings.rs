use crate::common::SOCKET_PATH;
use crate::core::scaling::ScalingMode;
use crate::core::table::{ChipProfile, ChipVariant, FrequencyStep, ThresholdTable};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub daemon: DaemonConfig,
    pub scaling: ScalingConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub thermal: ThermalConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DaemonConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_sample_interval")]
    pub sample_interval_ms: u64,

    #[serde(default = "default_socket_path")]
    pub socket_path: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            sample_interval_ms: default_sample_interval(),
            socket_path: default_socket_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScalingConfig {
    pub variant: ChipVariant,
    #[serde(default)]
    pub mode: ScalingMode,
    pub core_count: Option<u32>,
    pub initial_step: Option<usize>,
    pub min_step: Option<usize>,
    pub max_step: Option<usize>,
    pub min_cores: Option<u32>,
    pub default_step: Option<usize>,
    pub up_step: Option<usize>,
    pub turbo_step: Option<usize>,
    /// Replaces the variant's threshold table when present
    #[serde(default)]
    pub table: Vec<FrequencyStep>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    pub clock_path: PathBuf,
    pub clock_gate_path: Option<PathBuf>,
    pub core_limit_path: PathBuf,
    pub dispatch_pause_path: Option<PathBuf>,
    pub power_domain_path: PathBuf,
    pub utilization_path: PathBuf,
}

impl Default for BackendConfig {
    fn default() -> Self {
        let base = Path::new("/sys/class/mpgpu");
        Self {
            clock_path: base.join("cur_freq"),
            clock_gate_path: None,
            core_limit_path: base.join("cur_pp"),
            dispatch_pause_path: None,
            power_domain_path: base.join("domain_stat"),
            utilization_path: base.join("utilization"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ThermalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_throttle_celsius")]
    pub throttle_celsius: f32,
    #[serde(default = "default_release_celsius")]
    pub release_celsius: f32,
    #[serde(default = "default_throttle_step")]
    pub throttle_step: usize,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            throttle_celsius: default_throttle_celsius(),
            release_celsius: default_release_celsius(),
            throttle_step: default_throttle_step(),
        }
    }
}

impl Settings {
    /// Load settings from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse settings.toml")
    }

    /// Variant preset with the table and step overrides applied, validated
    pub fn profile(&self) -> Result<ChipProfile> {
        let cfg = &self.scaling;
        let mut profile = cfg.variant.profile();

        if !cfg.table.is_empty() {
            profile.table = ThresholdTable::new(cfg.table.clone())
                .context("Invalid [[scaling.table]] entries")?;
            profile.name = format!("{}-custom", cfg.variant);
        }
        if let Some(cores) = cfg.core_count {
            profile = profile.with_core_count(cores);
        }
        if let Some(step) = cfg.initial_step {
            profile = profile.with_initial_step(step);
        }

        let overrides = [
            (cfg.min_step, &mut profile.min_step),
            (cfg.max_step, &mut profile.max_step),
            (cfg.default_step, &mut profile.default_step),
            (cfg.up_step, &mut profile.up_step),
            (cfg.turbo_step, &mut profile.turbo_step),
        ];
        for (value, slot) in overrides {
            if let Some(v) = value {
                *slot = v;
            }
        }
        if let Some(cores) = cfg.min_cores {
            profile.min_cores = cores;
        }

        profile
            .validate()
            .with_context(|| format!("Invalid scaling settings for {}", cfg.variant))?;
        Ok(profile)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sample_interval() -> u64 {
    200
}

fn default_socket_path() -> String {
    SOCKET_PATH.to_string()
}

fn default_true() -> bool {
    true
}

fn default_throttle_celsius() -> f32 {
    85.0
}

fn default_release_celsius() -> f32 {
    75.0
}

fn default_throttle_step() -> usize {
    1
}
