use crate::core::clock::ClockBackend;
use crate::core::config::BackendConfig;
use crate::core::dispatch::JobDispatch;
use crate::core::error::{Result, ScaleError};
use crate::core::power::PowerDomain;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub fn is_available(cfg: &BackendConfig) -> bool {
    cfg.clock_path.exists()
}

fn write_node(path: &Path, value: &str) -> Result<()> {
    fs::write(path, value)?;
    debug!(target: "mpgpu::clock", "{} <- {}", path.display(), value);
    Ok(())
}

/// Parses a status word written either as hex (`0x7`) or decimal
fn parse_word(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

pub struct SysfsClock {
    clock_path: PathBuf,
    gate_path: Option<PathBuf>,
}

impl SysfsClock {
    pub fn new(cfg: &BackendConfig) -> Self {
        Self {
            clock_path: cfg.clock_path.clone(),
            gate_path: cfg.clock_gate_path.clone(),
        }
    }

    fn gate(&self, on: bool) -> Result<()> {
        match &self.gate_path {
            Some(path) => write_node(path, if on { "1" } else { "0" }),
            None => Ok(()),
        }
    }
}

impl ClockBackend for SysfsClock {
    fn apply_frequency(&mut self, step: usize, clock_value: u32) -> Result<()> {
        write_node(&self.clock_path, &format!("{:#x}", clock_value))
            .map_err(|e| ScaleError::hardware(step, e))
    }

    fn enable_clock(&mut self) -> Result<()> {
        self.gate(true)
    }

    fn disable_clock(&mut self) -> Result<()> {
        self.gate(false)
    }
}

pub struct SysfsDispatch {
    core_limit_path: PathBuf,
    pause_path: Option<PathBuf>,
}

impl SysfsDispatch {
    pub fn new(cfg: &BackendConfig) -> Self {
        Self {
            core_limit_path: cfg.core_limit_path.clone(),
            pause_path: cfg.dispatch_pause_path.clone(),
        }
    }

    fn write_pause(&self, value: &str) {
        if let Some(path) = &self.pause_path
            && let Err(e) = write_node(path, value)
        {
            warn!(target: "mpgpu::apply", "Failed to write {}: {}", path.display(), e);
        }
    }
}

impl JobDispatch for SysfsDispatch {
    fn set_core_count(&self, cores: u32) -> Result<()> {
        write_node(&self.core_limit_path, &cores.to_string())
    }

    fn pause(&self) {
        self.write_pause("1");
    }

    fn resume(&self) {
        self.write_pause("0");
    }
}

pub struct SysfsPower {
    domain_path: PathBuf,
}

impl SysfsPower {
    pub fn new(cfg: &BackendConfig) -> Self {
        Self {
            domain_path: cfg.power_domain_path.clone(),
        }
    }
}

impl PowerDomain for SysfsPower {
    fn power_down_all(&self) -> Result<()> {
        write_node(&self.domain_path, "0")
    }

    fn power_up_all(&self) -> Result<()> {
        write_node(&self.domain_path, "1")
    }

    fn status(&self) -> Result<u32> {
        let raw = fs::read_to_string(&self.domain_path)?;
        parse_word(&raw).ok_or_else(|| {
            ScaleError::invalid(format!(
                "unreadable domain status '{}' in {}",
                raw.trim(),
                self.domain_path.display()
            ))
        })
    }
}
