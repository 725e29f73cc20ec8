use super::UtilizationSource;
use crate::core::scaling::UtilizationSample;
use crate::core::table::UTIL_FULL_SCALE;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub fn is_available(path: &Path) -> bool {
    path.exists()
}

/// Reads `gpu vertex fragment` (or a single value for all three) on the
/// 0-255 scale
pub struct SysfsSource {
    path: PathBuf,
}

impl SysfsSource {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

fn parse_sample(data: &str) -> Option<UtilizationSample> {
    let parts: Vec<u32> = data
        .split_whitespace()
        .filter_map(|s| s.parse().ok())
        .map(|v: u32| v.min(UTIL_FULL_SCALE))
        .collect();

    match parts.as_slice() {
        [u] => Some(UtilizationSample::uniform(*u)),
        [gpu, vertex, fragment, ..] => Some(UtilizationSample::new(*gpu, *vertex, *fragment)),
        _ => None,
    }
}

impl UtilizationSource for SysfsSource {
    fn read(&mut self) -> Result<Option<UtilizationSample>> {
        let data = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;

        let Some(sample) = parse_sample(&data) else {
            tracing::debug!(target: "mpgpu::daemon", "Malformed utilization '{}', skip sample", data.trim());
            return Ok(None);
        };

        Ok(Some(sample))
    }
}
