use anyhow::Result;
use std::fs;
use std::path::PathBuf;
use tracing::info;

const THERMAL_ROOT: &str = "/sys/class/thermal";
const MAX_ZONES: usize = 20;

pub struct ThermalMonitor {
    root: PathBuf,
}

impl Default for ThermalMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ThermalMonitor {
    pub fn new() -> Self {
        Self::with_root(THERMAL_ROOT)
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Hottest plausible zone reading in Celsius, 0.0 when none is readable
    pub fn get_max_temp(&self) -> Result<f32> {
        let mut max = 0.0f32;

        for i in 0..MAX_ZONES {
            let path = self.root.join(format!("thermal_zone{}/temp", i));
            if let Ok(s) = fs::read_to_string(&path)
                && let Ok(millicelsius) = s.trim().parse::<i32>()
            {
                let celsius = millicelsius as f32 / 1000.0;
                if celsius > 0.0 && celsius < 150.0 && celsius > max {
                    max = celsius;
                }
            }
        }

        Ok(max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermalAction {
    /// Cap the maximum step
    Throttle(usize),
    /// Restore the configured maximum step
    Release,
}

/// Two-threshold throttle so the cap does not flap around one temperature
#[derive(Debug, Clone)]
pub struct ThermalGovernor {
    throttle_celsius: f32,
    release_celsius: f32,
    throttle_step: usize,
    throttled: bool,
}

impl ThermalGovernor {
    pub fn new(throttle_celsius: f32, release_celsius: f32, throttle_step: usize) -> Self {
        Self {
            throttle_celsius,
            release_celsius: release_celsius.min(throttle_celsius),
            throttle_step,
            throttled: false,
        }
    }

    pub fn is_throttled(&self) -> bool {
        self.throttled
    }

    pub fn evaluate(&mut self, celsius: f32) -> Option<ThermalAction> {
        if !self.throttled && celsius >= self.throttle_celsius {
            self.throttled = true;
            info!(target: "mpgpu::thermal", "GPU throttled at {:.1}°C (max step {})", celsius, self.throttle_step);
            return Some(ThermalAction::Throttle(self.throttle_step));
        }
        if self.throttled && celsius < self.release_celsius {
            self.throttled = false;
            info!(target: "mpgpu::thermal", "GPU throttle released at {:.1}°C", celsius);
            return Some(ThermalAction::Release);
        }
        None
    }
}
