use super::ScalingMode;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Bounds {
    pub min_step: usize,
    pub max_step: usize,
    pub min_cores: u32,
}

/// Mutable state of the control loop. Only the policy engine writes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingState {
    pub current_step: usize,
    pub last_applied_step: usize,
    pub cores_enabled: u32,
    /// Upper core bound, lowered by the max-cores setter
    pub cores_total: u32,
    /// Cores physically present
    pub cores_present: u32,
    pub stay_count: u32,
    /// Set when the table changed under an applied step
    pub reprogram: bool,
    /// Thermal cap, counted down from the fastest step; 0 is uncapped
    pub cooling_level: usize,
    pub mode: ScalingMode,
    pub bounds: Bounds,
}

impl ScalingState {
    pub fn enable_one_core(&mut self) -> bool {
        if self.cores_enabled < self.cores_total {
            self.cores_enabled += 1;
            tracing::debug!(target: "mpgpu::scaling", "Core scaling: enabling one more core ({})", self.cores_enabled);
            true
        } else {
            false
        }
    }

    pub fn disable_one_core(&mut self) -> bool {
        if self.bounds.min_cores < self.cores_enabled {
            self.cores_enabled -= 1;
            tracing::debug!(target: "mpgpu::scaling", "Core scaling: disabling one core ({})", self.cores_enabled);
            true
        } else {
            false
        }
    }

    pub fn enable_max_cores(&mut self) -> bool {
        if self.cores_enabled < self.cores_total {
            self.cores_enabled = self.cores_total;
            tracing::debug!(target: "mpgpu::scaling", "Core scaling: enabling all {} cores", self.cores_total);
            true
        } else {
            false
        }
    }

    pub fn snapshot(&self, freq_mhz: u32, turbo_step: usize, limit_step: usize) -> ScalingSnapshot {
        ScalingSnapshot {
            mode: self.mode,
            current_step: self.current_step,
            last_applied_step: self.last_applied_step,
            cores_enabled: self.cores_enabled,
            cores_total: self.cores_total,
            stay_count: self.stay_count,
            min_step: self.bounds.min_step,
            max_step: self.bounds.max_step,
            turbo_step,
            min_cores: self.bounds.min_cores,
            cooling_level: self.cooling_level,
            limit_step,
            freq_mhz,
        }
    }
}

/// Copy of the scaling state handed out for status reporting and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScalingSnapshot {
    pub mode: ScalingMode,
    pub current_step: usize,
    pub last_applied_step: usize,
    pub cores_enabled: u32,
    pub cores_total: u32,
    pub stay_count: u32,
    pub min_step: usize,
    pub max_step: usize,
    pub turbo_step: usize,
    pub min_cores: u32,
    pub cooling_level: usize,
    /// Effective upper step after mode and cooling
    pub limit_step: usize,
    pub freq_mhz: u32,
}

impl ScalingSnapshot {
    pub fn max_step_for_mode(&self) -> usize {
        if self.mode == ScalingMode::Turbo {
            self.turbo_step
        } else {
            self.max_step
        }
    }

    /// Bounds invariants that must hold after every decision or setter call
    pub fn invariants_hold(&self) -> bool {
        self.min_step <= self.current_step
            && self.current_step <= self.limit_step
            && self.limit_step <= self.max_step_for_mode()
            && self.min_cores <= self.cores_enabled
            && self.cores_enabled <= self.cores_total
    }
}
