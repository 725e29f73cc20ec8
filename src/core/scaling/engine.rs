//! Feedback control loop: one decision per utilization sample.
//!
//! Everything here is pure state manipulation. Callers serialize access and
//! hand the returned dirty flag to the deferred application queue.

use super::state::{Bounds, ScalingSnapshot, ScalingState};
use super::{ScalingMode, UtilizationSample};
use crate::core::error::{Result, ScaleError};
use crate::core::table::{ChipProfile, ThresholdTable, UtilBand};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreRequest {
    Keep,
    Increase,
    Decrease,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proposal {
    pub next_step: usize,
    pub cores: CoreRequest,
}

#[derive(Debug, Clone)]
pub struct PolicyEngine {
    profile: ChipProfile,
    state: ScalingState,
    /// Bumped on every table swap
    generation: u64,
}

impl PolicyEngine {
    /// Builds the initial state. No hardware is touched.
    pub fn new(profile: ChipProfile, mode: ScalingMode) -> Result<Self> {
        profile.validate()?;

        let initial = profile.initial_step.clamp(profile.min_step, profile.max_step);
        let state = ScalingState {
            current_step: initial,
            last_applied_step: initial,
            cores_enabled: profile.core_count,
            cores_total: profile.core_count,
            cores_present: profile.core_count,
            stay_count: profile.table.step(initial).hold_count,
            reprogram: false,
            cooling_level: 0,
            mode,
            bounds: Bounds {
                min_step: profile.min_step,
                max_step: profile.max_step,
                min_cores: profile.min_cores,
            },
        };

        Ok(Self {
            profile,
            state,
            generation: 0,
        })
    }

    pub fn state(&self) -> &ScalingState {
        &self.state
    }

    pub fn profile(&self) -> &ChipProfile {
        &self.profile
    }

    pub fn table(&self) -> &ThresholdTable {
        &self.profile.table
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn snapshot(&self) -> ScalingSnapshot {
        self.state.snapshot(
            self.current_frequency(),
            self.profile.turbo_step,
            self.max_step_for_mode(),
        )
    }

    pub fn current_frequency(&self) -> u32 {
        self.profile.table.freq_mhz(self.state.current_step)
    }

    /// Upper step for the active mode, lowered by any cooling cap but never
    /// below the minimum step
    pub fn max_step_for_mode(&self) -> usize {
        let upper = if self.state.mode == ScalingMode::Turbo {
            self.profile.turbo_step
        } else {
            self.state.bounds.max_step
        };
        if self.state.cooling_level == 0 {
            return upper;
        }
        let cap = self.profile.table.step_for_level(self.state.cooling_level);
        upper.min(cap).max(self.state.bounds.min_step)
    }

    #[inline]
    fn hold(&self, step: usize) -> u32 {
        self.profile.table.step(step).hold_count
    }

    /// Runs one decision cycle. Returns true when the target is dirty.
    pub fn on_sample(&mut self, sample: &UtilizationSample) -> bool {
        match self.state.mode {
            ScalingMode::FrequencyAndCore | ScalingMode::Turbo => self.update_combined(sample),
            ScalingMode::CoreCountOnly => self.update_core_only(sample),
            ScalingMode::Disabled => false,
        }
    }

    fn update_core_only(&mut self, sample: &UtilizationSample) -> bool {
        let pinned = self
            .profile
            .up_step
            .clamp(self.state.bounds.min_step, self.max_step_for_mode());
        self.state.current_step = pinned;

        let pp = sample.fragment_processor_utilization;
        debug!(
            target: "mpgpu::scaling",
            "Utilization: ({:3}, {:3}, {:3}), cores enabled: {}/{}",
            sample.gpu_utilization,
            sample.vertex_processor_utilization,
            pp,
            self.state.cores_enabled,
            self.state.cores_total
        );

        let changed = if pp > UtilBand::P90.value() {
            self.state.enable_max_cores()
        } else if pp > UtilBand::P50.value() {
            self.state.enable_one_core()
        } else if pp > UtilBand::P40.value() {
            false
        } else if pp > 0 {
            self.state.disable_one_core()
        } else {
            false
        };

        changed || self.state.current_step != self.state.last_applied_step
    }

    /// Proposes the next step and core change without mutating anything
    pub fn propose(&self, sample: &UtilizationSample) -> Proposal {
        let cur = self.state.current_step;
        let util = sample.gpu_utilization;
        let up_limit = self.max_step_for_mode();
        let step = self.profile.table.step(cur);

        if util >= step.up_threshold {
            let next_step = if util < UtilBand::P80.value() && cur < up_limit {
                cur + 1
            } else {
                up_limit
            };
            return Proposal {
                next_step,
                cores: CoreRequest::Increase,
            };
        }

        if util < step.down_threshold && cur > self.state.bounds.min_step {
            return Proposal {
                next_step: cur - 1,
                cores: CoreRequest::Keep,
            };
        }

        let mut cores = CoreRequest::Keep;
        let enabled = self.state.cores_enabled;
        if enabled > 1 {
            // shed a core when the remaining ones could carry the load below the up threshold
            let load = u64::from(sample.fragment_processor_utilization) * u64::from(enabled);
            let capacity = u64::from(step.up_threshold) * u64::from(enabled - 1);
            if load < capacity && enabled > self.state.bounds.min_cores {
                cores = CoreRequest::Decrease;
            }
        }

        Proposal {
            next_step: cur,
            cores,
        }
    }

    fn update_combined(&mut self, sample: &UtilizationSample) -> bool {
        let cores_before = self.state.cores_enabled;
        let from = self.state.current_step;
        let proposal = self.propose(sample);

        if proposal.cores == CoreRequest::Increase {
            self.state.enable_max_cores();
        }

        if proposal.next_step > self.state.current_step {
            self.state.current_step = proposal.next_step;
            self.state.stay_count = self.hold(proposal.next_step);
        } else if proposal.next_step < self.state.current_step
            || proposal.cores == CoreRequest::Decrease
        {
            if self.state.stay_count == 0 {
                if proposal.cores == CoreRequest::Decrease {
                    self.state.disable_one_core();
                    self.state.stay_count = self.hold(self.state.current_step);
                }
                if proposal.next_step < self.state.current_step {
                    self.state.current_step = proposal.next_step;
                    self.state.stay_count = self.hold(proposal.next_step);
                }
            } else {
                self.state.stay_count -= 1;
            }
        }

        debug!(
            target: "mpgpu::scaling",
            "util={} pp={} step {}->{} (proposed {}) cores {}->{} stay={}",
            sample.gpu_utilization,
            sample.fragment_processor_utilization,
            from,
            self.state.current_step,
            proposal.next_step,
            cores_before,
            self.state.cores_enabled,
            self.state.stay_count
        );

        self.state.current_step != self.state.last_applied_step
            || self.state.cores_enabled != cores_before
    }

    /// Hard reset after a mode switch. Always dirty.
    fn reset(&mut self) -> bool {
        self.state.current_step = self.max_step_for_mode();
        self.state.stay_count = self.hold(self.state.current_step);
        self.state.enable_max_cores();
        true
    }

    pub fn set_mode(&mut self, mode: ScalingMode) -> bool {
        debug!(target: "mpgpu::scaling", "Scaling mode {} -> {}", self.state.mode, mode);
        self.state.mode = mode;
        self.reset()
    }

    pub fn set_min_step(&mut self, step: usize) -> Result<bool> {
        if step > self.state.bounds.max_step {
            return Err(ScaleError::invalid(format!(
                "min step {} above max step {}",
                step, self.state.bounds.max_step
            )));
        }
        self.state.bounds.min_step = step;
        Ok(self.clamp())
    }

    pub fn set_max_step(&mut self, step: usize) -> Result<bool> {
        if step < self.state.bounds.min_step || step > self.profile.turbo_step {
            return Err(ScaleError::invalid(format!(
                "max step {} outside {}..={}",
                step, self.state.bounds.min_step, self.profile.turbo_step
            )));
        }
        self.state.bounds.max_step = step;
        Ok(self.clamp())
    }

    pub fn set_min_cores(&mut self, cores: u32) -> Result<bool> {
        if cores == 0 || cores > self.state.cores_total {
            return Err(ScaleError::invalid(format!(
                "min cores {} outside 1..={}",
                cores, self.state.cores_total
            )));
        }
        self.state.bounds.min_cores = cores;
        Ok(self.clamp())
    }

    pub fn set_max_cores(&mut self, cores: u32) -> Result<bool> {
        if cores < self.state.bounds.min_cores || cores > self.state.cores_present {
            return Err(ScaleError::invalid(format!(
                "max cores {} outside {}..={}",
                cores, self.state.bounds.min_cores, self.state.cores_present
            )));
        }
        self.state.cores_total = cores;
        Ok(self.clamp())
    }

    /// Pulls the target back inside the legal range. Returns true if it moved.
    fn clamp(&mut self) -> bool {
        let upper = self.max_step_for_mode();
        let step = self
            .state
            .current_step
            .clamp(self.state.bounds.min_step, upper);
        let cores = self
            .state
            .cores_enabled
            .clamp(self.state.bounds.min_cores, self.state.cores_total);

        let moved = step != self.state.current_step || cores != self.state.cores_enabled;
        if step != self.state.current_step {
            self.state.current_step = step;
            self.state.stay_count = self.hold(step);
        }
        self.state.cores_enabled = cores;

        if moved {
            debug!(target: "mpgpu::scaling", "Clamped target to step {} cores {}", step, cores);
        }
        moved
    }

    /// Raises to at least the default step with every core enabled
    pub fn preheat(&mut self) -> bool {
        let target = self
            .profile
            .default_step
            .clamp(self.state.bounds.min_step, self.max_step_for_mode());

        let mut changed = false;
        if self.state.current_step < target {
            self.state.current_step = target;
            self.state.stay_count = self.hold(target);
            changed = true;
        }
        self.state.enable_max_cores() || changed
    }

    /// Direct step override; must stay inside the current bounds
    pub fn force_step(&mut self, step: usize) -> Result<bool> {
        let upper = self.max_step_for_mode();
        if step < self.state.bounds.min_step || step > upper {
            return Err(ScaleError::invalid(format!(
                "step {} outside {}..={}",
                step, self.state.bounds.min_step, upper
            )));
        }
        let changed = step != self.state.current_step;
        self.state.current_step = step;
        self.state.stay_count = self.hold(step);
        Ok(changed || step != self.state.last_applied_step)
    }

    /// Records `step` as programmed from the table of `generation`. A step
    /// read from a table that has since been swapped out leaves the
    /// reprogram flag set.
    pub fn mark_applied(&mut self, step: usize, generation: u64) {
        self.state.last_applied_step = step;
        if generation == self.generation {
            self.state.reprogram = false;
        }
    }

    /// Caps the upper step at a cooling level, 0 lifts the cap. Operator
    /// bounds are left untouched.
    pub fn set_cooling_level(&mut self, level: usize) -> Result<bool> {
        let max = self.profile.table.max_level();
        if level > max {
            return Err(ScaleError::invalid(format!(
                "cooling level {} outside 0..={}",
                level, max
            )));
        }
        self.state.cooling_level = level;
        Ok(self.clamp())
    }

    pub fn cooling_level(&self) -> usize {
        self.state.cooling_level
    }

    /// Whether the hardware step differs from the target
    pub fn needs_reprogram(&self) -> bool {
        self.state.reprogram || self.state.current_step != self.state.last_applied_step
    }

    /// Replaces table and step constants as one unit. Always dirty.
    pub fn swap_profile(&mut self, profile: ChipProfile) -> Result<bool> {
        profile.validate()?;

        self.state.bounds = Bounds {
            min_step: profile.min_step,
            max_step: profile.max_step,
            min_cores: profile.min_cores,
        };
        self.state.cores_present = profile.core_count;
        self.state.cores_total = profile.core_count;
        // the applied index refers to the old table
        self.state.reprogram = true;
        self.generation = self.generation.wrapping_add(1);
        self.state.cooling_level = self.state.cooling_level.min(profile.table.max_level());
        self.profile = profile;
        self.clamp();
        if self.state.stay_count > self.hold(self.state.current_step) {
            self.state.stay_count = self.hold(self.state.current_step);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::table::FrequencyStep;

    fn three_step_profile() -> ChipProfile {
        let table = ThresholdTable::new(vec![
            FrequencyStep::new(100, 1, 50, 100, 2),
            FrequencyStep::new(200, 2, 90, 150, 2),
            FrequencyStep::new(300, 3, 140, 200, 2),
        ])
        .unwrap();
        ChipProfile {
            name: "test".into(),
            table,
            core_count: 2,
            initial_step: 0,
            default_step: 1,
            up_step: 1,
            turbo_step: 2,
            min_step: 0,
            max_step: 2,
            min_cores: 1,
        }
    }

    fn engine() -> PolicyEngine {
        PolicyEngine::new(three_step_profile(), ScalingMode::FrequencyAndCore).unwrap()
    }

    #[test]
    fn test_init_state() {
        let e = engine();
        let s = e.state();
        assert_eq!(s.current_step, 0);
        assert_eq!(s.last_applied_step, 0);
        assert_eq!(s.cores_enabled, 2);
        assert_eq!(s.cores_total, 2);
        assert_eq!(s.stay_count, 2);
    }

    #[test]
    fn test_promotion_is_immediate() {
        let mut e = engine();
        assert!(e.on_sample(&UtilizationSample::uniform(180)));
        assert_eq!(e.state().current_step, 1);
        assert_eq!(e.state().stay_count, 2);
        assert!(e.on_sample(&UtilizationSample::uniform(180)));
        assert_eq!(e.state().current_step, 2);
    }

    #[test]
    fn test_high_load_jumps_to_up_limit() {
        let mut e = engine();
        e.on_sample(&UtilizationSample::uniform(240));
        assert_eq!(e.state().current_step, 2);
    }

    #[test]
    fn test_hysteresis_band_holds_step() {
        let mut e = engine();
        e.on_sample(&UtilizationSample::uniform(180));
        e.on_sample(&UtilizationSample::uniform(180));
        assert_eq!(e.state().current_step, 2);
        let stay = e.state().stay_count;

        // between down (140) and up (200) of step 2, fragment load too high to shed a core
        e.on_sample(&UtilizationSample::new(170, 170, 170));
        assert_eq!(e.state().current_step, 2);
        assert_eq!(e.state().stay_count, stay);
    }

    #[test]
    fn test_demotion_waits_for_hold_count() {
        let mut e = engine();
        e.on_sample(&UtilizationSample::uniform(180));
        e.on_sample(&UtilizationSample::uniform(180));
        assert_eq!(e.state().current_step, 2);

        e.on_sample(&UtilizationSample::new(10, 0, 200));
        assert_eq!(e.state().current_step, 2);
        assert_eq!(e.state().stay_count, 1);
        e.on_sample(&UtilizationSample::new(10, 0, 200));
        assert_eq!(e.state().current_step, 2);
        assert_eq!(e.state().stay_count, 0);
        e.on_sample(&UtilizationSample::new(10, 0, 200));
        assert_eq!(e.state().current_step, 1);
        assert_eq!(e.state().stay_count, 2);
    }

    #[test]
    fn test_demotion_stops_at_min_step() {
        let mut e = engine();
        e.set_min_step(1).unwrap();
        for _ in 0..10 {
            e.on_sample(&UtilizationSample::uniform(0));
        }
        assert_eq!(e.state().current_step, 1);
    }

    #[test]
    fn test_core_shed_uses_load_balance_test() {
        let mut e = engine();
        e.state.stay_count = 0;
        // 40 * 2 = 80 < 100 * 1
        let p = e.propose(&UtilizationSample::new(60, 0, 40));
        assert_eq!(p.cores, CoreRequest::Decrease);
        assert_eq!(p.next_step, 0);

        // equality is no change: 50 * 2 == 100 * 1
        let p = e.propose(&UtilizationSample::new(60, 0, 50));
        assert_eq!(p.cores, CoreRequest::Keep);

        assert!(e.on_sample(&UtilizationSample::new(60, 0, 40)));
        assert_eq!(e.state().cores_enabled, 1);
        assert_eq!(e.state().stay_count, 2);
    }

    #[test]
    fn test_core_shed_respects_min_cores() {
        let mut e = engine();
        e.set_min_cores(2).unwrap();
        e.state.stay_count = 0;
        let p = e.propose(&UtilizationSample::new(60, 0, 10));
        assert_eq!(p.cores, CoreRequest::Keep);
    }

    #[test]
    fn test_promotion_enables_all_cores() {
        let mut e = engine();
        e.set_max_cores(1).unwrap();
        e.set_max_cores(2).unwrap();
        assert_eq!(e.state().cores_enabled, 1);
        e.on_sample(&UtilizationSample::uniform(180));
        assert_eq!(e.state().cores_enabled, 2);
    }

    #[test]
    fn test_core_only_policy_bands() {
        let mut e = PolicyEngine::new(three_step_profile(), ScalingMode::CoreCountOnly).unwrap();
        // pinned to up_step 1, which differs from applied step 0
        assert!(e.on_sample(&UtilizationSample::new(0, 0, 120)));
        assert_eq!(e.state().current_step, 1);
        assert_eq!(e.state().cores_enabled, 2);

        e.mark_applied(1, e.generation());
        assert!(e.on_sample(&UtilizationSample::new(0, 0, 20)));
        assert_eq!(e.state().cores_enabled, 1);
        // at minimum already
        assert!(!e.on_sample(&UtilizationSample::new(0, 0, 20)));
        // 40%..50% band leaves cores alone
        assert!(!e.on_sample(&UtilizationSample::new(0, 0, 110)));
        assert!(e.on_sample(&UtilizationSample::new(0, 0, 140)));
        assert_eq!(e.state().cores_enabled, 2);
        // zero load is no change
        assert!(!e.on_sample(&UtilizationSample::new(0, 0, 0)));
        assert_eq!(e.state().cores_enabled, 2);
    }

    #[test]
    fn test_disabled_mode_ignores_samples() {
        let mut e = engine();
        e.set_mode(ScalingMode::Disabled);
        let before = e.state().clone();
        assert!(!e.on_sample(&UtilizationSample::uniform(250)));
        assert_eq!(e.state(), &before);
    }

    #[test]
    fn test_mode_switch_resets() {
        let mut e = engine();
        e.set_max_step(1).unwrap();
        assert!(e.set_mode(ScalingMode::Turbo));
        assert_eq!(e.state().current_step, 2);
        assert_eq!(e.state().cores_enabled, 2);
        assert!(e.set_mode(ScalingMode::FrequencyAndCore));
        assert_eq!(e.state().current_step, 1);
    }

    #[test]
    fn test_setters_validate_ordering() {
        let mut e = engine();
        e.set_max_step(1).unwrap();
        assert!(e.set_min_step(2).is_err());
        assert!(e.set_max_step(3).is_err());
        e.set_min_step(1).unwrap();
        assert!(e.set_max_step(0).is_err());
        assert!(e.set_min_cores(0).is_err());
        assert!(e.set_min_cores(3).is_err());
        assert!(e.set_max_cores(3).is_err());
        let before = e.state().clone();
        assert!(e.set_min_step(5).is_err());
        assert_eq!(e.state(), &before);
    }

    #[test]
    fn test_set_min_step_clamps_up() {
        let mut e = engine();
        assert!(e.set_min_step(2).unwrap());
        assert_eq!(e.state().current_step, 2);
        assert!(!e.set_min_step(2).unwrap());
    }

    #[test]
    fn test_set_max_step_clamps_down() {
        let mut e = engine();
        e.on_sample(&UtilizationSample::uniform(240));
        assert_eq!(e.state().current_step, 2);
        assert!(e.set_max_step(1).unwrap());
        assert_eq!(e.state().current_step, 1);
    }

    #[test]
    fn test_preheat_raises_to_default() {
        let mut e = engine();
        e.set_max_cores(1).unwrap();
        e.set_max_cores(2).unwrap();
        assert!(e.preheat());
        assert_eq!(e.state().current_step, 1);
        assert_eq!(e.state().cores_enabled, 2);
        assert!(!e.preheat());
    }

    #[test]
    fn test_force_step_bounds() {
        let mut e = engine();
        e.set_max_step(1).unwrap();
        assert!(e.force_step(2).is_err());
        assert!(e.force_step(1).unwrap());
        assert_eq!(e.state().current_step, 1);
    }

    #[test]
    fn test_swap_profile_reclamps() {
        let mut e = engine();
        e.on_sample(&UtilizationSample::uniform(240));
        let mut p = three_step_profile();
        p.max_step = 1;
        p.turbo_step = 1;
        assert!(e.swap_profile(p).unwrap());
        assert_eq!(e.state().current_step, 1);
        assert!(e.snapshot().invariants_hold());
    }

    #[test]
    fn test_stale_generation_keeps_reprogram() {
        let mut e = engine();
        let old = e.generation();
        e.swap_profile(three_step_profile()).unwrap();
        assert!(e.needs_reprogram());

        e.mark_applied(0, old);
        assert!(e.needs_reprogram());
        e.mark_applied(0, e.generation());
        assert!(!e.needs_reprogram());
    }

    #[test]
    fn test_cooling_only_lowers_the_limit() {
        let mut e = engine();
        e.set_max_step(1).unwrap();

        // level 0 of 2 caps at step 2, above the operator limit
        assert!(!e.set_cooling_level(0).unwrap());
        e.on_sample(&UtilizationSample::uniform(240));
        assert_eq!(e.state().current_step, 1);

        assert!(e.set_cooling_level(2).unwrap());
        assert_eq!(e.state().current_step, 0);
        assert_eq!(e.snapshot().limit_step, 0);
        assert_eq!(e.snapshot().max_step, 1);
        assert!(e.set_cooling_level(3).is_err());

        e.set_cooling_level(0).unwrap();
        assert_eq!(e.snapshot().limit_step, 1);
        assert_eq!(e.snapshot().max_step, 1);
    }

    #[test]
    fn test_cooling_survives_swap_and_turbo() {
        let mut e = engine();
        e.set_cooling_level(1).unwrap();
        e.set_mode(ScalingMode::Turbo);
        assert_eq!(e.state().current_step, 1);

        e.swap_profile(three_step_profile()).unwrap();
        assert_eq!(e.cooling_level(), 1);
        assert_eq!(e.snapshot().limit_step, 1);

        // the minimum step wins over the cap
        e.set_min_step(2).unwrap();
        assert_eq!(e.snapshot().limit_step, 2);
        assert!(e.snapshot().invariants_hold());
    }

    #[test]
    fn test_invariants_over_mixed_sequence() {
        let mut e = engine();
        let loads = [0u32, 255, 30, 120, 200, 5, 90, 160, 250, 10, 10, 10, 10, 75];
        for (i, l) in loads.iter().cycle().take(200).enumerate() {
            e.on_sample(&UtilizationSample::new(*l, *l / 2, (*l * 7 + i as u32) % 256));
            assert!(e.snapshot().invariants_hold(), "violated at sample {}", i);
            match i % 37 {
                5 => {
                    let _ = e.set_min_step(1);
                }
                11 => {
                    let _ = e.set_max_step(1);
                }
                17 => {
                    e.set_mode(ScalingMode::Turbo);
                }
                23 => {
                    let _ = e.set_min_cores(2);
                }
                29 => {
                    e.set_mode(ScalingMode::FrequencyAndCore);
                    let _ = e.set_min_step(0);
                    let _ = e.set_max_step(2);
                    let _ = e.set_min_cores(1);
                }
                _ => {}
            }
            assert!(e.snapshot().invariants_hold(), "violated after setter {}", i);
        }
    }
}
