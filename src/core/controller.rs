//! Owns the policy engine and hands dirty targets to the apply queue.
//!
//! All mutation of the scaling state goes through this type. Decisions and
//! setters take the engine lock for a few hundred nanoseconds and never touch
//! hardware; the apply worker and direct frequency requests program the clock
//! through the critical section.

use crate::core::apply::{Apply, ApplyQueue, ApplyStats};
use crate::core::clock::{ClockBackend, ClockCritical};
use crate::core::dispatch::{DispatchPause, JobDispatch};
use crate::core::error::{Result, ScaleError};
use crate::core::scaling::{PolicyEngine, ScalingMode, ScalingSnapshot, UtilizationSample};
use crate::core::table::{ChipProfile, FrequencyStep};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub profile: String,
    pub powered: bool,
    pub pending: bool,
    pub scaling: ScalingSnapshot,
    pub stats: ApplyStats,
}

struct Shared {
    engine: Mutex<PolicyEngine>,
    clock: ClockCritical,
    dispatch: Arc<dyn JobDispatch>,
    queue: ApplyQueue,
    powered: AtomicBool,
    freq_tx: watch::Sender<u32>,
}

impl Shared {
    fn engine(&self) -> MutexGuard<'_, PolicyEngine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit_frequency(&self, freq_mhz: u32) {
        self.freq_tx.send_replace(freq_mhz);
        debug!(target: "mpgpu::profiling", freq_mhz, "GPU frequency");
    }

    /// Pauses dispatch, programs `step` read from the table of `generation`
    /// and records it as applied
    fn program(&self, step: &FrequencyStep, generation: u64) -> Result<()> {
        {
            let _pause = DispatchPause::new(self.dispatch.as_ref());
            self.clock.set_step(step).map_err(|e| match e {
                ScaleError::HardwareApplyFailed { .. } => e,
                other => ScaleError::hardware(step.index, other),
            })?;
        }
        self.engine().mark_applied(step.index, generation);
        Ok(())
    }
}

impl Apply for Shared {
    fn apply(&self) -> Result<()> {
        let (step, generation, cores, reprogram) = {
            let engine = self.engine();
            let state = engine.state();
            (
                *engine.table().step(state.current_step),
                engine.generation(),
                state.cores_enabled,
                engine.needs_reprogram(),
            )
        };

        if let Err(e) = self.dispatch.set_core_count(cores) {
            warn!(target: "mpgpu::apply", "Failed to limit dispatch to {} cores: {}", cores, e);
        }

        let res = if !self.powered.load(Ordering::Acquire) {
            debug!(target: "mpgpu::apply", "GPU powered down, skipping step {}", step.index);
            Ok(())
        } else if reprogram {
            self.program(&step, generation)
        } else {
            Ok(())
        };

        let (freq, stale) = {
            let engine = self.engine();
            (
                engine.table().freq_mhz(engine.state().last_applied_step),
                engine.needs_reprogram(),
            )
        };
        self.emit_frequency(freq);

        // target moved while the clock was being programmed
        if res.is_ok() && stale && self.powered.load(Ordering::Acquire) {
            self.queue.schedule();
        }
        res
    }
}

#[derive(Clone)]
pub struct ScalingController {
    shared: Arc<Shared>,
}

impl ScalingController {
    /// Builds the controller state. No hardware is touched until the first
    /// application.
    pub fn new(
        profile: ChipProfile,
        mode: ScalingMode,
        clock: Box<dyn ClockBackend>,
        dispatch: Arc<dyn JobDispatch>,
    ) -> Result<Self> {
        let name = profile.name.clone();
        let engine = PolicyEngine::new(profile, mode)?;
        let freq = engine.table().freq_mhz(engine.state().last_applied_step);
        let (freq_tx, _) = watch::channel(freq);

        info!(
            target: "mpgpu::scaling",
            "Scaling controller ready: {} ({} steps, mode {}, step {})",
            name,
            engine.table().len(),
            mode,
            engine.state().current_step
        );

        Ok(Self {
            shared: Arc::new(Shared {
                engine: Mutex::new(engine),
                clock: ClockCritical::new(clock),
                dispatch,
                queue: ApplyQueue::new(),
                powered: AtomicBool::new(true),
                freq_tx,
            }),
        })
    }

    /// Spawns the apply worker on the current runtime
    pub fn start(&self) {
        self.shared.queue.start(Arc::downgrade(&self.shared));
    }

    fn schedule(&self) {
        if self.shared.queue.schedule() {
            debug!(target: "mpgpu::apply", "Application scheduled");
        }
    }

    /// One decision cycle. Returns true when an application was requested.
    pub fn on_utilization_sample(&self, sample: &UtilizationSample) -> bool {
        if !self.is_powered() {
            debug!(target: "mpgpu::scaling", "GPU powered down, sample skipped");
            return false;
        }

        let dirty = self.shared.engine().on_sample(sample);
        if dirty {
            self.schedule();
        }
        dirty
    }

    pub fn set_mode(&self, mode: ScalingMode) {
        self.shared.engine().set_mode(mode);
        info!(target: "mpgpu::scaling", "Scaling mode set to {}", mode);
        self.schedule();
    }

    /// Mode from its numeric value, rejecting anything outside 0..=3
    pub fn set_mode_value(&self, value: u32) -> Result<()> {
        let mode = ScalingMode::try_from(value)?;
        self.set_mode(mode);
        Ok(())
    }

    pub fn mode(&self) -> ScalingMode {
        self.shared.engine().state().mode
    }

    fn apply_setter(
        &self,
        what: &str,
        value: impl std::fmt::Display,
        f: impl FnOnce(&mut PolicyEngine) -> Result<bool>,
    ) -> Result<()> {
        let moved = {
            let mut engine = self.shared.engine();
            f(&mut *engine)?
        };
        info!(target: "mpgpu::scaling", "{} set to {}", what, value);
        if moved {
            self.schedule();
        }
        Ok(())
    }

    pub fn set_min_step(&self, step: usize) -> Result<()> {
        self.apply_setter("min step", step, |e| e.set_min_step(step))
    }

    pub fn set_max_step(&self, step: usize) -> Result<()> {
        self.apply_setter("max step", step, |e| e.set_max_step(step))
    }

    pub fn set_min_cores(&self, cores: u32) -> Result<()> {
        self.apply_setter("min cores", cores, |e| e.set_min_cores(cores))
    }

    pub fn set_max_cores(&self, cores: u32) -> Result<()> {
        self.apply_setter("max cores", cores, |e| e.set_max_cores(cores))
    }

    /// Frequency of the current target step, in MHz
    pub fn get_current_frequency_value(&self) -> u32 {
        self.shared.engine().current_frequency()
    }

    pub fn preheat(&self) -> bool {
        let changed = self.shared.engine().preheat();
        if changed {
            debug!(target: "mpgpu::scaling", "Preheat raised the target");
            self.schedule();
        }
        changed
    }

    /// Programs `step` immediately, bypassing the queue.
    ///
    /// The step must lie inside the current bounds. Blocks for the duration
    /// of one clock change.
    pub fn set_frequency(&self, step: usize) -> Result<()> {
        let (target, generation) = {
            let mut engine = self.shared.engine();
            engine.force_step(step)?;
            (*engine.table().step(step), engine.generation())
        };

        if !self.is_powered() {
            debug!(target: "mpgpu::clock", "GPU powered down, step {} deferred", step);
            self.schedule();
            return Ok(());
        }

        self.shared.program(&target, generation)?;
        self.shared.emit_frequency(target.freq_mhz);
        info!(target: "mpgpu::clock", "Frequency forced to step {} ({} MHz)", step, target.freq_mhz);
        Ok(())
    }

    /// Replaces the threshold table and step constants as a unit
    pub fn swap_profile(&self, profile: ChipProfile) -> Result<()> {
        let name = profile.name.clone();
        self.shared.engine().swap_profile(profile)?;
        info!(target: "mpgpu::scaling", "Threshold table swapped to {}", name);
        self.schedule();
        Ok(())
    }

    /// Caps the upper step at a cooling level (0 = no cap). The cap only
    /// ever lowers the operator's maximum and outlives table swaps.
    pub fn set_cooling_level(&self, level: usize) -> Result<()> {
        self.apply_setter("cooling level", level, |e| e.set_cooling_level(level))
    }

    /// Cooling level that keeps the upper step at or below `step`
    pub fn cooling_level_for_step(&self, step: usize) -> usize {
        let engine = self.shared.engine();
        let table = engine.table();
        table.frequency_level(table.freq_mhz(step.min(table.last_index())))
    }

    pub fn cooling_level(&self) -> usize {
        self.shared.engine().cooling_level()
    }

    pub fn max_cooling_level(&self) -> usize {
        self.shared.engine().table().max_level()
    }

    /// Cancels pending work, waits for an application in flight and
    /// disarms scheduling until [`rearm`](Self::rearm).
    pub async fn flush(&self) {
        self.shared.queue.flush().await;
    }

    /// Waits for pending and in-flight applications without disarming
    pub async fn drain(&self) {
        self.shared.queue.drain().await;
    }

    pub fn rearm(&self) {
        self.shared.queue.rearm();
        if self.shared.engine().needs_reprogram() {
            self.schedule();
        }
    }

    pub async fn shutdown(&self) {
        self.shared.queue.shutdown().await;
        info!(target: "mpgpu::scaling", "Scaling controller stopped");
    }

    pub fn snapshot(&self) -> ScalingSnapshot {
        self.shared.engine().snapshot()
    }

    pub fn profile(&self) -> ChipProfile {
        self.shared.engine().profile().clone()
    }

    pub fn status(&self) -> ControllerStatus {
        let (profile, scaling) = {
            let engine = self.shared.engine();
            (engine.profile().name.clone(), engine.snapshot())
        };
        ControllerStatus {
            profile,
            powered: self.is_powered(),
            pending: self.shared.queue.is_pending(),
            scaling,
            stats: self.shared.queue.stats(),
        }
    }

    pub fn apply_stats(&self) -> ApplyStats {
        self.shared.queue.stats()
    }

    /// Frequency events, one per application
    pub fn subscribe_frequency(&self) -> watch::Receiver<u32> {
        self.shared.freq_tx.subscribe()
    }

    pub fn is_powered(&self) -> bool {
        self.shared.powered.load(Ordering::Acquire)
    }

    pub(crate) fn set_powered(&self, powered: bool) {
        self.shared.powered.store(powered, Ordering::Release);
    }

    pub(crate) fn critical<R>(&self, f: impl FnOnce(&mut dyn ClockBackend) -> R) -> R {
        self.shared.clock.critical(f)
    }

    pub(crate) fn gate_clock(&self, enable: bool) {
        self.shared.clock.gate(enable);
    }

    pub(crate) fn emit_frequency(&self, freq_mhz: u32) {
        self.shared.emit_frequency(freq_mhz);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mock::{MockClock, MockDispatch};
    use crate::core::table::{ThresholdTable, UTIL_FULL_SCALE};
    use std::time::Duration;

    fn three_step_profile() -> ChipProfile {
        let table = ThresholdTable::new(vec![
            FrequencyStep::new(100, 0x10, 50, 100, 2),
            FrequencyStep::new(200, 0x20, 90, 150, 2),
            FrequencyStep::new(300, 0x30, 140, 200, 2),
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

    fn controller_with(clock: &MockClock) -> (ScalingController, Arc<MockDispatch>) {
        let dispatch = Arc::new(MockDispatch::new());
        let ctl = ScalingController::new(
            three_step_profile(),
            ScalingMode::FrequencyAndCore,
            Box::new(clock.clone()),
            dispatch.clone(),
        )
        .unwrap();
        ctl.start();
        (ctl, dispatch)
    }

    #[tokio::test]
    async fn test_init_touches_no_hardware() {
        let clock = MockClock::new();
        let (ctl, dispatch) = controller_with(&clock);
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(clock.applied().is_empty());
        assert!(dispatch.core_counts().is_empty());
        assert_eq!(ctl.get_current_frequency_value(), 100);
    }

    #[tokio::test]
    async fn test_climb_then_damped_drop() {
        let clock = MockClock::new();
        let (ctl, dispatch) = controller_with(&clock);

        for _ in 0..3 {
            ctl.on_utilization_sample(&UtilizationSample::uniform(180));
        }
        ctl.drain().await;
        let snap = ctl.snapshot();
        assert_eq!(snap.current_step, 2);
        assert_eq!(snap.cores_enabled, 2);
        assert_eq!(clock.applied(), vec![2]);
        assert_eq!(dispatch.core_counts().last(), Some(&2));

        assert!(!ctl.on_utilization_sample(&UtilizationSample::uniform(10)));
        assert!(!ctl.on_utilization_sample(&UtilizationSample::uniform(10)));
        assert_eq!(ctl.snapshot().current_step, 2);
        assert!(ctl.on_utilization_sample(&UtilizationSample::uniform(10)));
        ctl.drain().await;

        assert_eq!(ctl.snapshot().current_step, 1);
        assert_eq!(clock.applied(), vec![2, 1]);
        assert_eq!(ctl.snapshot().last_applied_step, 1);
    }

    #[tokio::test]
    async fn test_two_schedules_apply_once_with_latest_target() {
        let clock = MockClock::new();
        let (ctl, _dispatch) = controller_with(&clock);

        assert!(ctl.on_utilization_sample(&UtilizationSample::uniform(180)));
        assert!(ctl.on_utilization_sample(&UtilizationSample::uniform(180)));
        ctl.drain().await;

        assert_eq!(clock.applied(), vec![2]);
        let stats = ctl.apply_stats();
        assert_eq!(stats.runs, 1);
        assert_eq!(stats.coalesced, 1);
    }

    #[tokio::test]
    async fn test_min_step_clamp_applies_once() {
        let clock = MockClock::new();
        let (ctl, _dispatch) = controller_with(&clock);

        ctl.set_min_step(2).unwrap();
        assert_eq!(ctl.snapshot().current_step, 2);
        ctl.drain().await;

        assert_eq!(clock.applied(), vec![2]);
        assert_eq!(ctl.apply_stats().runs, 1);
    }

    #[tokio::test]
    async fn test_flush_waits_for_in_flight_apply() {
        let clock = MockClock::new().with_delay_ms(50);
        let (ctl, dispatch) = controller_with(&clock);

        ctl.set_min_step(2).unwrap();
        while clock.attempts() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        ctl.flush().await;

        assert_eq!(dispatch.pauses(), 1);
        assert!(!dispatch.is_paused());
        assert_eq!(ctl.snapshot().last_applied_step, 2);
    }

    #[tokio::test]
    async fn test_flush_disarms_until_rearm() {
        let clock = MockClock::new();
        let (ctl, _dispatch) = controller_with(&clock);

        ctl.flush().await;
        ctl.set_min_step(1).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(clock.applied().is_empty());

        ctl.rearm();
        ctl.drain().await;
        assert_eq!(clock.applied(), vec![1]);
    }

    #[tokio::test]
    async fn test_turbo_is_immediate() {
        let clock = MockClock::new();
        let (ctl, _dispatch) = controller_with(&clock);
        ctl.set_max_step(1).unwrap();
        ctl.on_utilization_sample(&UtilizationSample::uniform(10));

        ctl.set_mode(ScalingMode::Turbo);
        let snap = ctl.snapshot();
        assert_eq!(snap.current_step, snap.turbo_step);
        assert_eq!(snap.cores_enabled, snap.cores_total);

        assert!(matches!(ctl.set_mode_value(4), Err(ScaleError::InvalidArgument(_))));
        assert_eq!(ctl.mode(), ScalingMode::Turbo);
    }

    #[tokio::test]
    async fn test_failed_apply_retries_and_resumes_dispatch() {
        let clock = MockClock::new();
        let (ctl, dispatch) = controller_with(&clock);

        clock.set_fail(true);
        ctl.set_min_step(1).unwrap();
        ctl.drain().await;

        assert_eq!(ctl.apply_stats().failures, 1);
        assert_eq!(ctl.snapshot().last_applied_step, 0);
        assert_eq!(dispatch.pauses(), 1);
        assert!(!dispatch.is_paused());

        clock.set_fail(false);
        // neutral sample, target still differs from hardware
        assert!(ctl.on_utilization_sample(&UtilizationSample::uniform(120)));
        ctl.drain().await;
        assert_eq!(clock.applied(), vec![1]);
        assert_eq!(ctl.snapshot().last_applied_step, 1);
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_not_fatal() {
        let clock = MockClock::new();
        let (ctl, dispatch) = controller_with(&clock);
        dispatch.set_fail(true);

        ctl.set_min_step(1).unwrap();
        ctl.drain().await;
        assert_eq!(clock.applied(), vec![1]);
        assert_eq!(ctl.apply_stats().failures, 0);
    }

    #[tokio::test]
    async fn test_powered_down_skips_samples() {
        let clock = MockClock::new();
        let (ctl, _dispatch) = controller_with(&clock);
        ctl.set_powered(false);

        assert!(!ctl.on_utilization_sample(&UtilizationSample::uniform(UTIL_FULL_SCALE)));
        assert_eq!(ctl.snapshot().current_step, 0);
    }

    #[tokio::test]
    async fn test_set_frequency_programs_directly() {
        let clock = MockClock::new();
        let (ctl, dispatch) = controller_with(&clock);
        let mut freq = ctl.subscribe_frequency();

        ctl.set_frequency(2).unwrap();
        assert_eq!(clock.applied(), vec![2]);
        assert_eq!(ctl.snapshot().last_applied_step, 2);
        assert_eq!(dispatch.pauses(), dispatch.resumes());
        assert!(freq.has_changed().unwrap());
        assert_eq!(*freq.borrow_and_update(), 300);

        ctl.set_max_step(1).unwrap();
        assert!(ctl.set_frequency(2).is_err());
        assert!(ctl.set_frequency(9).is_err());
    }

    #[tokio::test]
    async fn test_frequency_event_after_apply() {
        let clock = MockClock::new();
        let (ctl, _dispatch) = controller_with(&clock);
        let freq = ctl.subscribe_frequency();

        ctl.preheat();
        ctl.drain().await;
        assert_eq!(*freq.borrow(), 200);
        assert_eq!(clock.last_clock_value(), Some(0x20));
    }

    #[tokio::test]
    async fn test_cooling_level_caps_without_touching_max_step() {
        let clock = MockClock::new();
        let (ctl, _dispatch) = controller_with(&clock);
        ctl.set_mode(ScalingMode::FrequencyAndCore);
        ctl.drain().await;
        assert_eq!(ctl.max_cooling_level(), 2);
        assert_eq!(ctl.cooling_level(), 0);
        assert_eq!(ctl.cooling_level_for_step(1), 1);

        ctl.set_cooling_level(1).unwrap();
        let snap = ctl.snapshot();
        assert_eq!((snap.max_step, snap.limit_step, snap.current_step), (2, 1, 1));
        assert_eq!(ctl.cooling_level(), 1);
        ctl.drain().await;
        assert_eq!(clock.applied(), vec![2, 1]);

        // a lower operator limit stays in force under the cap
        ctl.set_max_step(0).unwrap();
        ctl.set_cooling_level(0).unwrap();
        let snap = ctl.snapshot();
        assert_eq!((snap.max_step, snap.limit_step), (0, 0));
        assert!(ctl.set_cooling_level(3).is_err());
    }

    #[tokio::test]
    async fn test_swap_during_apply_reaches_hardware() {
        let clock = MockClock::new().with_delay_ms(80);
        let (ctl, _dispatch) = controller_with(&clock);

        ctl.set_min_step(2).unwrap();
        while clock.attempts() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let mut profile = three_step_profile();
        profile.name = "swapped".into();
        profile.min_step = 2;
        profile.table = ThresholdTable::new(vec![
            FrequencyStep::new(100, 0x50, 50, 100, 2),
            FrequencyStep::new(200, 0x51, 90, 150, 2),
            FrequencyStep::new(300, 0x52, 140, 200, 2),
        ])
        .unwrap();
        ctl.swap_profile(profile).unwrap();
        ctl.drain().await;

        assert_eq!(clock.applied(), vec![2, 2]);
        assert_eq!(clock.last_clock_value(), Some(0x52));
        assert_eq!(ctl.snapshot().last_applied_step, 2);
        assert!(!ctl.status().pending);
    }

    #[tokio::test]
    async fn test_swap_profile_reprograms() {
        let clock = MockClock::new();
        let (ctl, _dispatch) = controller_with(&clock);

        let mut profile = three_step_profile();
        profile.name = "hot".into();
        profile.table = ThresholdTable::new(vec![
            FrequencyStep::new(150, 0x15, 50, 100, 1),
            FrequencyStep::new(250, 0x25, 90, 150, 1),
            FrequencyStep::new(350, 0x35, 140, 200, 1),
        ])
        .unwrap();
        ctl.swap_profile(profile).unwrap();
        ctl.drain().await;

        assert_eq!(clock.applied(), vec![0]);
        assert_eq!(clock.last_clock_value(), Some(0x15));
        assert_eq!(ctl.status().profile, "hot");
    }

    #[tokio::test]
    async fn test_core_only_limits_dispatch() {
        let clock = MockClock::new();
        let (ctl, dispatch) = controller_with(&clock);
        ctl.set_mode(ScalingMode::CoreCountOnly);
        ctl.drain().await;

        ctl.on_utilization_sample(&UtilizationSample::new(0, 0, 20));
        ctl.drain().await;
        assert_eq!(dispatch.core_counts().last(), Some(&1));
        assert_eq!(ctl.snapshot().current_step, 1);
    }
}
