//! Mutual exclusion around the clock backend.
//!
//! Every frequency write goes through [`ClockCritical`]: the deferred
//! application worker, manual overrides, thermal cooling and the power
//! sequencer. The guard is released on every exit path, including panics
//! inside the closure.

use crate::core::error::Result;
use crate::core::table::FrequencyStep;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// Register-level clock programming, supplied per platform
pub trait ClockBackend: Send {
    /// Reprogram the clock source for `step`
    fn apply_frequency(&mut self, step: usize, clock_value: u32) -> Result<()>;

    fn enable_clock(&mut self) -> Result<()>;

    fn disable_clock(&mut self) -> Result<()>;
}

pub struct ClockCritical {
    backend: Mutex<Box<dyn ClockBackend>>,
}

impl ClockCritical {
    pub fn new(backend: Box<dyn ClockBackend>) -> Self {
        Self {
            backend: Mutex::new(backend),
        }
    }

    /// Runs `f` with exclusive access to the backend.
    ///
    /// A panic inside an earlier section poisons the lock; the backend holds
    /// no partially updated state of ours, so the guard is recovered.
    pub fn critical<R>(&self, f: impl FnOnce(&mut dyn ClockBackend) -> R) -> R {
        let mut guard = self.backend.lock().unwrap_or_else(PoisonError::into_inner);
        f(guard.as_mut())
    }

    pub fn set_step(&self, step: &FrequencyStep) -> Result<()> {
        self.critical(|backend| {
            debug!(
                target: "mpgpu::clock",
                "Programming step {} ({} MHz, clock 0x{:x})",
                step.index, step.freq_mhz, step.clock_value
            );
            backend.apply_frequency(step.index, step.clock_value)
        })
    }

    /// Gates or ungates the clock. Failures are logged, not returned.
    pub fn gate(&self, enable: bool) {
        let res = self.critical(|backend| {
            if enable {
                backend.enable_clock()
            } else {
                backend.disable_clock()
            }
        });
        if let Err(e) = res {
            warn!(
                target: "mpgpu::clock",
                "Failed to {} clock: {}",
                if enable { "enable" } else { "disable" },
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mock::MockClock;
    use crate::core::table::ChipVariant;
    use std::sync::Arc;

    #[test]
    fn test_set_step_reaches_backend() {
        let clock = MockClock::new();
        let critical = ClockCritical::new(Box::new(clock.clone()));
        let table = ChipVariant::M8b.profile().table;

        critical.set_step(table.step(3)).unwrap();
        assert_eq!(clock.applied(), vec![3]);
        assert_eq!(clock.last_clock_value(), Some(0xE00));
    }

    #[test]
    fn test_sections_never_overlap() {
        let clock = MockClock::new().with_delay_ms(2);
        let critical = Arc::new(ClockCritical::new(Box::new(clock.clone())));
        let table = ChipVariant::M8.profile().table;

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let critical = critical.clone();
                let step = *table.step(i);
                std::thread::spawn(move || critical.set_step(&step))
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }

        assert_eq!(clock.applied().len(), 4);
        assert_eq!(clock.max_concurrency(), 1);
    }

    #[test]
    fn test_poisoned_section_recovers() {
        let clock = MockClock::new();
        let critical = Arc::new(ClockCritical::new(Box::new(clock.clone())));

        let c = critical.clone();
        let _ = std::thread::spawn(move || {
            c.critical(|_| panic!("backend blew up"));
        })
        .join();

        let table = ChipVariant::M8.profile().table;
        assert!(critical.set_step(table.step(1)).is_ok());
        assert_eq!(clock.applied(), vec![1]);
    }
}
