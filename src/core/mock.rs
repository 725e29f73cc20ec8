//! Recording backends for tests and hardware-less runs.

use crate::core::clock::ClockBackend;
use crate::core::dispatch::JobDispatch;
use crate::core::error::{Result, ScaleError};
use crate::core::power::PowerDomain;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct ClockInner {
    applied: Mutex<Vec<usize>>,
    last_clock_value: Mutex<Option<u32>>,
    fail: AtomicBool,
    delay_ms: AtomicU64,
    enabled: AtomicBool,
    active: AtomicU32,
    max_active: AtomicU32,
    attempts: AtomicU32,
}

#[derive(Clone, Default)]
pub struct MockClock {
    inner: Arc<ClockInner>,
}

impl MockClock {
    pub fn new() -> Self {
        let clock = Self::default();
        clock.inner.enabled.store(true, Ordering::SeqCst);
        clock
    }

    pub fn with_delay_ms(self, ms: u64) -> Self {
        self.inner.delay_ms.store(ms, Ordering::SeqCst);
        self
    }

    pub fn set_fail(&self, fail: bool) {
        self.inner.fail.store(fail, Ordering::SeqCst);
    }

    /// Steps successfully programmed, in order
    pub fn applied(&self) -> Vec<usize> {
        self.inner
            .applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    pub fn last_clock_value(&self) -> Option<u32> {
        *self
            .inner
            .last_clock_value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping `apply_frequency` calls observed
    pub fn max_concurrency(&self) -> u32 {
        self.inner.max_active.load(Ordering::SeqCst)
    }
}

impl ClockBackend for MockClock {
    fn apply_frequency(&mut self, step: usize, clock_value: u32) -> Result<()> {
        let inner = &self.inner;
        inner.attempts.fetch_add(1, Ordering::SeqCst);
        let active = inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        inner.max_active.fetch_max(active, Ordering::SeqCst);

        let delay = inner.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }

        let res = if inner.fail.load(Ordering::SeqCst) {
            Err(ScaleError::hardware(step, "mock clock refused"))
        } else {
            inner
                .applied
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(step);
            *inner
                .last_clock_value
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(clock_value);
            Ok(())
        };

        inner.active.fetch_sub(1, Ordering::SeqCst);
        res
    }

    fn enable_clock(&mut self) -> Result<()> {
        self.inner.enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disable_clock(&mut self) -> Result<()> {
        self.inner.enabled.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockDispatch {
    pauses: AtomicU32,
    resumes: AtomicU32,
    cores: Mutex<Vec<u32>>,
    fail: AtomicBool,
}

impl MockDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn pauses(&self) -> u32 {
        self.pauses.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> u32 {
        self.resumes.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.pauses() != self.resumes()
    }

    /// Every core limit requested, in order
    pub fn core_counts(&self) -> Vec<u32> {
        self.cores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl JobDispatch for MockDispatch {
    fn set_core_count(&self, cores: u32) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ScaleError::invalid("mock dispatch refused core limit"));
        }
        self.cores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(cores);
        Ok(())
    }

    fn pause(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockPower {
    down: AtomicU32,
    up: AtomicU32,
    off: AtomicBool,
}

impl MockPower {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn power_downs(&self) -> u32 {
        self.down.load(Ordering::SeqCst)
    }

    pub fn power_ups(&self) -> u32 {
        self.up.load(Ordering::SeqCst)
    }
}

impl PowerDomain for MockPower {
    fn power_down_all(&self) -> Result<()> {
        self.down.fetch_add(1, Ordering::SeqCst);
        self.off.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn power_up_all(&self) -> Result<()> {
        self.up.fetch_add(1, Ordering::SeqCst);
        self.off.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn status(&self) -> Result<u32> {
        Ok(if self.off.load(Ordering::SeqCst) { 0x7 } else { 0x0 })
    }
}
