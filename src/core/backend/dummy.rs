use crate::core::clock::ClockBackend;
use crate::core::dispatch::JobDispatch;
use crate::core::error::Result;
use crate::core::power::{DOMAINS_OFF, PowerDomain};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

pub struct NullClock;

impl ClockBackend for NullClock {
    fn apply_frequency(&mut self, step: usize, clock_value: u32) -> Result<()> {
        debug!(target: "mpgpu::clock", "Null clock: step {} (0x{:x})", step, clock_value);
        Ok(())
    }

    fn enable_clock(&mut self) -> Result<()> {
        Ok(())
    }

    fn disable_clock(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct NullDispatch;

impl JobDispatch for NullDispatch {
    fn set_core_count(&self, cores: u32) -> Result<()> {
        debug!(target: "mpgpu::apply", "Null dispatch: {} cores", cores);
        Ok(())
    }

    fn pause(&self) {}

    fn resume(&self) {}
}

#[derive(Default)]
pub struct NullPower {
    off: AtomicBool,
}

impl PowerDomain for NullPower {
    fn power_down_all(&self) -> Result<()> {
        self.off.store(true, Ordering::Release);
        Ok(())
    }

    fn power_up_all(&self) -> Result<()> {
        self.off.store(false, Ordering::Release);
        Ok(())
    }

    fn status(&self) -> Result<u32> {
        Ok(if self.off.load(Ordering::Acquire) { DOMAINS_OFF } else { 0 })
    }
}
