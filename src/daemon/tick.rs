use crate::core::thermal::ThermalAction;
use crate::daemon::run::{Daemon, now_ms};
use anyhow::{Context, Result};
use tracing::{debug, error};

/// Thermal zones are polled every this many sample ticks
const THERMAL_EVERY_TICKS: u64 = 10;

impl Daemon {
    pub fn tick(&mut self) {
        self.tick_count = self.tick_count.wrapping_add(1);

        if let Err(e) = self.process_tick() {
            let err_msg = e.to_string();
            let now = now_ms();

            let should_log = match &self.last_error {
                None => true,
                Some((last_msg, last_time)) => {
                    err_msg != *last_msg
                        || (now.saturating_sub(*last_time) >= self.cfg.error_debounce_ms)
                }
            };

            if should_log {
                error!(target: "mpgpu::daemon", "Tick error: {:?}", e);
                self.last_error = Some((err_msg, now));
            } else {
                debug!(target: "mpgpu::daemon", "Tick error suppressed: {:?}", e);
            }
        }
    }

    fn process_tick(&mut self) -> Result<()> {
        if let Some(sample) = self.source.read()? {
            self.controller.on_utilization_sample(&sample);
        }

        if self.tick_count.is_multiple_of(THERMAL_EVERY_TICKS) || self.tick_count == 1 {
            self.check_thermal()?;
        }
        Ok(())
    }

    fn check_thermal(&mut self) -> Result<()> {
        let Some(thermal) = self.thermal.as_mut() else {
            return Ok(());
        };

        let temp = thermal.monitor.get_max_temp()?;
        match thermal.governor.evaluate(temp) {
            Some(ThermalAction::Throttle(step)) => {
                let level = self.controller.cooling_level_for_step(step);
                self.controller
                    .set_cooling_level(level)
                    .context("Failed to apply thermal cap")?;
            }
            Some(ThermalAction::Release) => {
                self.controller
                    .set_cooling_level(0)
                    .context("Failed to release thermal cap")?;
            }
            None => {}
        }
        Ok(())
    }
}
