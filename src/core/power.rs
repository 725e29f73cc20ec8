//! Suspend and resume sequencing around the scaling controller.

use crate::core::controller::ScalingController;
use crate::core::error::Result;
use std::sync::Arc;
use tracing::{info, warn};

/// Status word reported while every domain is off
pub const DOMAINS_OFF: u32 = 0x7;

/// Power management unit for the GPU's silicon domains
pub trait PowerDomain: Send + Sync {
    fn power_down_all(&self) -> Result<()>;

    fn power_up_all(&self) -> Result<()>;

    /// Raw status word, one bit per domain that is off
    fn status(&self) -> Result<u32>;
}

pub struct PowerSequencer {
    controller: ScalingController,
    domain: Arc<dyn PowerDomain>,
}

impl PowerSequencer {
    pub fn new(controller: ScalingController, domain: Arc<dyn PowerDomain>) -> Self {
        Self { controller, domain }
    }

    fn power_down(&self) -> Result<()> {
        self.controller.critical(|_| {
            self.controller.set_powered(false);
            self.domain.power_down_all()
        })
    }

    fn power_up(&self) -> Result<()> {
        self.controller.critical(|_| {
            let res = self.domain.power_up_all();
            self.controller.set_powered(true);
            res
        })
    }

    pub fn light_suspend(&self) -> Result<()> {
        self.controller.emit_frequency(0);
        let res = self.power_down();
        self.controller.gate_clock(false);
        info!(target: "mpgpu::power", "Light suspend done");
        res
    }

    pub fn light_resume(&self) -> Result<()> {
        self.controller.gate_clock(true);
        let res = self.power_up();
        self.controller
            .emit_frequency(self.controller.get_current_frequency_value());
        info!(target: "mpgpu::power", "Light resume done");
        res
    }

    /// Quiesces the apply queue before cutting power
    pub async fn deep_suspend(&self) -> Result<()> {
        self.controller.gate_clock(true);
        self.controller.flush().await;
        let res = self.power_down();
        self.controller.gate_clock(false);
        info!(target: "mpgpu::power", "Deep suspend done");
        res
    }

    pub fn deep_resume(&self) -> Result<()> {
        self.controller.gate_clock(true);
        let res = self.power_up();
        self.controller.rearm();
        info!(target: "mpgpu::power", "Deep resume done");
        res
    }

    pub fn domain_status(&self) -> u32 {
        if !self.controller.is_powered() {
            return DOMAINS_OFF;
        }
        match self.domain.status() {
            Ok(status) => status,
            Err(e) => {
                warn!(target: "mpgpu::power", "Failed to read domain status: {}", e);
                DOMAINS_OFF
            }
        }
    }
}
