//! Hardware collaborators: clock programming, job dispatch and power domains.

mod dummy;
mod sysfs;

pub use dummy::{NullClock, NullDispatch, NullPower};
pub use sysfs::{SysfsClock, SysfsDispatch, SysfsPower};

use crate::core::clock::ClockBackend;
use crate::core::config::BackendConfig;
use crate::core::dispatch::JobDispatch;
use crate::core::power::PowerDomain;
use std::sync::Arc;
use tracing::warn;

pub struct Backends {
    pub clock: Box<dyn ClockBackend>,
    pub dispatch: Arc<dyn JobDispatch>,
    pub power: Arc<dyn PowerDomain>,
}

/// Sysfs backends when the clock node exists, logging no-ops otherwise
pub fn create_backends(cfg: &BackendConfig) -> Backends {
    if sysfs::is_available(cfg) {
        Backends {
            clock: Box::new(SysfsClock::new(cfg)),
            dispatch: Arc::new(SysfsDispatch::new(cfg)),
            power: Arc::new(SysfsPower::new(cfg)),
        }
    } else {
        warn!(
            target: "mpgpu::clock",
            "Clock node {} missing, running without hardware backends",
            cfg.clock_path.display()
        );
        Backends {
            clock: Box::new(NullClock),
            dispatch: Arc::new(NullDispatch),
            power: Arc::new(NullPower::default()),
        }
    }
}
