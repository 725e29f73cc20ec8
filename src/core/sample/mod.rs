mod dummy;
mod sysfs;

use crate::core::scaling::UtilizationSample;
use std::path::Path;

pub use dummy::DummySource;
pub use sysfs::SysfsSource;

pub trait UtilizationSource: Send {
    /// One reading per sampling period, `None` when no fresh sample exists
    fn read(&mut self) -> anyhow::Result<Option<UtilizationSample>>;
}

pub fn create_utilization_source(path: &Path) -> Box<dyn UtilizationSource> {
    if sysfs::is_available(path) {
        Box::new(SysfsSource::new(path))
    } else {
        tracing::warn!(
            target: "mpgpu::daemon",
            "Utilization node {} missing, sampling disabled",
            path.display()
        );
        Box::new(DummySource)
    }
}
