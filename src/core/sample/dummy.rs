use super::UtilizationSource;
use crate::core::scaling::UtilizationSample;

/// Yields nothing, leaving the controller at its current target
pub struct DummySource;

impl UtilizationSource for DummySource {
    fn read(&mut self) -> anyhow::Result<Option<UtilizationSample>> {
        Ok(None)
    }
}
