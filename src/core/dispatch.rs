use crate::core::error::Result;
use tracing::debug;

/// Job-submission layer the controller resizes and pauses around clock changes
pub trait JobDispatch: Send + Sync {
    /// Limit concurrently dispatched work to at most `cores` execution cores
    fn set_core_count(&self, cores: u32) -> Result<()>;

    fn pause(&self);

    fn resume(&self);
}

/// Holds job dispatch paused until dropped
pub struct DispatchPause<'a> {
    dispatch: &'a dyn JobDispatch,
}

impl<'a> DispatchPause<'a> {
    pub fn new(dispatch: &'a dyn JobDispatch) -> Self {
        dispatch.pause();
        debug!(target: "mpgpu::apply", "Job dispatch paused");
        Self { dispatch }
    }
}

impl Drop for DispatchPause<'_> {
    fn drop(&mut self) {
        self.dispatch.resume();
        debug!(target: "mpgpu::apply", "Job dispatch resumed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mock::MockDispatch;

    #[test]
    fn test_pause_resumes_on_early_return() {
        let dispatch = MockDispatch::new();

        fn failing(d: &dyn JobDispatch) -> std::result::Result<(), &'static str> {
            let _pause = DispatchPause::new(d);
            Err("register write failed")
        }

        assert!(failing(&dispatch).is_err());
        assert_eq!(dispatch.pauses(), 1);
        assert_eq!(dispatch.resumes(), 1);
        assert!(!dispatch.is_paused());
    }
}
