pub mod apply;
pub mod backend;
pub mod clock;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod power;
pub mod sample;
pub mod scaling;
pub mod table;
pub mod thermal;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use controller::{ControllerStatus, ScalingController};
pub use error::ScaleError;
