pub mod config;
pub mod ipc;
pub mod run;
pub mod state;
pub mod tick;
pub mod watcher;

pub use config::DaemonConfig;
