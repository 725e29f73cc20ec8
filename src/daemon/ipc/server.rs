use super::handlers::handle_client;
use crate::common::LogLevel;
use crate::core::ScalingController;
use crate::core::power::PowerSequencer;
use anyhow::Result;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tokio::net::UnixListener;

#[derive(Clone)]
pub struct IpcHandles {
    pub controller: ScalingController,
    pub power: Arc<PowerSequencer>,
    /// Reloads settings.toml, returning the active profile name
    pub reload_fn: Arc<dyn Fn() -> anyhow::Result<String> + Send + Sync>,
    pub set_log_level: Arc<dyn Fn(LogLevel) + Send + Sync>,
    pub current_log_level: Arc<RwLock<LogLevel>>,
}

pub async fn start<P: AsRef<Path>>(path: P, h: IpcHandles) -> Result<()> {
    let path_ref = path.as_ref();
    let _ = std::fs::remove_file(path_ref);
    let listener = UnixListener::bind(path_ref)?;
    let _ = std::fs::set_permissions(path_ref, std::fs::Permissions::from_mode(0o660));
    tracing::debug!(target: "mpgpu::ipc", "IPC listening at {:?}", path_ref);

    loop {
        let (stream, _) = listener.accept().await?;
        let hc = h.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, hc).await {
                tracing::warn!(target: "mpgpu::ipc", "client error: {:?}", e);
            }
        });
    }
}
