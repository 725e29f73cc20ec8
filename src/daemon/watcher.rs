use notify::{EventKind, RecursiveMode, Watcher};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Watches settings.toml from a dedicated thread; each modification is
/// forwarded as one message.
pub fn start_config_watcher(settings_path: PathBuf) -> mpsc::Receiver<()> {
    let (watch_tx, watch_rx) = mpsc::channel::<()>(10);

    std::thread::spawn(move || {
        let tx = watch_tx;

        let mut watcher = match notify::recommended_watcher(
            move |res: Result<notify::Event, notify::Error>| {
                if let Ok(event) = res
                    && matches!(event.kind, EventKind::Modify(_))
                {
                    debug!(target: "mpgpu::daemon", "Settings file changed: {:?}", event.paths);
                    // a full channel already holds a pending reload
                    let _ = tx.try_send(());
                }
            },
        ) {
            Ok(w) => w,
            Err(e) => {
                error!(target: "mpgpu::daemon", "Failed to create settings watcher: {}", e);
                return;
            }
        };

        if let Err(e) = watcher.watch(&settings_path, RecursiveMode::NonRecursive) {
            error!(target: "mpgpu::daemon", "Failed to watch {}: {}", settings_path.display(), e);
            return;
        }

        info!(target: "mpgpu::daemon", "Settings watcher started on {}", settings_path.display());
        loop {
            std::thread::sleep(std::time::Duration::from_secs(3600));
        }
    });

    watch_rx
}
