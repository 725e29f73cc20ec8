use crate::common::LogLevel;
use crate::core::ScalingController;
use crate::core::backend::create_backends;
use crate::core::config::{self, Settings};
use crate::core::power::PowerSequencer;
use crate::core::sample::{UtilizationSource, create_utilization_source};
use crate::daemon::state::ThermalState;
use anyhow::{Context, Result};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::{signal, time};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

pub use crate::daemon::config::DaemonConfig;

const MIN_SAMPLE_INTERVAL_MS: u64 = 10;

#[inline]
pub(crate) fn now_ms() -> u128 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_e| {
            tracing::warn!(
                target: "mpgpu::daemon",
                "Daemon | System clock error (using fallback)"
            );
            Duration::from_secs(0)
        })
        .as_millis()
}

pub type ReloadHandle =
    tracing_subscriber::reload::Handle<tracing_subscriber::EnvFilter, tracing_subscriber::Registry>;

/// Re-reads settings.toml and pushes table and mode changes into the
/// controller. An active cooling cap carries over a table swap.
pub fn reload_scaling(controller: &ScalingController) -> Result<Settings> {
    let settings = Settings::load(config::settings_path())?;
    let profile = settings.profile()?;

    if profile != controller.profile() {
        controller
            .swap_profile(profile)
            .context("Failed to swap threshold table")?;
    }
    if settings.scaling.mode != controller.mode() {
        controller.set_mode(settings.scaling.mode);
    }
    Ok(settings)
}

pub struct Daemon {
    pub(crate) cfg: DaemonConfig,
    pub(crate) controller: ScalingController,
    pub(crate) power: Arc<PowerSequencer>,
    pub(crate) source: Box<dyn UtilizationSource>,
    pub(crate) thermal: Option<ThermalState>,

    pub(crate) last_error: Option<(String, u128)>,
    pub(crate) tick_count: u64,
}

impl Daemon {
    pub fn new(cfg: DaemonConfig) -> Result<Self> {
        let settings = &cfg.settings;
        let profile = settings.profile()?;
        let backends = create_backends(&settings.backend);

        let controller = ScalingController::new(
            profile,
            settings.scaling.mode,
            backends.clock,
            backends.dispatch,
        )
        .context("Failed to initialize scaling controller")?;
        let power = Arc::new(PowerSequencer::new(controller.clone(), backends.power));
        let source = create_utilization_source(&settings.backend.utilization_path);
        let thermal = ThermalState::from_config(&settings.thermal);
        debug!(target: "mpgpu::daemon", "Thermal throttling {}", if thermal.is_some() { "on" } else { "off" });

        Ok(Self {
            cfg,
            controller,
            power,
            source,
            thermal,
            last_error: None,
            tick_count: 0,
        })
    }

    pub fn controller(&self) -> &ScalingController {
        &self.controller
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(
            self.cfg
                .settings
                .daemon
                .sample_interval_ms
                .max(MIN_SAMPLE_INTERVAL_MS),
        )
    }

    fn reload_settings(&mut self) {
        match reload_scaling(&self.controller) {
            Ok(settings) => {
                if settings.thermal != self.cfg.settings.thermal {
                    let throttled = self
                        .thermal
                        .as_ref()
                        .is_some_and(|t| t.governor.is_throttled());
                    // the new governor starts released; the next check re-throttles
                    if throttled && let Err(e) = self.controller.set_cooling_level(0) {
                        error!(target: "mpgpu::thermal", "Failed to lift throttle on reload: {}", e);
                    }
                    self.thermal = ThermalState::from_config(&settings.thermal);
                }
                info!(
                    target: "mpgpu::daemon",
                    "Settings reloaded (profile {}, mode {})",
                    self.controller.profile().name,
                    self.controller.mode()
                );
                self.cfg.settings = settings;
            }
            Err(e) => {
                error!(target: "mpgpu::daemon", "Failed to reload settings: {:?}", e);
            }
        }
    }

    pub fn init_ipc(&self, filter_handle: ReloadHandle) {
        let initial_level = self
            .cfg
            .settings
            .daemon
            .log_level
            .parse::<LogLevel>()
            .unwrap_or_default();
        let current_log_level = Arc::new(RwLock::new(initial_level));
        let log_level_clone = current_log_level.clone();

        let handle = filter_handle.clone();
        let set_log_level = Arc::new(move |lvl: LogLevel| {
            if let Ok(mut l) = log_level_clone.write() {
                *l = lvl;
            }
            match handle.reload(EnvFilter::new(lvl.to_string())) {
                Ok(_) => debug!(target: "mpgpu::ipc", "Log level changed to {:?}", lvl),
                Err(e) => {
                    error!(target: "mpgpu::ipc", "Failed to change log level: {}", e)
                }
            }
        });

        let reload_ctl = self.controller.clone();
        let reload_fn = Arc::new(move || {
            reload_scaling(&reload_ctl).map(|_| reload_ctl.profile().name)
        });

        let ipc_handles = crate::daemon::ipc::IpcHandles {
            controller: self.controller.clone(),
            power: self.power.clone(),
            reload_fn,
            set_log_level,
            current_log_level,
        };

        let socket_path = self.cfg.settings.daemon.socket_path.clone();
        tokio::spawn(async move {
            debug!(target: "mpgpu::daemon", "Starting IPC socket listener...");
            match crate::daemon::ipc::start(&socket_path, ipc_handles).await {
                Ok(_) => info!(target: "mpgpu::daemon", "IPC    | Listener stopped"),
                Err(e) => error!(target: "mpgpu::daemon", "IPC    | Error: {:?}", e),
            }
        });
    }
}

pub async fn run_with_config(cfg: &DaemonConfig, filter_handle: ReloadHandle) -> Result<()> {
    let mut daemon = Daemon::new(cfg.clone())?;
    daemon.controller.start();
    daemon.init_ipc(filter_handle);

    let mut watch_rx = crate::daemon::watcher::start_config_watcher(config::settings_path());

    let mut interval = daemon.sample_interval();
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
    debug!(target: "mpgpu::daemon", "Sample loop started ({}ms)", interval.as_millis());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                daemon.tick();
            }
            Some(()) = watch_rx.recv() => {
                daemon.reload_settings();
                if daemon.sample_interval() != interval {
                    interval = daemon.sample_interval();
                    ticker = time::interval(interval);
                    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
                    debug!(target: "mpgpu::daemon", "Sample interval now {}ms", interval.as_millis());
                }
            }
            _ = signal::ctrl_c() => {
                info!(target: "mpgpu::daemon", "Daemon | Received Ctrl-C, shutting down");
                break;
            }
        }
    }

    daemon.controller.shutdown().await;
    info!(target: "mpgpu::daemon", "Daemon | Stopped");
    Ok(())
}
