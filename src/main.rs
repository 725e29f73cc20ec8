use anyhow::Result;
use mpgpu::core::config;
use mpgpu::daemon;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let base_filter = EnvFilter::new("info");
    let (filter_layer, filter_handle) = reload::Layer::new(base_filter);
    let timer = fmt::time::UtcTime::new(time::macros::format_description!(
        "[hour]:[minute]:[second]"
    ));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_level(false)
                .with_timer(timer)
                .with_writer(std::io::stderr),
        )
        .init();

    let settings = config::load_all()?;
    if let Err(e) = filter_handle.reload(EnvFilter::new(&settings.daemon.log_level)) {
        tracing::warn!(target: "mpgpu::daemon", "Invalid log level {}: {}", settings.daemon.log_level, e);
    }

    tracing::info!(
        target: "mpgpu::daemon",
        "mpgpud v{} started (variant={}, mode={}, interval={}ms, thermal={})",
        env!("CARGO_PKG_VERSION"),
        settings.scaling.variant,
        settings.scaling.mode,
        settings.daemon.sample_interval_ms,
        if settings.thermal.enabled { "on" } else { "off" }
    );

    let cfg = daemon::DaemonConfig {
        settings,
        error_debounce_ms: 30_000,
    };
    daemon::run::run_with_config(&cfg, filter_handle).await
}
