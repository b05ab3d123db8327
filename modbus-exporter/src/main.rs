//! Prometheus exporter for Modbus TCP devices.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use modbus_exporter::{
    AppState, ExporterConfig, ExporterMetrics, HttpServer, LogFormat, LoggingConfig, ReloadHandle,
    init_tracing, load_profiles, reload_channel,
};
use modbus_exporter_core::{SafeConfig, TcpTransport};

/// How long in-flight requests may run after a shutdown request.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Prometheus exporter for Modbus TCP devices.
#[derive(Parser, Debug)]
#[command(name = "modbus-exporter")]
#[command(about = "Export Modbus TCP registers as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Device profile file or directory (YAML or JSON5).
    #[arg(long = "config.file", value_name = "PATH")]
    config_file: PathBuf,

    /// Address to listen on for scrapes and telemetry.
    #[arg(long = "web.listen-address", default_value = ":9700")]
    listen_address: String,

    /// Path under which targets are scraped.
    #[arg(long = "web.metrics-path", default_value = "/modbus")]
    metrics_path: String,

    /// Path under which the exporter's own metrics are exposed.
    #[arg(long = "web.telemetry-path", default_value = "/metrics")]
    telemetry_path: String,

    /// Prefix for all HTTP routes.
    #[arg(long = "web.route-prefix", default_value = "")]
    route_prefix: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long = "log.level", default_value = "info")]
    log_level: String,

    /// Log output format.
    #[arg(long = "log.format", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Args {
    fn into_config(self) -> ExporterConfig {
        ExporterConfig {
            config_file: self.config_file,
            listen_address: self.listen_address,
            metrics_path: self.metrics_path,
            telemetry_path: self.telemetry_path,
            route_prefix: self.route_prefix,
            logging: LoggingConfig {
                level: self.log_level,
                format: self.log_format,
            },
        }
        .normalized()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config();
    config.validate().context("Invalid exporter settings")?;

    init_tracing(&config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Modbus exporter");

    let metrics = Arc::new(ExporterMetrics::new());
    let profiles = load_profiles(&config.config_file).with_context(|| {
        format!(
            "Error loading device profiles from {}",
            config.config_file.display()
        )
    })?;
    metrics.record_reload(true);
    let store = Arc::new(SafeConfig::new(profiles));

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let (reload, reload_worker) =
        reload_channel(&config.config_file, store.clone(), metrics.clone());

    let listen_addr = config.listen_addr()?;
    let state = AppState {
        config: Arc::new(config),
        store,
        transport: Arc::new(TcpTransport),
        metrics,
        reload: reload.clone(),
        shutdown: shutdown_tx.clone(),
    };

    let worker_task = tokio::spawn(reload_worker.run(shutdown_rx.clone()));
    let hangup_task = tokio::spawn(forward_hangups(reload, shutdown_rx.clone()));

    let http_server = HttpServer::new(state, listen_addr);
    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    let mut quit = shutdown_rx;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = quit.changed() => {
            info!("Received quit request, shutting down...");
        }
    }

    // Signal shutdown
    shutdown_tx.send(true)?;

    // In-flight scrapes are abandoned once the grace period ends.
    if tokio::time::timeout(SHUTDOWN_GRACE, async {
        let _ = http_task.await;
        let _ = worker_task.await;
        let _ = hangup_task.await;
    })
    .await
    .is_err()
    {
        warn!(grace = ?SHUTDOWN_GRACE, "Shutdown grace period elapsed, abandoning in-flight requests");
    }

    info!("Exporter stopped");
    Ok(())
}

/// Turn SIGHUP into reload requests.
async fn forward_hangups(reload: ReloadHandle, mut shutdown: watch::Receiver<bool>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                warn!("Cannot listen for SIGHUP, reload via HTTP only: {}", e);
                return;
            }
        };

        loop {
            tokio::select! {
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    info!("Received SIGHUP, reloading device profiles");
                    reload.trigger();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = reload;
        let _ = shutdown.changed().await;
    }
}

async fn terminate() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}
