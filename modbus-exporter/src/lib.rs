//! Prometheus exporter for Modbus TCP devices.
//!
//! Prometheus scrapes the exporter with a `target` (the device address) and a
//! `config` (the name of a device profile). The exporter reads the profile's
//! registers from the target and answers with Prometheus text.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  GET /modbus   ┌─────────────┐  Modbus TCP  ┌──────────┐
//! │ Prometheus │───────────────>│ HTTP server │─────────────>│  Device  │
//! └────────────┘                └─────────────┘              └──────────┘
//!                                      │
//!                               ┌─────────────┐   SIGHUP / POST /-/reload
//!                               │ SafeConfig  │<──── reload worker
//!                               └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! modbus-exporter --config.file modbus.yml
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for exporter settings and [`loader`] for
//! the device profile format.

pub mod config;
pub mod exposition;
pub mod http;
pub mod loader;
pub mod reload;
pub mod telemetry;

pub use config::{ExporterConfig, LogFormat, LoggingConfig};
pub use http::{AppState, HttpServer, create_router};
pub use loader::{LoadError, load_profiles};
pub use reload::{ReloadHandle, ReloadWorker, reload_channel};
pub use telemetry::ExporterMetrics;

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
    }

    Ok(())
}
