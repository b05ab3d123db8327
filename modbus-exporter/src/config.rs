//! Exporter settings.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter settings, assembled from the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Device profile file or directory.
    pub config_file: PathBuf,

    /// Address to listen on (default: "0.0.0.0:9700").
    #[serde(default = "default_listen")]
    pub listen_address: String,

    /// Path of the scrape endpoint (default: "/modbus").
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,

    /// Path of the exporter's own metrics (default: "/metrics").
    #[serde(default = "default_telemetry_path")]
    pub telemetry_path: String,

    /// Prefix for all routes, normalised by [`compute_route_prefix`].
    #[serde(default)]
    pub route_prefix: String,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_listen() -> String {
    "0.0.0.0:9700".to_string()
}

fn default_metrics_path() -> String {
    "/modbus".to_string()
}

fn default_telemetry_path() -> String {
    "/metrics".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl ExporterConfig {
    /// Settings with defaults for everything but the profile location.
    pub fn new(config_file: impl Into<PathBuf>) -> Self {
        Self {
            config_file: config_file.into(),
            listen_address: default_listen(),
            metrics_path: default_metrics_path(),
            telemetry_path: default_telemetry_path(),
            route_prefix: String::new(),
            logging: LoggingConfig::default(),
        }
    }

    /// Normalise user input: listen address and route prefix.
    pub fn normalized(mut self) -> Self {
        self.listen_address = normalize_listen_address(&self.listen_address);
        self.route_prefix = compute_route_prefix(&self.route_prefix);
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;

        if !self.metrics_path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "Metrics path must start with /: {}",
                self.metrics_path
            )));
        }

        if !self.telemetry_path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "Telemetry path must start with /: {}",
                self.telemetry_path
            )));
        }

        if self.metrics_path == self.telemetry_path {
            return Err(ConfigError::Validation(format!(
                "Metrics and telemetry paths must differ: both are {}",
                self.metrics_path
            )));
        }

        Ok(())
    }

    /// Parsed listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        normalize_listen_address(&self.listen_address)
            .parse()
            .map_err(|_| {
                ConfigError::Validation(format!("Invalid listen address: {}", self.listen_address))
            })
    }

    /// Full route for `path` under the route prefix.
    pub fn route(&self, path: &str) -> String {
        format!("{}{}", compute_route_prefix(&self.route_prefix), path)
    }
}

/// `:9700` means every interface.
pub fn normalize_listen_address(listen: &str) -> String {
    match listen.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{}", port),
        None => listen.to_string(),
    }
}

/// Empty or `/` gives no prefix; anything else gets a leading `/` and no
/// trailing `/`.
pub fn compute_route_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }

    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}
