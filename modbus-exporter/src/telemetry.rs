//! The exporter's own metrics, served on the telemetry path.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tracing::warn;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct KindLabels {
    kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ConfigLabels {
    config: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ResultLabels {
    result: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct BuildLabels {
    version: String,
}

fn collection_histogram() -> Histogram {
    // 5ms .. ~10s
    Histogram::new(exponential_buckets(0.005, 2.0, 12))
}

/// Registry of exporter self-metrics.
#[derive(Debug)]
pub struct ExporterMetrics {
    registry: Registry,
    request_errors: Family<KindLabels, Counter>,
    collection_duration: Family<ConfigLabels, Histogram>,
    reloads: Family<ResultLabels, Counter>,
    last_reload_successful: Gauge,
}

impl Default for ExporterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ExporterMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let request_errors = Family::<KindLabels, Counter>::default();
        registry.register(
            "modbus_request_errors",
            "Errors in requests to the Modbus exporter",
            request_errors.clone(),
        );

        let collection_duration: Family<ConfigLabels, Histogram> =
            Family::new_with_constructor(collection_histogram);
        registry.register(
            "modbus_collection_duration_seconds",
            "Duration of collections by the Modbus exporter",
            collection_duration.clone(),
        );

        let reloads = Family::<ResultLabels, Counter>::default();
        registry.register(
            "modbus_config_reloads",
            "Number of device profile reloads",
            reloads.clone(),
        );

        let last_reload_successful = Gauge::default();
        registry.register(
            "modbus_config_last_reload_successful",
            "Whether the last device profile reload succeeded",
            last_reload_successful.clone(),
        );

        let build_info = Family::<BuildLabels, Gauge>::default();
        build_info
            .get_or_create(&BuildLabels {
                version: env!("CARGO_PKG_VERSION").to_string(),
            })
            .set(1);
        registry.register(
            "modbus_exporter_build_info",
            "Build information of the Modbus exporter",
            build_info,
        );

        Self {
            registry,
            request_errors,
            collection_duration,
            reloads,
            last_reload_successful,
        }
    }

    /// Count a failed scrape request by error category.
    pub fn record_request_error(&self, kind: &str) {
        self.request_errors
            .get_or_create(&KindLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    /// Record how long a collection for `config` took.
    pub fn observe_collection(&self, config: &str, seconds: f64) {
        self.collection_duration
            .get_or_create(&ConfigLabels {
                config: config.to_string(),
            })
            .observe(seconds);
    }

    /// Record the outcome of a profile reload.
    pub fn record_reload(&self, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.reloads
            .get_or_create(&ResultLabels {
                result: result.to_string(),
            })
            .inc();
        self.last_reload_successful.set(i64::from(success));
    }

    /// Render in Prometheus exposition format.
    pub fn render(&self) -> String {
        let mut output = String::new();
        if let Err(e) = encode(&mut output, &self.registry) {
            warn!("Failed to encode exporter metrics: {}", e);
        }
        output
    }
}
