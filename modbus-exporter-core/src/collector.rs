//! Turning decoded data units into labeled samples.
//!
//! [`collect`] runs one complete scrape: it reads the workload, assembles one
//! sample per data unit and pushes everything, including the scrape's own
//! timing samples, into a [`MetricsSink`]. A scrape either delivers all of
//! its samples or a single error report.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::error::{Result, ScrapeError};
use crate::profile::DataType;
use crate::reader::scrape_target;
use crate::transport::Transport;
use crate::workload::{DataUnit, Workload};

/// Prefix of every register metric.
pub const METRIC_PREFIX: &str = "modbus_";

/// Metric name used for registers without a physical-quantity name.
pub const FALLBACK_METRIC_NAME: &str = "modbus_word";

/// Name under which a failed scrape is reported.
pub const ERROR_METRIC_NAME: &str = "modbus_error";

const REGISTER_HELP: &str = "Value read from Modbus registers.";

/// Kind of an emitted sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleKind {
    Counter,
    Gauge,
}

impl SampleKind {
    /// Counters for `counter` registers, gauges for everything else.
    pub fn for_data_type(data_type: DataType) -> Self {
        match data_type {
            DataType::Counter => SampleKind::Counter,
            _ => SampleKind::Gauge,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SampleKind::Counter => "counter",
            SampleKind::Gauge => "gauge",
        }
    }
}

/// A named, typed, labeled value.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub help: String,
    pub kind: SampleKind,
    pub value: f64,
    pub labels: BTreeMap<String, String>,
}

impl Sample {
    /// Unlabeled gauge, used for the scrape's own measurements.
    pub fn gauge(name: impl Into<String>, help: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            kind: SampleKind::Gauge,
            value,
            labels: BTreeMap::new(),
        }
    }
}

/// Receiver of assembled samples.
pub trait MetricsSink {
    /// Accept one sample.
    fn emit(&mut self, sample: Sample);

    /// Record that the scrape failed; no samples were emitted.
    fn invalid(&mut self, error: &ScrapeError);
}

/// Timing and size of a successful scrape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrapeSummary {
    pub data_units: usize,
    pub read_duration: Duration,
    pub total_duration: Duration,
}

/// Scrape `target` and deliver the resulting samples to `sink`.
pub async fn collect<T, S>(
    transport: &T,
    target: &str,
    workload: Workload,
    sink: &mut S,
) -> Result<ScrapeSummary>
where
    T: Transport + ?Sized,
    S: MetricsSink + ?Sized,
{
    let start = Instant::now();

    let result = async {
        let units = scrape_target(transport, target, workload).await?;
        let read_duration = start.elapsed();
        let samples = assemble_samples(&units)?;
        Ok::<_, ScrapeError>((units.len(), read_duration, samples))
    }
    .await;

    let (data_units, read_duration, samples) = match result {
        Ok(r) => r,
        Err(e) => {
            error!(address = target, error = %e, "Scrape failed");
            sink.invalid(&e);
            return Err(e);
        }
    };

    sink.emit(Sample::gauge(
        "modbus_scrape_read_duration_seconds",
        "The time scraping target took in seconds.",
        read_duration.as_secs_f64(),
    ));
    sink.emit(Sample::gauge(
        "modbus_scrape_data_units_returned",
        "Data units returned from single scrape.",
        data_units as f64,
    ));
    for sample in samples {
        sink.emit(sample);
    }

    let total_duration = start.elapsed();
    sink.emit(Sample::gauge(
        "modbus_total_scrape_duration_seconds",
        "Total MODBUS time scrape took (read and processing).",
        total_duration.as_secs_f64(),
    ));

    debug!(address = target, data_units, ?total_duration, "Scrape complete");

    Ok(ScrapeSummary {
        data_units,
        read_duration,
        total_duration,
    })
}

/// Build one sample per data unit, failing on the first invalid one.
pub fn assemble_samples(units: &[DataUnit]) -> Result<Vec<Sample>> {
    let mut kinds: HashMap<String, SampleKind> = HashMap::new();
    let mut seen: HashSet<(String, Vec<(String, String)>)> = HashSet::new();
    let mut samples = Vec::with_capacity(units.len());

    for unit in units {
        let sample = register_to_sample(unit)?;

        let kind = *kinds.entry(sample.name.clone()).or_insert(sample.kind);
        if kind != sample.kind {
            return Err(ScrapeError::sample(
                &sample.name,
                format!(
                    "register '{}' is a {} but the metric is already a {}",
                    unit.name,
                    sample.kind.as_str(),
                    kind.as_str()
                ),
            ));
        }

        let identity = (
            sample.name.clone(),
            sample
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Vec<_>>(),
        );
        if !seen.insert(identity) {
            return Err(ScrapeError::sample(
                &sample.name,
                format!(
                    "register '{}' duplicates the label set of another sample",
                    unit.name
                ),
            ));
        }

        samples.push(sample);
    }

    Ok(samples)
}

/// Convert one decoded data unit into a sample.
pub fn register_to_sample(unit: &DataUnit) -> Result<Sample> {
    let name = metric_name(&unit.si_name);

    if !is_valid_metric_name(&name) {
        return Err(ScrapeError::sample(&name, "invalid metric name"));
    }
    if let Some(label) = unit.labels.keys().find(|k| !is_valid_label_name(k)) {
        return Err(ScrapeError::sample(
            &name,
            format!("invalid label name '{}'", label),
        ));
    }

    let kind = SampleKind::for_data_type(unit.data_type);

    debug!(
        metric_name = %name,
        kind = kind.as_str(),
        value = unit.value,
        labels = ?unit.labels,
        "Sample assembled"
    );

    Ok(Sample {
        name,
        help: REGISTER_HELP.to_string(),
        kind,
        value: unit.value,
        labels: unit.labels.clone(),
    })
}

/// `modbus_<si name>` in lower case, or [`FALLBACK_METRIC_NAME`].
pub fn metric_name(si_name: &str) -> String {
    if si_name.is_empty() {
        warn!(
            "Register has no si name, using default metric name '{}'",
            FALLBACK_METRIC_NAME
        );
        return FALLBACK_METRIC_NAME.to_string();
    }

    format!("{}{}", METRIC_PREFIX, si_name.to_lowercase())
}

/// Prometheus metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Label names must match `[a-zA-Z_][a-zA-Z0-9_]*` and must not start with `__`.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    !name.starts_with("__") && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
