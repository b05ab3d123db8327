//! Prometheus text exposition of scrape results.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

use modbus_exporter_core::collector::ERROR_METRIC_NAME;
use modbus_exporter_core::{MetricsSink, Sample, SampleKind, ScrapeError};

/// Content type of the Prometheus text format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

struct MetricFamily {
    name: String,
    help: String,
    kind: SampleKind,
    series: Vec<(BTreeMap<String, String>, f64)>,
}

/// Metrics sink rendering one scrape as Prometheus text.
///
/// Families are written in the order their first sample arrived.
#[derive(Default)]
pub struct TextExposition {
    families: Vec<MetricFamily>,
    index: HashMap<String, usize>,
    error: Option<String>,
}

impl TextExposition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Error reported by a failed scrape, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Number of samples received.
    pub fn sample_count(&self) -> usize {
        self.families.iter().map(|f| f.series.len()).sum()
    }

    /// Render in Prometheus exposition format.
    pub fn render(&self) -> String {
        let mut output = String::with_capacity(self.sample_count() * 100);

        for family in &self.families {
            writeln!(output, "# HELP {} {}", family.name, escape_help(&family.help)).ok();
            writeln!(output, "# TYPE {} {}", family.name, family.kind.as_str()).ok();

            for (labels, value) in &family.series {
                writeln!(
                    output,
                    "{}{} {}",
                    family.name,
                    format_labels(labels),
                    format_value(*value)
                )
                .ok();
            }
        }

        output
    }
}

impl MetricsSink for TextExposition {
    fn emit(&mut self, sample: Sample) {
        let index = match self.index.get(&sample.name) {
            Some(&i) => i,
            None => {
                self.families.push(MetricFamily {
                    name: sample.name.clone(),
                    help: sample.help,
                    kind: sample.kind,
                    series: Vec::new(),
                });
                self.index.insert(sample.name, self.families.len() - 1);
                self.families.len() - 1
            }
        };

        self.families[index].series.push((sample.labels, sample.value));
    }

    fn invalid(&mut self, error: &ScrapeError) {
        self.error = Some(format!("{}: {}", ERROR_METRIC_NAME, error));
    }
}

/// Escape a label value for Prometheus format.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

fn format_labels(labels: &BTreeMap<String, String>) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}
