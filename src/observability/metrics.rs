//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define the `MetricsSink` seam every reporter and middleware emits through
//! - Forward to the `metrics` facade, exposed as a Prometheus scrape endpoint
//! - Provide a discarding sink and an in-memory sink for embedders and tests
//!
//! # Design Decisions
//! - Metric names are runtime strings (configurable), so the sink takes `&str`
//! - The exporter is process-global; installing it twice is a startup error

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use thiserror::Error;

use crate::config::schema::StatsConfig;
use crate::config::validation::split_tag;

/// Destination for counters, gauges and histograms.
pub trait MetricsSink: Send + Sync + 'static {
    /// Increment the counter `name` by `delta`.
    fn count(&self, name: &str, delta: u64);
    /// Set the gauge `name` to `value`.
    fn gauge(&self, name: &str, value: f64);
    /// Record one histogram observation.
    fn histogram(&self, name: &str, value: f64);
}

/// Sink shared between the runtime, its reporters and request middleware.
pub type SharedSink = Arc<dyn MetricsSink>;

/// Error building the metrics client.
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("unknown stats output {0:?}")]
    UnknownOutput(String),

    #[error("invalid prometheus address {address:?}: {source}")]
    Address {
        address: String,
        source: std::net::AddrParseError,
    },

    #[error("stats tag {0:?} must be formatted as key:value")]
    Tag(String),

    #[error("failed to install prometheus exporter: {0}")]
    Install(#[from] BuildError),
}

/// Build the sink selected by `config.output`.
///
/// `PROMETHEUS` installs the global recorder with an HTTP scrape listener;
/// `NULL` discards everything.
pub fn build_sink(config: &StatsConfig) -> Result<SharedSink, StatsError> {
    match config.output.to_ascii_uppercase().as_str() {
        "NULL" => Ok(Arc::new(NullSink)),
        "PROMETHEUS" => {
            let address: SocketAddr =
                config
                    .prometheus
                    .address
                    .parse()
                    .map_err(|source| StatsError::Address {
                        address: config.prometheus.address.clone(),
                        source,
                    })?;

            let mut builder = PrometheusBuilder::new().with_http_listener(address);
            for tag in &config.prometheus.tags {
                let (key, value) = split_tag(tag).ok_or_else(|| StatsError::Tag(tag.clone()))?;
                builder = builder.add_global_label(key, value);
            }
            builder.install()?;

            tracing::info!(address = %address, "Prometheus exporter listening");
            Ok(Arc::new(RecorderSink))
        }
        other => Err(StatsError::UnknownOutput(other.to_string())),
    }
}

/// Forwards to whatever recorder is installed in the `metrics` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecorderSink;

impl MetricsSink for RecorderSink {
    fn count(&self, name: &str, delta: u64) {
        metrics::counter!(name.to_owned()).increment(delta);
    }

    fn gauge(&self, name: &str, value: f64) {
        metrics::gauge!(name.to_owned()).set(value);
    }

    fn histogram(&self, name: &str, value: f64) {
        metrics::histogram!(name.to_owned()).record(value);
    }
}

/// Discards every metric.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn count(&self, _name: &str, _delta: u64) {}
    fn gauge(&self, _name: &str, _value: f64) {}
    fn histogram(&self, _name: &str, _value: f64) {}
}

/// One emission captured by [`MemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Count { name: String, delta: u64 },
    Gauge { name: String, value: f64 },
    Histogram { name: String, value: f64 },
}

impl Sample {
    pub fn name(&self) -> &str {
        match self {
            Sample::Count { name, .. } | Sample::Gauge { name, .. } | Sample::Histogram { name, .. } => {
                name
            }
        }
    }
}

/// Records every emission in order.
#[derive(Debug, Default)]
pub struct MemorySink {
    samples: Mutex<Vec<Sample>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Sample>> {
        self.samples.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// All samples emitted so far.
    pub fn samples(&self) -> Vec<Sample> {
        self.lock().clone()
    }

    /// Sum of every increment to counter `name`.
    pub fn total_count(&self, name: &str) -> u64 {
        self.lock()
            .iter()
            .filter_map(|sample| match sample {
                Sample::Count { name: n, delta } if n == name => Some(*delta),
                _ => None,
            })
            .sum()
    }

    /// Number of `count` calls made for `name`.
    pub fn count_calls(&self, name: &str) -> usize {
        self.lock()
            .iter()
            .filter(|sample| matches!(sample, Sample::Count { name: n, .. } if n == name))
            .count()
    }

    /// Every value set on gauge `name`, oldest first.
    pub fn gauges(&self, name: &str) -> Vec<f64> {
        self.lock()
            .iter()
            .filter_map(|sample| match sample {
                Sample::Gauge { name: n, value } if n == name => Some(*value),
                _ => None,
            })
            .collect()
    }

    /// Every observation recorded on histogram `name`, oldest first.
    pub fn histograms(&self, name: &str) -> Vec<f64> {
        self.lock()
            .iter()
            .filter_map(|sample| match sample {
                Sample::Histogram { name: n, value } if n == name => Some(*value),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl MetricsSink for MemorySink {
    fn count(&self, name: &str, delta: u64) {
        self.lock().push(Sample::Count {
            name: name.to_string(),
            delta,
        });
    }

    fn gauge(&self, name: &str, value: f64) {
        self.lock().push(Sample::Gauge {
            name: name.to_string(),
            value,
        });
    }

    fn histogram(&self, name: &str, value: f64) {
        self.lock().push(Sample::Histogram {
            name: name.to_string(),
            value,
        });
    }
}
