//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the runtime.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default listen address of the HTTP server.
pub const DEFAULT_ADDRESS: &str = "0.0.0.0:8080";
/// Default grace period for in-flight requests during shutdown.
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;
/// Default interval of the periodic telemetry reporters.
pub const DEFAULT_REPORT_INTERVAL_MS: u64 = 5_000;
/// Longest accepted shutdown grace period.
pub const MAX_SHUTDOWN_GRACE_SECS: u64 = 3_600;
/// Longest accepted reporter interval.
pub const MAX_REPORT_INTERVAL_MS: u64 = 86_400_000;

/// Root configuration for the runtime.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    /// HTTP listener settings.
    pub httpserver: HttpServerConfig,

    /// Connection state metric names.
    pub connstate: ConnStateConfig,

    /// Process memory metric names.
    pub runtimestats: RuntimeStatsConfig,

    /// Logging client settings.
    pub logger: LoggerConfig,

    /// Metrics client settings.
    pub stats: StatsConfig,

    /// Shutdown signal sources.
    pub signals: SignalConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpServerConfig {
    /// Listening address of the server (e.g., "0.0.0.0:8080").
    pub address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Seconds in-flight requests are given to finish after shutdown starts.
    pub shutdown_grace_secs: u64,
}

impl HttpServerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            max_connections: 10_000,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
        }
    }
}

/// Connection state metric names.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnStateConfig {
    /// Counter tracking new clients.
    pub new_counter: String,
    /// Gauge tracking new clients.
    pub new_gauge: String,
    /// Counter tracking active clients.
    pub active_counter: String,
    /// Gauge tracking active clients.
    pub active_gauge: String,
    /// Counter tracking idle clients.
    pub idle_counter: String,
    /// Gauge tracking idle clients.
    pub idle_gauge: String,
    /// Counter tracking closed clients.
    pub closed_counter: String,
    /// Counter tracking hijacked clients.
    pub hijacked_counter: String,
    /// Interval on which gauges are reported, in milliseconds.
    pub report_interval_ms: u64,
}

impl ConnStateConfig {
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}

impl Default for ConnStateConfig {
    fn default() -> Self {
        Self {
            new_counter: "http.server.connstate.new".to_string(),
            new_gauge: "http.server.connstate.new.gauge".to_string(),
            active_counter: "http.server.connstate.active".to_string(),
            active_gauge: "http.server.connstate.active.gauge".to_string(),
            idle_counter: "http.server.connstate.idle".to_string(),
            idle_gauge: "http.server.connstate.idle.gauge".to_string(),
            closed_counter: "http.server.connstate.closed".to_string(),
            hijacked_counter: "http.server.connstate.hijacked".to_string(),
            report_interval_ms: DEFAULT_REPORT_INTERVAL_MS,
        }
    }
}

/// Process memory metric names.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeStatsConfig {
    /// Bytes currently allocated.
    pub alloc: String,
    /// Number of frees.
    pub frees: String,
    /// Bytes allocated on the heap.
    pub heap_alloc: String,
    /// Bytes obtained from the system but not in use.
    pub heap_idle: String,
    /// Bytes in use.
    pub heap_inuse: String,
    /// Live allocated objects.
    pub heap_objects: String,
    /// Bytes released to the OS.
    pub heap_released: String,
    /// Bytes obtained from the system.
    pub heap_sys: String,
    /// Number of pointer lookups.
    pub lookups: String,
    /// Number of mallocs.
    pub mallocs: String,
    /// Number of recorded pause cycles.
    pub num_gc: String,
    /// Duration of individual pauses (histogram).
    pub pause_ns: String,
    /// Total pause duration over the lifetime of the process.
    pub pause_total_ns: String,
    /// Bytes allocated, even if freed.
    pub total_alloc: String,
    /// Number of live tasks.
    pub tasks_alive: String,
    /// Interval on which metrics are reported, in milliseconds.
    pub report_interval_ms: u64,
}

impl RuntimeStatsConfig {
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}

impl Default for RuntimeStatsConfig {
    fn default() -> Self {
        Self {
            alloc: "runtime.memstats.alloc".to_string(),
            frees: "runtime.memstats.frees".to_string(),
            heap_alloc: "runtime.memstats.heap_alloc".to_string(),
            heap_idle: "runtime.memstats.heap_idle".to_string(),
            heap_inuse: "runtime.memstats.heap_inuse".to_string(),
            heap_objects: "runtime.memstats.heap_objects".to_string(),
            heap_released: "runtime.memstats.heap_released".to_string(),
            heap_sys: "runtime.memstats.heap_sys".to_string(),
            lookups: "runtime.memstats.lookups".to_string(),
            mallocs: "runtime.memstats.mallocs".to_string(),
            num_gc: "runtime.memstats.num_gc".to_string(),
            pause_ns: "runtime.memstats.pause_ns".to_string(),
            pause_total_ns: "runtime.memstats.pause_total_ns".to_string(),
            total_alloc: "runtime.memstats.total_alloc".to_string(),
            tasks_alive: "runtime.tasks.alive".to_string(),
            report_interval_ms: DEFAULT_REPORT_INTERVAL_MS,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Minimum level of logs to emit. One of TRACE, DEBUG, INFO, WARN, ERROR.
    pub level: String,

    /// Destination stream of the logs. One of STDOUT, STDERR, NULL.
    pub output: String,

    /// Line format. One of TEXT, JSON.
    pub format: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            output: "STDOUT".to_string(),
            format: "TEXT".to_string(),
        }
    }
}

/// Metrics client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Destination of the metrics. One of PROMETHEUS, NULL.
    pub output: String,

    /// Prometheus exporter settings.
    pub prometheus: PrometheusConfig,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            output: "PROMETHEUS".to_string(),
            prometheus: PrometheusConfig::default(),
        }
    }
}

/// Prometheus exporter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PrometheusConfig {
    /// Scrape endpoint bind address.
    pub address: String,

    /// Static labels for all metrics, as `key:value`.
    pub tags: Vec<String>,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:9090".to_string(),
            tags: Vec::new(),
        }
    }
}

/// Shutdown signal configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Which signal sources are installed. Choices are OS.
    pub installed: Vec<String>,

    /// OS signal source settings.
    pub os: OsSignalConfig,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            installed: vec!["OS".to_string()],
            os: OsSignalConfig::default(),
        }
    }
}

/// OS signal source configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OsSignalConfig {
    /// Which signals to listen for.
    pub signals: Vec<SignalSpec>,
}

impl Default for OsSignalConfig {
    fn default() -> Self {
        Self {
            signals: vec![
                SignalSpec::Name("SIGTERM".to_string()),
                SignalSpec::Name("SIGINT".to_string()),
            ],
        }
    }
}

/// A signal given either by name ("SIGINT", "TERM") or by number (15).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SignalSpec {
    Number(i32),
    Name(String),
}

impl fmt::Display for SignalSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalSpec::Number(n) => write!(f, "{}", n),
            SignalSpec::Name(name) => f.write_str(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = RuntimeConfig::default();
        assert_eq!(config.httpserver.address, "0.0.0.0:8080");
        assert_eq!(config.httpserver.shutdown_grace(), Duration::from_secs(30));
        assert_eq!(config.connstate.report_interval(), Duration::from_secs(5));
        assert_eq!(config.runtimestats.report_interval(), Duration::from_secs(5));
        assert_eq!(config.signals.installed, vec!["OS".to_string()]);
        assert_eq!(config.signals.os.signals.len(), 2);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: RuntimeConfig = toml::from_str(
            r#"
            [httpserver]
            address = "127.0.0.1:9000"

            [signals.os]
            signals = ["SIGHUP", 15]
            "#,
        )
        .unwrap();

        assert_eq!(config.httpserver.address, "127.0.0.1:9000");
        assert_eq!(config.httpserver.max_connections, 10_000);
        assert_eq!(config.logger.output, "STDOUT");
        assert_eq!(
            config.signals.os.signals,
            vec![SignalSpec::Name("SIGHUP".into()), SignalSpec::Number(15)]
        );
    }
}
