//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Producers:
//!     → reporter.rs (periodic reporters: connection state, runtime stats)
//!     → http middleware (per-request counters and latency)
//!     → every subsystem (structured log events)
//!
//! Consumers:
//!     → metrics.rs (MetricsSink → Prometheus scrape endpoint or nowhere)
//!     → logging.rs (Logger → stdout/stderr as text or JSON, or nowhere)
//! ```
//!
//! # Design Decisions
//! - Sinks and loggers are values handed to the runtime, not globals
//! - Metrics are cheap (atomic increments behind the facade)
//! - Request ID flows into every request's log span

pub mod allocator;
pub mod logging;
pub mod metrics;
pub mod reporter;
pub mod runtime_stats;

pub use allocator::{allocation_counters, AllocationCounters, CountingAllocator};
pub use logging::{Logger, LoggerError};
pub use metrics::{build_sink, MemorySink, MetricsSink, NullSink, RecorderSink, SharedSink, StatsError};
pub use reporter::{Reporter, ReporterGroup};
pub use runtime_stats::{
    pause_history, pause_window, MemorySample, MemorySampler, PauseHistory, ProcessSampler,
    RuntimeStatsReporter, PAUSE_HISTORY_LEN,
};
