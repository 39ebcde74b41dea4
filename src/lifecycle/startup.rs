//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration
//! - Build the logger, metrics sink, reporters, signal sources and listener
//!   in dependency order
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Nothing is spawned here; tasks start in `Runtime::run`
//! - Embedders may inject their own logger, sink, socket and signal sources

use std::sync::Arc;

use axum::Router;

use crate::config::loader::ConfigError;
use crate::config::schema::RuntimeConfig;
use crate::config::validation::validate_config;
use crate::http::server::HttpServer;
use crate::lifecycle::runtime::{Runtime, RuntimeError};
use crate::lifecycle::signals::{MultiSignal, OsSignal, SignalSource};
use crate::net::connection::ConnectionTracker;
use crate::net::listener::Listener;
use crate::observability::logging::Logger;
use crate::observability::metrics::{build_sink, SharedSink};
use crate::observability::reporter::ReporterGroup;
use crate::observability::runtime_stats::{MemorySampler, RuntimeStatsReporter};

/// Assembles a [`Runtime`] from configuration plus optional overrides.
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    handler: Router,
    logger: Option<Logger>,
    stats: Option<SharedSink>,
    listener: Option<Listener>,
    sampler: Option<Box<dyn FnOnce(RuntimeStatsReporter) -> RuntimeStatsReporter + Send>>,
    signals: Vec<Box<dyn SignalSource>>,
}

impl RuntimeBuilder {
    pub fn new(config: RuntimeConfig, handler: Router) -> Self {
        Self {
            config,
            handler,
            logger: None,
            stats: None,
            listener: None,
            sampler: None,
            signals: Vec::new(),
        }
    }

    /// Use `logger` instead of building one from `[logger]`.
    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Use `stats` instead of building a sink from `[stats]`.
    pub fn stats(mut self, stats: SharedSink) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Serve on a pre-bound listener instead of binding `httpserver.address`.
    pub fn listener(mut self, listener: Listener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Sample memory through `sampler` instead of the process sampler.
    pub fn memory_sampler(mut self, sampler: impl MemorySampler) -> Self {
        self.sampler = Some(Box::new(move |reporter| reporter.with_sampler(sampler)));
        self
    }

    /// Add an exit event source next to the configured ones.
    pub fn signal(mut self, source: impl SignalSource) -> Self {
        self.signals.push(Box::new(source));
        self
    }

    pub fn build(self) -> Result<Runtime, RuntimeError> {
        let config = self.config;
        validate_config(&config).map_err(|errors| RuntimeError::Config(ConfigError::Validation(errors)))?;

        let logger = match self.logger {
            Some(logger) => logger,
            None => Logger::from_config(&config.logger)?,
        };
        let stats = match self.stats {
            Some(stats) => stats,
            None => build_sink(&config.stats)?,
        };

        let conn_state = Arc::new(ConnectionTracker::new(config.connstate.clone(), stats.clone()));
        let mut runtime_stats = RuntimeStatsReporter::new(config.runtimestats.clone(), stats.clone());
        if let Some(apply) = self.sampler {
            runtime_stats = apply(runtime_stats);
        }

        let mut reporters = ReporterGroup::new();
        reporters.push(conn_state.clone());
        reporters.push(Arc::new(runtime_stats));

        let mut sources: Vec<Box<dyn SignalSource>> = Vec::new();
        // Validation admits only OS as a source name.
        for name in &config.signals.installed {
            if name.eq_ignore_ascii_case("OS") {
                sources.push(Box::new(OsSignal::from_specs(&config.signals.os.signals)?));
            }
        }
        sources.extend(self.signals);

        let server = match self.listener {
            Some(listener) => HttpServer::from_listener(listener),
            None => HttpServer::new(&config.httpserver),
        };

        tracing::dispatcher::with_default(logger.dispatch(), || {
            tracing::info!(
                address = %server
                    .local_addr()
                    .map(|addr| addr.to_string())
                    .unwrap_or_else(|| config.httpserver.address.clone()),
                signal_sources = sources.len(),
                stats_output = %config.stats.output,
                "Runtime configured"
            );
        });

        Ok(Runtime::from_parts(
            self.handler,
            logger,
            stats,
            conn_state,
            reporters,
            MultiSignal::new(sources),
            server,
            config.httpserver.shutdown_grace(),
        ))
    }
}

impl Runtime {
    /// Build a runtime for `handler` entirely from configuration.
    pub fn from_config(config: RuntimeConfig, handler: Router) -> Result<Self, RuntimeError> {
        RuntimeBuilder::new(config, handler).build()
    }
}
