//! The service runtime.
//!
//! # Responsibilities
//! - Start the telemetry reporters and the HTTP listener
//! - Wait for the first exit event from any installed signal source
//! - Tear down in order: reporters, then listener drain
//!
//! # Phases
//! ```text
//! Idle ──run()──▶ Running ──exit event──▶ Draining ──drained/deadline──▶ Stopped
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use thiserror::Error;
use tokio::sync::watch;
use tracing::instrument::WithSubscriber;

use crate::config::loader::ConfigError;
use crate::http::middleware::instrument;
use crate::http::server::HttpServer;
use crate::lifecycle::signals::{manual_signal, ExitResult, MultiSignal, SignalSource};
use crate::net::connection::ConnectionTracker;
use crate::net::listener::ListenerError;
use crate::observability::logging::{Logger, LoggerError};
use crate::observability::metrics::{SharedSink, StatsError};
use crate::observability::reporter::ReporterGroup;

/// How long teardown waits for reporter tasks to observe the stop.
const REPORTER_STOP_WAIT: Duration = Duration::from_secs(1);

/// Errors from building or running the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("logger error: {0}")]
    Logger(#[from] LoggerError),

    #[error("stats error: {0}")]
    Stats(#[from] StatsError),

    #[error("listener error: {0}")]
    Listener(#[from] ListenerError),

    #[error("failed to install handler for signal {signal}: {source}")]
    Signal {
        signal: i32,
        source: std::io::Error,
    },

    #[error("unknown signal {0:?}")]
    UnknownSignal(String),

    /// A fault reported by an embedder-provided signal source.
    #[error("{0}")]
    Fault(String),
}

fn listener_lost() -> RuntimeError {
    RuntimeError::Listener(ListenerError::Closed)
}

/// Lifecycle phase of a [`Runtime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimePhase {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// A configured service, ready to run once.
pub struct Runtime {
    handler: Router,
    logger: Logger,
    stats: SharedSink,
    conn_state: Arc<ConnectionTracker>,
    reporters: ReporterGroup,
    signals: MultiSignal,
    server: HttpServer,
    shutdown_grace: Duration,
    phase: watch::Sender<RuntimePhase>,
}

impl Runtime {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        handler: Router,
        logger: Logger,
        stats: SharedSink,
        conn_state: Arc<ConnectionTracker>,
        reporters: ReporterGroup,
        signals: MultiSignal,
        server: HttpServer,
        shutdown_grace: Duration,
    ) -> Self {
        let (phase, _) = watch::channel(RuntimePhase::Idle);
        Self {
            handler,
            logger,
            stats,
            conn_state,
            reporters,
            signals,
            server,
            shutdown_grace,
            phase,
        }
    }

    /// Watch the phase as `run` moves through it.
    pub fn subscribe_phase(&self) -> watch::Receiver<RuntimePhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> RuntimePhase {
        *self.phase.borrow()
    }

    /// The tracker bound to this runtime's listener.
    pub fn conn_state(&self) -> Arc<ConnectionTracker> {
        Arc::clone(&self.conn_state)
    }

    /// Listening address, known before `run` only for a pre-bound listener.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Serve until the first exit event, then drain.
    ///
    /// Returns the exit event's value: `Ok(())` for a requested stop, the
    /// error for a fault such as a listener that failed to bind.
    pub async fn run(self) -> ExitResult {
        let dispatch = self.logger.dispatch().clone();
        self.run_inner().with_subscriber(dispatch).await
    }

    async fn run_inner(self) -> ExitResult {
        let Runtime {
            handler,
            logger,
            stats,
            conn_state,
            mut reporters,
            mut signals,
            mut server,
            shutdown_grace,
            phase,
        } = self;

        // The server task owns the trigger. If it dies without firing, the
        // runtime still exits.
        let (listener_trigger, listener_signal) = manual_signal();
        signals.push(listener_signal.fail_on_drop(listener_lost));
        let exit = match Box::new(signals).install() {
            Ok(exit) => exit,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install shutdown signals");
                phase.send_replace(RuntimePhase::Stopped);
                return Err(e);
            }
        };

        reporters.start_all();
        server.set_conn_state(conn_state);
        let app = instrument(handler, stats, logger);
        let server = server.spawn(app, listener_trigger);

        phase.send_replace(RuntimePhase::Running);
        tracing::info!(reporters = reporters.len(), "Runtime started");

        let result = exit.await;
        match &result {
            Ok(()) => tracing::info!("Shutdown requested"),
            Err(e) => tracing::error!(error = %e, "Runtime exiting on fault"),
        }

        phase.send_replace(RuntimePhase::Draining);
        reporters.stop_all();
        tracing::info!(grace_secs = shutdown_grace.as_secs_f64(), "Draining listener");
        server.shutdown(shutdown_grace).await;

        if !reporters.wait_stopped(REPORTER_STOP_WAIT).await {
            tracing::warn!("Reporters still running after shutdown");
        }

        phase.send_replace(RuntimePhase::Stopped);
        tracing::info!("Runtime stopped");
        result
    }
}
