//! Structured logging.
//!
//! # Responsibilities
//! - Build the logging client selected by configuration
//! - Hand out per-request spans bound to that client
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, text format for development
//! - `RUST_LOG` wins over the configured level when set
//! - The client is a `Dispatch` value rather than a process global, so an
//!   embedding program can run the runtime under its own subscriber

use tracing::{Dispatch, Span};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer, Registry};

use thiserror::Error;

use crate::config::schema::LoggerConfig;

/// Error building the logging client.
#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("unknown logger output {0:?}")]
    UnknownOutput(String),

    #[error("unknown logger format {0:?}")]
    UnknownFormat(String),

    #[error("invalid log level {level:?}: {reason}")]
    Level { level: String, reason: String },
}

/// Logging client used by the runtime and every request it serves.
#[derive(Debug, Clone)]
pub struct Logger {
    dispatch: Dispatch,
}

impl Logger {
    /// Build a logger from configuration.
    pub fn from_config(config: &LoggerConfig) -> Result<Self, LoggerError> {
        let output = config.output.to_ascii_uppercase();
        if output == "NULL" {
            return Ok(Self::null());
        }

        let json = match config.format.to_ascii_uppercase().as_str() {
            "TEXT" => false,
            "JSON" => true,
            other => return Err(LoggerError::UnknownFormat(other.to_string())),
        };

        let layer = match output.as_str() {
            "STDOUT" => fmt_layer(std::io::stdout, json),
            "STDERR" => fmt_layer(std::io::stderr, json),
            other => return Err(LoggerError::UnknownOutput(other.to_string())),
        };

        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(config.level.to_ascii_lowercase()).map_err(|e| {
                LoggerError::Level {
                    level: config.level.clone(),
                    reason: e.to_string(),
                }
            })?,
        };

        let subscriber = Registry::default().with(layer).with(filter);
        Ok(Self {
            dispatch: Dispatch::new(subscriber),
        })
    }

    /// Wrap an existing dispatcher, e.g. one carrying a test layer.
    pub fn from_dispatch(dispatch: Dispatch) -> Self {
        Self { dispatch }
    }

    /// A logger that drops everything.
    pub fn null() -> Self {
        Self {
            dispatch: Dispatch::none(),
        }
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Create the span that scopes one request's log events.
    pub fn request_span(&self, request_id: &str, method: &str, path: &str) -> Span {
        tracing::dispatcher::with_default(&self.dispatch, || {
            tracing::info_span!("request", request_id = %request_id, method = %method, path = %path)
        })
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::null()
    }
}

fn fmt_layer<W>(writer: W, json: bool) -> Box<dyn Layer<Registry> + Send + Sync>
where
    W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer().with_writer(writer);
    if json {
        layer.json().with_current_span(true).boxed()
    } else {
        layer.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(output: &str, format: &str, level: &str) -> LoggerConfig {
        LoggerConfig {
            level: level.into(),
            output: output.into(),
            format: format.into(),
        }
    }

    #[test]
    fn null_output_builds_disabled_logger() {
        let logger = Logger::from_config(&config("NULL", "TEXT", "INFO")).unwrap();
        let span = logger.request_span("abc", "GET", "/");
        assert!(span.is_disabled());
    }

    #[test]
    fn stdout_json_builds() {
        let logger = Logger::from_config(&config("stdout", "json", "debug")).unwrap();
        let span = logger.request_span("abc", "GET", "/");
        assert!(!span.is_disabled());
    }

    #[test]
    fn rejects_unknown_output_and_format() {
        assert!(matches!(
            Logger::from_config(&config("FILE", "TEXT", "INFO")),
            Err(LoggerError::UnknownOutput(_))
        ));
        assert!(matches!(
            Logger::from_config(&config("STDOUT", "XML", "INFO")),
            Err(LoggerError::UnknownFormat(_))
        ));
    }
}
