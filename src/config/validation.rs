//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, connection limits > 0)
//! - Reject unknown output and signal-source selections
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RuntimeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use tokio::sync::Semaphore;

use crate::config::schema::{RuntimeConfig, MAX_REPORT_INTERVAL_MS, MAX_SHUTDOWN_GRACE_SECS};

const LOG_LEVELS: &[&str] = &["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
const LOG_OUTPUTS: &[&str] = &["STDOUT", "STDERR", "NULL"];
const LOG_FORMATS: &[&str] = &["TEXT", "JSON"];
const STATS_OUTPUTS: &[&str] = &["PROMETHEUS", "NULL"];
const SIGNAL_SOURCES: &[&str] = &["OS"];

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required string field is empty.
    Empty { field: &'static str },
    /// A numeric field that must be positive is zero.
    Zero { field: &'static str },
    /// A numeric field exceeds its upper bound.
    TooLarge { field: &'static str, max: u64 },
    /// A selector field holds a value outside its allowed set.
    UnknownChoice {
        field: &'static str,
        value: String,
        allowed: &'static [&'static str],
    },
    /// A Prometheus tag is not in `key:value` form.
    MalformedTag(String),
    /// A signal specification is not a known name or a positive number.
    InvalidSignal(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Empty { field } => write!(f, "{} must not be empty", field),
            ValidationError::Zero { field } => write!(f, "{} must be greater than zero", field),
            ValidationError::TooLarge { field, max } => write!(f, "{} must be at most {}", field, max),
            ValidationError::UnknownChoice { field, value, allowed } => write!(
                f,
                "{} has unknown value {:?} (expected one of {})",
                field,
                value,
                allowed.join(", ")
            ),
            ValidationError::MalformedTag(tag) => {
                write!(f, "stats tag {:?} must be formatted as key:value", tag)
            }
            ValidationError::InvalidSignal(sig) => write!(f, "unknown signal {:?}", sig),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Check a configuration for semantic errors, collecting every one found.
pub fn validate_config(config: &RuntimeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.httpserver.address.trim().is_empty() {
        errors.push(ValidationError::Empty { field: "httpserver.address" });
    }
    if config.httpserver.max_connections == 0 {
        errors.push(ValidationError::Zero { field: "httpserver.max_connections" });
    }
    if config.httpserver.max_connections > Semaphore::MAX_PERMITS {
        errors.push(ValidationError::TooLarge {
            field: "httpserver.max_connections",
            max: Semaphore::MAX_PERMITS as u64,
        });
    }
    check_at_most(
        &mut errors,
        "httpserver.shutdown_grace_secs",
        config.httpserver.shutdown_grace_secs,
        MAX_SHUTDOWN_GRACE_SECS,
    );
    check_interval(&mut errors, "connstate.report_interval_ms", config.connstate.report_interval_ms);
    check_interval(&mut errors, "runtimestats.report_interval_ms", config.runtimestats.report_interval_ms);

    check_choice(&mut errors, "logger.level", &config.logger.level, LOG_LEVELS);
    check_choice(&mut errors, "logger.output", &config.logger.output, LOG_OUTPUTS);
    check_choice(&mut errors, "logger.format", &config.logger.format, LOG_FORMATS);
    check_choice(&mut errors, "stats.output", &config.stats.output, STATS_OUTPUTS);

    if config.stats.output.eq_ignore_ascii_case("PROMETHEUS") {
        if config.stats.prometheus.address.trim().is_empty() {
            errors.push(ValidationError::Empty { field: "stats.prometheus.address" });
        }
        for tag in &config.stats.prometheus.tags {
            if split_tag(tag).is_none() {
                errors.push(ValidationError::MalformedTag(tag.clone()));
            }
        }
    }

    for source in &config.signals.installed {
        check_choice(&mut errors, "signals.installed", source, SIGNAL_SOURCES);
    }
    for spec in &config.signals.os.signals {
        if crate::lifecycle::signals::parse_signal(spec).is_err() {
            errors.push(ValidationError::InvalidSignal(spec.to_string()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Split a `key:value` tag. Both halves must be non-empty.
pub fn split_tag(tag: &str) -> Option<(&str, &str)> {
    let (key, value) = tag.split_once(':')?;
    let (key, value) = (key.trim(), value.trim());
    if key.is_empty() || value.is_empty() {
        return None;
    }
    Some((key, value))
}

fn check_interval(errors: &mut Vec<ValidationError>, field: &'static str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::Zero { field });
    }
    check_at_most(errors, field, value, MAX_REPORT_INTERVAL_MS);
}

fn check_at_most(errors: &mut Vec<ValidationError>, field: &'static str, value: u64, max: u64) {
    if value > max {
        errors.push(ValidationError::TooLarge { field, max });
    }
}

fn check_choice(
    errors: &mut Vec<ValidationError>,
    field: &'static str,
    value: &str,
    allowed: &'static [&'static str],
) {
    if !allowed.iter().any(|choice| choice.eq_ignore_ascii_case(value)) {
        errors.push(ValidationError::UnknownChoice {
            field,
            value: value.to_string(),
            allowed,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::SignalSpec;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&RuntimeConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = RuntimeConfig::default();
        config.httpserver.max_connections = 0;
        config.connstate.report_interval_ms = 0;
        config.logger.output = "FILE".into();
        config.stats.prometheus.tags = vec!["env".into()];
        config.signals.installed = vec!["CONSUL".into()];
        config.signals.os.signals = vec![SignalSpec::Name("SIGBOGUS".into())];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 6);
        assert!(errors.contains(&ValidationError::Zero { field: "httpserver.max_connections" }));
        assert!(errors.contains(&ValidationError::MalformedTag("env".into())));
        assert!(errors.contains(&ValidationError::InvalidSignal("SIGBOGUS".into())));
    }

    #[test]
    fn rejects_connection_limit_beyond_semaphore_capacity() {
        let mut config = RuntimeConfig::default();
        config.httpserver.max_connections = usize::MAX;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::TooLarge {
                field: "httpserver.max_connections",
                max: Semaphore::MAX_PERMITS as u64,
            }]
        );

        config.httpserver.max_connections = Semaphore::MAX_PERMITS;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn rejects_unbounded_durations() {
        let mut config = RuntimeConfig::default();
        config.httpserver.shutdown_grace_secs = u64::MAX;
        config.connstate.report_interval_ms = u64::MAX;
        config.runtimestats.report_interval_ms = MAX_REPORT_INTERVAL_MS + 1;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ValidationError::TooLarge {
            field: "httpserver.shutdown_grace_secs",
            max: MAX_SHUTDOWN_GRACE_SECS,
        }));
        assert!(errors.contains(&ValidationError::TooLarge {
            field: "runtimestats.report_interval_ms",
            max: MAX_REPORT_INTERVAL_MS,
        }));

        config.httpserver.shutdown_grace_secs = MAX_SHUTDOWN_GRACE_SECS;
        config.connstate.report_interval_ms = MAX_REPORT_INTERVAL_MS;
        config.runtimestats.report_interval_ms = MAX_REPORT_INTERVAL_MS;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn choices_are_case_insensitive() {
        let mut config = RuntimeConfig::default();
        config.logger.level = "debug".into();
        config.stats.output = "null".into();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn tags_ignored_when_prometheus_disabled() {
        let mut config = RuntimeConfig::default();
        config.stats.output = "NULL".into();
        config.stats.prometheus.tags = vec!["broken".into()];
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn split_tag_requires_both_halves() {
        assert_eq!(split_tag("env:prod"), Some(("env", "prod")));
        assert_eq!(split_tag("env:"), None);
        assert_eq!(split_tag(":prod"), None);
        assert_eq!(split_tag("env"), None);
    }
}
