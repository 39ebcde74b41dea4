//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{RuntimeConfig, SignalSpec};
use crate::config::validation::{validate_config, ValidationError};

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "RUNTIME_";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error("Invalid value for {key}: {value:?}")]
    Env { key: String, value: String },
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load a TOML file, apply `RUNTIME_*` overrides from the process
/// environment, and validate the result.
pub fn load_config(path: &Path) -> Result<RuntimeConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: RuntimeConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config, std::env::vars())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Build a configuration from defaults plus the process environment.
pub fn config_from_env() -> Result<RuntimeConfig, ConfigError> {
    let mut config = RuntimeConfig::default();
    apply_env_overrides(&mut config, std::env::vars())?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Overlay `RUNTIME_*` variables onto `config`.
///
/// Unknown keys under the prefix are ignored. List values are comma
/// separated; signal entries that parse as integers are taken as numbers.
pub fn apply_env_overrides<I, K, V>(config: &mut RuntimeConfig, vars: I) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    for (key, value) in vars {
        let (key, value) = (key.as_ref(), value.as_ref());
        let Some(name) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };

        match name {
            "HTTPSERVER_ADDRESS" => config.httpserver.address = value.to_string(),
            "HTTPSERVER_MAXCONNECTIONS" => {
                config.httpserver.max_connections = parse_number(key, value)?;
            }
            "HTTPSERVER_SHUTDOWNGRACESECS" => {
                config.httpserver.shutdown_grace_secs = parse_number(key, value)?;
            }
            "CONNSTATE_REPORTINTERVALMS" => {
                config.connstate.report_interval_ms = parse_number(key, value)?;
            }
            "RUNTIMESTATS_REPORTINTERVALMS" => {
                config.runtimestats.report_interval_ms = parse_number(key, value)?;
            }
            "LOGGER_LEVEL" => config.logger.level = value.to_string(),
            "LOGGER_OUTPUT" => config.logger.output = value.to_string(),
            "LOGGER_FORMAT" => config.logger.format = value.to_string(),
            "STATS_OUTPUT" => config.stats.output = value.to_string(),
            "STATS_PROMETHEUS_ADDRESS" => config.stats.prometheus.address = value.to_string(),
            "STATS_PROMETHEUS_TAGS" => config.stats.prometheus.tags = split_list(value),
            "SIGNALS_INSTALLED" => config.signals.installed = split_list(value),
            "SIGNALS_OS_SIGNALS" => {
                config.signals.os.signals = split_list(value)
                    .into_iter()
                    .map(|item| match item.parse::<i32>() {
                        Ok(number) => SignalSpec::Number(number),
                        Err(_) => SignalSpec::Name(item),
                    })
                    .collect();
            }
            _ => {}
        }
    }

    Ok(())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
