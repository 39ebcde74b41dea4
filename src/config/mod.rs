//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → RUNTIME_* environment overrides
//!     → validation.rs (semantic checks)
//!     → RuntimeConfig (validated, immutable)
//!     → handed to RuntimeBuilder
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{apply_env_overrides, config_from_env, load_config, ConfigError};
pub use schema::{
    ConnStateConfig, HttpServerConfig, LoggerConfig, OsSignalConfig, PrometheusConfig,
    RuntimeConfig, RuntimeStatsConfig, SignalConfig, SignalSpec, StatsConfig,
};
pub use validation::{validate_config, ValidationError};
