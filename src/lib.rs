//! HTTP service runtime: lifecycle, connection state, and telemetry
//! reporters around a user-supplied router.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::schema::RuntimeConfig;
pub use http::{default_router, HttpServer, RequestLogger, RequestStats};
pub use lifecycle::{Runtime, RuntimeBuilder, RuntimeError, RuntimePhase, Shutdown};
