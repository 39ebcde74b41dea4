//! Default router with a liveness endpoint.

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

/// Path answered by [`health_check`] unless configured otherwise.
pub const DEFAULT_HEALTH_CHECK: &str = "/healthcheck";

/// Settings for [`default_router`].
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Route answering liveness checks with a 200.
    pub health_check: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            health_check: DEFAULT_HEALTH_CHECK.to_string(),
        }
    }
}

/// A router with only the health check bound, ready for more routes.
///
/// An empty `health_check` path falls back to the default.
pub fn default_router(config: &RouterConfig) -> Router {
    let path = if config.health_check.is_empty() {
        DEFAULT_HEALTH_CHECK
    } else {
        config.health_check.as_str()
    };
    Router::new().route(path, get(health_check))
}

/// Always answers 200 with `Success`.
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "Success")
}
