//! Middleware wrapped around every handler the runtime serves.
//!
//! ```text
//! request → request id (set, propagate) → logging → stats → handler
//! ```

pub mod logging;
pub mod stats;

use axum::middleware::from_fn_with_state;
use axum::Router;

use crate::http::request::with_request_id;
use crate::observability::logging::Logger;
use crate::observability::metrics::SharedSink;

pub use logging::logging_middleware;
pub use stats::{response_counter, stats_middleware, REQUEST_COUNTER, REQUEST_DURATION};

/// Wrap `app` with stats (innermost), then logging, then request ID.
pub fn instrument(app: Router, sink: SharedSink, logger: Logger) -> Router {
    let app = app
        .layer(from_fn_with_state(sink, stats_middleware))
        .layer(from_fn_with_state(logger, logging_middleware));
    with_request_id(app)
}
