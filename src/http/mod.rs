//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (accept loop, connection state hook, graceful drain)
//!     → request.rs (set or propagate X-Request-Id)
//!     → middleware/logging.rs (request-scoped logger)
//!     → middleware/stats.rs (request counter, duration, status class)
//!     → handler (reads RequestLogger / RequestStats via context.rs)
//! ```

pub mod context;
pub mod middleware;
pub mod request;
pub mod router;
pub mod server;

pub use context::{RequestLogger, RequestStats};
pub use middleware::instrument;
pub use request::{request_id, with_request_id, X_REQUEST_ID};
pub use router::{default_router, health_check, RouterConfig, DEFAULT_HEALTH_CHECK};
pub use server::{HttpServer, ServerHandle};
