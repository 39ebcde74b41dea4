//! Request stats middleware.
//! Counts requests and responses by status class and records latency.

use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::http::context::RequestStats;
use crate::observability::metrics::SharedSink;

/// Counter incremented once per request.
pub const REQUEST_COUNTER: &str = "http.server.request";
/// Histogram of request handling time in milliseconds.
pub const REQUEST_DURATION: &str = "http.server.request.duration";

/// Counter incremented once per response, by status class.
pub fn response_counter(status: StatusCode) -> &'static str {
    match status.as_u16() / 100 {
        1 => "http.server.response.1xx",
        2 => "http.server.response.2xx",
        3 => "http.server.response.3xx",
        4 => "http.server.response.4xx",
        _ => "http.server.response.5xx",
    }
}

pub async fn stats_middleware(
    State(sink): State<SharedSink>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    req.extensions_mut().insert(RequestStats::new(sink.clone()));
    sink.count(REQUEST_COUNTER, 1);

    let response = next.run(req).await;

    sink.count(response_counter(response.status()), 1);
    sink.histogram(REQUEST_DURATION, start.elapsed().as_secs_f64() * 1000.0);
    response
}
