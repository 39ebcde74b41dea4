//! Request logging middleware.
//! Runs every request inside its own span under the runtime's logger.

use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use tracing::instrument::{Instrument, WithSubscriber};
use uuid::Uuid;

use crate::http::context::RequestLogger;
use crate::http::request::request_id;
use crate::observability::logging::Logger;

pub async fn logging_middleware(
    State(logger): State<Logger>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let request_id = request_id(req.headers())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let span = logger.request_span(&request_id, req.method().as_str(), req.uri().path());

    req.extensions_mut().insert(RequestLogger::new(
        span.clone(),
        request_id,
        logger.dispatch().clone(),
    ));

    let start = Instant::now();
    let response = next
        .run(req)
        .instrument(span.clone())
        .with_subscriber(logger.dispatch().clone())
        .await;

    tracing::dispatcher::with_default(logger.dispatch(), || {
        span.in_scope(|| {
            tracing::debug!(
                status = response.status().as_u16(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Request completed"
            );
        })
    });

    response
}
