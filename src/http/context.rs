//! Per-request context handed to handlers.
//!
//! The middleware stack places a [`RequestStats`] and a [`RequestLogger`] in
//! every request's extensions. Both are also axum extractors that never
//! reject: outside the runtime's middleware they fall back to a discarding
//! sink and a disabled span.

use std::convert::Infallible;
use std::ops::Deref;
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::Extensions;
use tracing::{Dispatch, Span};

use crate::observability::metrics::{MetricsSink, NullSink, SharedSink};

/// Metrics client for use inside a handler.
#[derive(Clone)]
pub struct RequestStats {
    sink: SharedSink,
}

impl RequestStats {
    pub fn new(sink: SharedSink) -> Self {
        Self { sink }
    }

    /// The stats placed by the middleware, or a discarding one.
    pub fn from_extensions(extensions: &Extensions) -> Self {
        extensions
            .get::<RequestStats>()
            .cloned()
            .unwrap_or_else(|| Self::new(Arc::new(NullSink)))
    }

    pub fn sink(&self) -> &SharedSink {
        &self.sink
    }
}

impl Deref for RequestStats {
    type Target = dyn MetricsSink;

    fn deref(&self) -> &Self::Target {
        self.sink.as_ref()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequestStats {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_extensions(&parts.extensions))
    }
}

/// Logger scoped to one request.
///
/// The handler future already runs inside this span under the runtime's
/// logger; `in_scope` is for work moved off that future, such as spawned
/// tasks.
#[derive(Debug, Clone)]
pub struct RequestLogger {
    span: Span,
    request_id: String,
    dispatch: Dispatch,
}

impl RequestLogger {
    pub fn new(span: Span, request_id: String, dispatch: Dispatch) -> Self {
        Self {
            span,
            request_id,
            dispatch,
        }
    }

    /// A logger that records nothing.
    pub fn disabled() -> Self {
        Self {
            span: Span::none(),
            request_id: String::new(),
            dispatch: Dispatch::none(),
        }
    }

    pub fn from_extensions(extensions: &Extensions) -> Self {
        extensions
            .get::<RequestLogger>()
            .cloned()
            .unwrap_or_else(Self::disabled)
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Run `f` with this request's logger and span active.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, || self.span.in_scope(f))
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequestLogger {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_extensions(&parts.extensions))
    }
}
