//! Shared utilities for runtime integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use runhttp::config::RuntimeConfig;
use runhttp::lifecycle::RuntimePhase;
use runhttp::observability::Logger;
use tokio::sync::watch;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Dispatch, Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::{LookupSpan, Registry};

/// Config with quiet outputs, no OS signals and fast reporters.
pub fn test_config() -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.httpserver.address = "127.0.0.1:0".into();
    config.httpserver.shutdown_grace_secs = 1;
    config.logger.output = "NULL".into();
    config.stats.output = "NULL".into();
    config.signals.installed.clear();
    config.connstate.report_interval_ms = 10;
    config.runtimestats.report_interval_ms = 10;
    config
}

/// Wait until the runtime reaches `phase`, panicking after two seconds.
pub async fn wait_for_phase(rx: &mut watch::Receiver<RuntimePhase>, phase: RuntimePhase) {
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|current| *current == phase))
        .await
        .unwrap_or_else(|_| panic!("runtime never reached {phase:?}"))
        .expect("runtime dropped its phase sender");
}

/// One log event seen by [`capture_logger`].
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub message: String,
    pub request_id: Option<String>,
}

#[derive(Clone, Default)]
pub struct Captured {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl Captured {
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn find(&self, message: &str) -> Option<CapturedEvent> {
        self.events().into_iter().find(|event| event.message == message)
    }
}

/// A logger that records every event and the request ID of its span.
pub fn capture_logger() -> (Logger, Captured) {
    let captured = Captured::default();
    let layer = CaptureLayer {
        captured: captured.clone(),
    };
    let dispatch = Dispatch::new(Registry::default().with(layer));
    (Logger::from_dispatch(dispatch), captured)
}

struct CaptureLayer {
    captured: Captured,
}

struct SpanRequestId(String);

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut fields = FieldMap::default();
        attrs.record(&mut fields);
        if let (Some(request_id), Some(span)) = (fields.0.remove("request_id"), ctx.span(id)) {
            span.extensions_mut().insert(SpanRequestId(request_id));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut fields = FieldMap::default();
        event.record(&mut fields);

        let mut request_id = None;
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                let extensions = span.extensions();
                if let Some(found) = extensions.get::<SpanRequestId>() {
                    request_id = Some(found.0.clone());
                }
            }
        }

        self.captured.events.lock().unwrap().push(CapturedEvent {
            message: fields.0.remove("message").unwrap_or_default(),
            request_id,
        });
    }
}

#[derive(Default)]
struct FieldMap(HashMap<String, String>);

impl Visit for FieldMap {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
}
