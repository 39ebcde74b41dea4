//! HTTP server setup and connection serving.
//!
//! # Responsibilities
//! - Bind the listener (or adopt a pre-bound one) inside the server task
//! - Serve HTTP/1.1 and HTTP/2 connections, including protocol upgrades
//! - Report every connection's state transitions to the bound hook
//! - Drain in-flight requests on shutdown, bounded by a deadline
//!
//! # Design Decisions
//! - Bind failures are reported through the runtime's exit path, not returned
//! - One task per connection, owned by a `JoinSet` so stragglers can be
//!   aborted once the grace period ends
//! - A `101 Switching Protocols` response hands the connection to the handler
//!   and ends its tracked lifecycle

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use hyper::body::{Body as HttpBody, Frame, Incoming, SizeHint};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tower::ServiceExt;
use tracing::instrument::WithSubscriber;

use crate::config::schema::{HttpServerConfig, MAX_SHUTDOWN_GRACE_SECS};
use crate::lifecycle::runtime::RuntimeError;
use crate::lifecycle::shutdown::{Shutdown, ShutdownListener};
use crate::lifecycle::signals::ManualTrigger;
use crate::net::connection::{ConnStateHook, ConnectionGuard, ConnectionLifecycle, RequestGuard};
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Longest drain a shutdown will wait for.
const MAX_GRACE: Duration = Duration::from_secs(MAX_SHUTDOWN_GRACE_SECS);

enum Target {
    Address {
        address: String,
        max_connections: usize,
    },
    Bound(Listener),
}

/// HTTP server for one handler on one listener.
pub struct HttpServer {
    target: Target,
    conn_state: Option<Arc<dyn ConnStateHook>>,
}

impl HttpServer {
    /// A server that binds `config.address` when spawned.
    pub fn new(config: &HttpServerConfig) -> Self {
        Self {
            target: Target::Address {
                address: config.address.clone(),
                max_connections: config.max_connections,
            },
            conn_state: None,
        }
    }

    /// A server on an already bound listener.
    pub fn from_listener(listener: Listener) -> Self {
        Self {
            target: Target::Bound(listener),
            conn_state: None,
        }
    }

    /// Report connection state transitions to `hook`.
    pub fn set_conn_state(&mut self, hook: Arc<dyn ConnStateHook>) {
        self.conn_state = Some(hook);
    }

    /// Address of a pre-bound listener. `None` until bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.target {
            Target::Bound(listener) => listener.local_addr().ok(),
            Target::Address { .. } => None,
        }
    }

    /// Start serving `app` on a new task.
    ///
    /// A bind failure is delivered through `on_error`. Must be called from
    /// within a tokio runtime.
    pub fn spawn(self, app: Router, on_error: ManualTrigger) -> ServerHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(
            serve(self.target, self.conn_state, app, on_error, stop_rx).with_current_subscriber(),
        );
        ServerHandle {
            stop: stop_tx,
            task,
        }
    }
}

/// Control handle for a spawned server.
pub struct ServerHandle {
    stop: oneshot::Sender<Instant>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting, let connections finish in-flight requests for up to
    /// `grace` (capped at one hour), then abort whatever remains. Returns
    /// once the server task has exited.
    pub async fn shutdown(self, grace: Duration) {
        let deadline = Instant::now()
            .checked_add(grace.min(MAX_GRACE))
            .unwrap_or_else(Instant::now);
        let _ = self.stop.send(deadline);
        if let Err(e) = self.task.await {
            log_join_error("Server task", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

async fn serve(
    target: Target,
    hook: Option<Arc<dyn ConnStateHook>>,
    app: Router,
    on_error: ManualTrigger,
    mut stop: oneshot::Receiver<Instant>,
) {
    let listener = match target {
        Target::Bound(listener) => listener,
        Target::Address {
            address,
            max_connections,
        } => match Listener::bind(&address, max_connections).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(address = %address, error = %e, "HTTP server failed to start");
                on_error.fail(RuntimeError::Listener(e));
                return;
            }
        },
    };

    match listener.local_addr() {
        Ok(address) => tracing::info!(address = %address, "HTTP server starting"),
        Err(e) => tracing::warn!(error = %e, "HTTP server starting on unknown address"),
    }

    let drain = Shutdown::new();
    let mut connections = JoinSet::new();

    let deadline = loop {
        tokio::select! {
            biased;
            deadline = &mut stop => break deadline.unwrap_or_else(|_| Instant::now()),
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    log_join_error("Connection task", e);
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer, permit)) => {
                    let task = serve_connection(
                        stream,
                        peer,
                        app.clone(),
                        hook.clone(),
                        drain.subscribe(),
                        permit,
                    );
                    connections.spawn(task.with_current_subscriber());
                }
                Err(ListenerError::Closed) => {
                    on_error.fail(RuntimeError::Listener(ListenerError::Closed));
                    break Instant::now();
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    };

    drop(listener);
    tracing::info!(connections = connections.len(), "Draining connections");
    drain.trigger();

    let drained = tokio::time::timeout_at(deadline, async {
        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                log_join_error("Connection task", e);
            }
        }
    })
    .await;

    if drained.is_err() {
        tracing::warn!(
            remaining = connections.len(),
            "Grace period elapsed, aborting remaining connections"
        );
        connections.shutdown().await;
    }

    tracing::info!("HTTP server stopped");
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    app: Router,
    hook: Option<Arc<dyn ConnStateHook>>,
    mut drain: ShutdownListener,
    _permit: ConnectionPermit,
) {
    let lifecycle = ConnectionLifecycle::open(hook);
    let _guard = ConnectionGuard::new(lifecycle.clone());
    let id = lifecycle.id();

    let service = {
        let lifecycle = lifecycle.clone();
        hyper::service::service_fn(move |mut req: Request<Incoming>| {
            let lifecycle = lifecycle.clone();
            let app = app.clone();
            async move {
                let in_flight = lifecycle.request_started();
                req.extensions_mut().insert(ConnectInfo(peer));

                let response = app.oneshot(req).await?;
                if response.status() == StatusCode::SWITCHING_PROTOCOLS {
                    lifecycle.hijacked();
                }
                Ok::<_, Infallible>(response.map(|body| TrackedBody::new(body, in_flight)))
            }
        })
    };

    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(connection_id = %id, peer_addr = %peer, error = %e, "Connection error");
                }
                break;
            }
            _ = drain.recv(), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }

    tracing::trace!(connection_id = %id, "Connection finished");
}

/// Response body that keeps its request counted as in flight until the
/// body is fully sent or dropped.
struct TrackedBody {
    inner: Body,
    _in_flight: RequestGuard,
}

impl TrackedBody {
    fn new(inner: Body, in_flight: RequestGuard) -> Self {
        Self {
            inner,
            _in_flight: in_flight,
        }
    }
}

impl HttpBody for TrackedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.get_mut().inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

fn log_join_error(task: &str, e: JoinError) {
    if e.is_panic() {
        tracing::warn!(task, "Task panicked");
    }
}
