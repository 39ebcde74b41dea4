//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Track connection state (New → Active ⇄ Idle → Closed, or → Hijacked)
//! - Count state transitions and report live connections per state
//!
//! # Design Decisions
//! - Each connection serializes its own events, so a connection never emits
//!   anything after its terminal event
//! - The tracker's map is sharded; callers never lock around it
//! - Only metric emission is serialized, behind a narrow lock

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;

use crate::config::schema::ConnStateConfig;
use crate::observability::metrics::SharedSink;
use crate::observability::reporter::Reporter;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state for lifecycle tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Connection accepted, no request read yet.
    New,
    /// At least one request is in flight.
    Active,
    /// Kept alive between requests.
    Idle,
    /// Taken over by a protocol upgrade; no longer managed by the server.
    Hijacked,
    /// Connection is closed.
    Closed,
}

impl ConnectionState {
    /// Hijacked and Closed end a connection's lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Hijacked | ConnectionState::Closed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::New => "new",
            ConnectionState::Active => "active",
            ConnectionState::Idle => "idle",
            ConnectionState::Hijacked => "hijacked",
            ConnectionState::Closed => "closed",
        }
    }
}

/// Receives every connection state transition from the listener.
pub trait ConnStateHook: Send + Sync + 'static {
    fn on_state_change(&self, id: ConnectionId, state: ConnectionState);
}

/// Live connections per non-terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub new: u64,
    pub active: u64,
    pub idle: u64,
}

/// Counts connection transitions and periodically reports how many
/// connections sit in each state.
pub struct ConnectionTracker {
    names: ConnStateConfig,
    sink: SharedSink,
    connections: DashMap<ConnectionId, ConnectionState>,
    stat_lock: Mutex<()>,
}

impl ConnectionTracker {
    pub fn new(names: ConnStateConfig, sink: SharedSink) -> Self {
        Self {
            names,
            sink,
            connections: DashMap::new(),
            stat_lock: Mutex::new(()),
        }
    }

    /// Number of connections currently tracked.
    pub fn tracked(&self) -> usize {
        self.connections.len()
    }

    /// Last non-terminal state seen for `id`.
    pub fn state_of(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.connections.get(&id).map(|entry| *entry.value())
    }

    /// Count tracked connections per state.
    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for entry in self.connections.iter() {
            match entry.value() {
                ConnectionState::New => counts.new += 1,
                ConnectionState::Active => counts.active += 1,
                ConnectionState::Idle => counts.idle += 1,
                ConnectionState::Hijacked | ConnectionState::Closed => {}
            }
        }
        counts
    }

    fn stat_guard(&self) -> MutexGuard<'_, ()> {
        self.stat_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn counter_name(&self, state: ConnectionState) -> &str {
        match state {
            ConnectionState::New => &self.names.new_counter,
            ConnectionState::Active => &self.names.active_counter,
            ConnectionState::Idle => &self.names.idle_counter,
            ConnectionState::Hijacked => &self.names.hijacked_counter,
            ConnectionState::Closed => &self.names.closed_counter,
        }
    }
}

impl ConnStateHook for ConnectionTracker {
    fn on_state_change(&self, id: ConnectionId, state: ConnectionState) {
        {
            let _guard = self.stat_guard();
            self.sink.count(self.counter_name(state), 1);
        }

        if state.is_terminal() {
            self.connections.remove(&id);
        } else {
            self.connections.insert(id, state);
        }
    }
}

impl Reporter for ConnectionTracker {
    fn name(&self) -> &'static str {
        "connstate"
    }

    fn interval(&self) -> Duration {
        self.names.report_interval()
    }

    fn report(&self) {
        let counts = self.counts();
        let _guard = self.stat_guard();
        self.sink.gauge(&self.names.new_gauge, counts.new as f64);
        self.sink.gauge(&self.names.active_gauge, counts.active as f64);
        self.sink.gauge(&self.names.idle_gauge, counts.idle as f64);
    }
}

struct Phase {
    in_flight: usize,
    terminal: bool,
}

struct LifecycleInner {
    id: ConnectionId,
    hook: Option<Arc<dyn ConnStateHook>>,
    phase: Mutex<Phase>,
}

/// Per-connection event source.
///
/// Emits New on creation, Active when the first in-flight request starts,
/// Idle when the last one finishes, and at most one terminal event. Events
/// are delivered under the connection's own lock, so the hook sees them in
/// order.
#[derive(Clone)]
pub struct ConnectionLifecycle {
    inner: Arc<LifecycleInner>,
}

impl ConnectionLifecycle {
    /// Start tracking a freshly accepted connection.
    pub fn open(hook: Option<Arc<dyn ConnStateHook>>) -> Self {
        let lifecycle = Self {
            inner: Arc::new(LifecycleInner {
                id: ConnectionId::new(),
                hook,
                phase: Mutex::new(Phase {
                    in_flight: 0,
                    terminal: false,
                }),
            }),
        };
        lifecycle.transition(|_| Some(ConnectionState::New));
        lifecycle
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Mark a request as in flight until the returned guard drops.
    pub fn request_started(&self) -> RequestGuard {
        self.transition(|phase| {
            phase.in_flight += 1;
            (phase.in_flight == 1).then_some(ConnectionState::Active)
        });
        RequestGuard {
            lifecycle: self.clone(),
        }
    }

    /// The connection was taken over by a protocol upgrade.
    pub fn hijacked(&self) {
        self.transition(|phase| {
            phase.terminal = true;
            Some(ConnectionState::Hijacked)
        });
    }

    /// The connection was closed.
    pub fn closed(&self) {
        self.transition(|phase| {
            phase.terminal = true;
            Some(ConnectionState::Closed)
        });
    }

    fn request_finished(&self) {
        self.transition(|phase| {
            phase.in_flight = phase.in_flight.saturating_sub(1);
            (phase.in_flight == 0).then_some(ConnectionState::Idle)
        });
    }

    /// Apply `change` and emit the state it yields, unless the connection
    /// already ended.
    fn transition(&self, change: impl FnOnce(&mut Phase) -> Option<ConnectionState>) {
        let mut phase = self
            .inner
            .phase
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if phase.terminal {
            return;
        }
        let Some(state) = change(&mut phase) else {
            return;
        };

        tracing::trace!(connection_id = %self.inner.id, state = state.as_str(), "Connection state changed");
        if let Some(hook) = &self.inner.hook {
            hook.on_state_change(self.inner.id, state);
        }
    }
}

/// Keeps a request counted as in flight. Dropping it may move the
/// connection to Idle.
pub struct RequestGuard {
    lifecycle: ConnectionLifecycle,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.lifecycle.request_finished();
    }
}

/// Guard that tracks a connection's lifetime.
/// Emits Closed when dropped, unless the connection was hijacked.
pub struct ConnectionGuard {
    lifecycle: ConnectionLifecycle,
}

impl ConnectionGuard {
    pub fn new(lifecycle: ConnectionLifecycle) -> Self {
        Self { lifecycle }
    }

    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.lifecycle.id()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.lifecycle.closed();
    }
}
