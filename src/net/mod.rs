//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (lifecycle tracking, state machine)
//!     → Hand off to HTTP layer
//!
//! Connection States:
//!     New → Active ⇄ Idle → Closed
//!               └──────────→ Hijacked
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection reports its transitions to one tracker

pub mod connection;
pub mod listener;

pub use connection::{
    ConnStateHook, ConnectionGuard, ConnectionId, ConnectionLifecycle, ConnectionState,
    ConnectionTracker, RequestGuard, StateCounts,
};
pub use listener::{ConnectionPermit, Listener, ListenerError};
