//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → Build logger, sink, reporters, signals → Runtime
//!
//! Run (runtime.rs):
//!     Install signals → Start reporters → Spawn listener → Wait for exit event
//!
//! Teardown (runtime.rs):
//!     Stop reporters → Drain listener (grace deadline) → Stopped
//!
//! Signals (signals.rs):
//!     OS signals, manual triggers, listener faults → first exit event wins
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then telemetry, then listener
//! - Shutdown has timeout: open connections are cut after the grace deadline
//! - Every signal source is uninstalled once the first event arrives

pub mod runtime;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use runtime::{Runtime, RuntimeError, RuntimePhase};
pub use shutdown::{Shutdown, ShutdownListener};
pub use signals::{
    manual_signal, parse_signal, ExitResult, FutureSignal, ManualSignal, ManualTrigger, MultiSignal, OsSignal,
    SignalSource,
};
pub use startup::RuntimeBuilder;
