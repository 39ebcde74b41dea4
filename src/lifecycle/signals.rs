//! Shutdown signal sources.
//!
//! # Responsibilities
//! - Register process signal handlers (SIGTERM, SIGINT by default)
//! - Adapt manual triggers and arbitrary futures into exit events
//! - Fan several sources into one exit event, first one wins
//!
//! # Design Decisions
//! - Installation is synchronous and happens once, when the runtime starts;
//!   a source is consumed by installing it
//! - Uses Tokio's signal handling (async-safe); signal streams live inside
//!   the returned future and are dropped with it
//! - Late events from slower sources land in a buffered channel and never
//!   block their sender

use std::future::{self, Future};

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::instrument::WithSubscriber;

use crate::config::schema::SignalSpec;
use crate::lifecycle::runtime::RuntimeError;

/// Value carried by an exit event: `Ok` for a deliberate stop, `Err` for a
/// fault.
pub type ExitResult = Result<(), RuntimeError>;

/// A one-shot source of the runtime's exit event.
pub trait SignalSource: Send + 'static {
    /// Register whatever the source listens to and return a future that
    /// resolves with its single exit event.
    fn install(self: Box<Self>) -> Result<BoxFuture<'static, ExitResult>, RuntimeError>;
}

/// Fan-in of several sources. The first event from any of them is the
/// combined event.
#[derive(Default)]
pub struct MultiSignal {
    sources: Vec<Box<dyn SignalSource>>,
}

impl MultiSignal {
    pub fn new(sources: Vec<Box<dyn SignalSource>>) -> Self {
        Self { sources }
    }

    pub fn push(&mut self, source: impl SignalSource) {
        self.sources.push(Box::new(source));
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl SignalSource for MultiSignal {
    /// Installs every child, then forwards each child's event into a channel
    /// with one slot per child. With no children the combined event never
    /// fires.
    fn install(self: Box<Self>) -> Result<BoxFuture<'static, ExitResult>, RuntimeError> {
        let mut installed = Vec::with_capacity(self.sources.len());
        for source in self.sources {
            installed.push(source.install()?);
        }

        if installed.is_empty() {
            return Ok(Box::pin(future::pending::<ExitResult>()));
        }

        let (tx, mut rx) = mpsc::channel(installed.len());
        let mut tasks = JoinSet::new();
        for (index, event) in installed.into_iter().enumerate() {
            let tx = tx.clone();
            let forward = async move {
                let result = event.await;
                if tx.try_send(result).is_err() {
                    tracing::debug!(source = index, "Exit event arrived after shutdown began");
                }
            };
            tasks.spawn(forward.with_current_subscriber());
        }
        drop(tx);

        Ok(Box::pin(async move {
            let first = rx.recv().await;
            tasks.abort_all();
            first.unwrap_or_else(|| {
                Err(RuntimeError::Fault(
                    "every shutdown signal source ended without an event".to_string(),
                ))
            })
        }))
    }
}

/// Create a source fired by hand through the returned trigger.
pub fn manual_signal() -> (ManualTrigger, ManualSignal) {
    let (tx, rx) = oneshot::channel();
    (ManualTrigger { tx }, ManualSignal { rx, on_drop: None })
}

/// Firing half of [`manual_signal`].
#[derive(Debug)]
pub struct ManualTrigger {
    tx: oneshot::Sender<ExitResult>,
}

impl ManualTrigger {
    /// Deliver `result` as the exit event. Returns `false` if nobody is
    /// listening anymore. Never blocks.
    pub fn fire(self, result: ExitResult) -> bool {
        self.tx.send(result).is_ok()
    }

    /// Request a clean shutdown.
    pub fn stop(self) -> bool {
        self.fire(Ok(()))
    }

    /// Report a fault.
    pub fn fail(self, error: RuntimeError) -> bool {
        self.fire(Err(error))
    }
}

/// Source half of [`manual_signal`]. Stays pending forever if its trigger is
/// dropped without firing, unless built with [`ManualSignal::fail_on_drop`].
#[derive(Debug)]
pub struct ManualSignal {
    rx: oneshot::Receiver<ExitResult>,
    on_drop: Option<fn() -> RuntimeError>,
}

impl ManualSignal {
    /// Resolve to `Err(error())` when the trigger is dropped without firing,
    /// for triggers held by a task that may die.
    pub fn fail_on_drop(mut self, error: fn() -> RuntimeError) -> Self {
        self.on_drop = Some(error);
        self
    }
}

impl SignalSource for ManualSignal {
    fn install(self: Box<Self>) -> Result<BoxFuture<'static, ExitResult>, RuntimeError> {
        let ManualSignal { rx, on_drop } = *self;
        Ok(Box::pin(async move {
            match (rx.await, on_drop) {
                (Ok(result), _) => result,
                (Err(_), Some(error)) => Err(error()),
                (Err(_), None) => future::pending().await,
            }
        }))
    }
}

/// Adapts any future into a source.
pub struct FutureSignal<F> {
    event: F,
}

impl<F> FutureSignal<F>
where
    F: Future<Output = ExitResult> + Send + 'static,
{
    pub fn new(event: F) -> Self {
        Self { event }
    }
}

impl<F> SignalSource for FutureSignal<F>
where
    F: Future<Output = ExitResult> + Send + 'static,
{
    fn install(self: Box<Self>) -> Result<BoxFuture<'static, ExitResult>, RuntimeError> {
        Ok(Box::pin(self.event))
    }
}

/// Listens for process signals and fires `Ok(())` on the first delivery.
#[derive(Debug, Clone)]
pub struct OsSignal {
    signals: Vec<i32>,
}

impl OsSignal {
    pub fn new(signals: Vec<i32>) -> Self {
        Self { signals }
    }

    /// Resolve names or numbers into signal numbers.
    pub fn from_specs(specs: &[SignalSpec]) -> Result<Self, RuntimeError> {
        let signals = specs.iter().map(parse_signal).collect::<Result<_, _>>()?;
        Ok(Self { signals })
    }

    pub fn signals(&self) -> &[i32] {
        &self.signals
    }
}

impl Default for OsSignal {
    /// SIGTERM and SIGINT.
    fn default() -> Self {
        let signals = ["TERM", "INT"]
            .iter()
            .filter_map(|name| signal_number(name))
            .collect();
        Self { signals }
    }
}

#[cfg(unix)]
impl SignalSource for OsSignal {
    fn install(self: Box<Self>) -> Result<BoxFuture<'static, ExitResult>, RuntimeError> {
        use tokio::signal::unix::{signal, SignalKind};

        if self.signals.is_empty() {
            return Ok(Box::pin(future::pending::<ExitResult>()));
        }

        let mut streams = Vec::with_capacity(self.signals.len());
        for &number in &self.signals {
            let stream = signal(SignalKind::from_raw(number))
                .map_err(|source| RuntimeError::Signal { signal: number, source })?;
            streams.push((number, stream));
        }
        tracing::debug!(signals = ?self.signals, "Signal handlers installed");

        Ok(Box::pin(async move {
            let waits = streams.iter_mut().map(|(number, stream)| {
                let number = *number;
                Box::pin(async move {
                    stream.recv().await;
                    number
                })
            });
            let (number, _, _) = futures_util::future::select_all(waits).await;
            tracing::info!(signal = number, "Received shutdown signal");
            Ok(())
        }))
    }
}

#[cfg(not(unix))]
impl SignalSource for OsSignal {
    fn install(self: Box<Self>) -> Result<BoxFuture<'static, ExitResult>, RuntimeError> {
        if self.signals.is_empty() {
            return Ok(Box::pin(future::pending::<ExitResult>()));
        }
        Ok(Box::pin(async move {
            tokio::signal::ctrl_c()
                .await
                .map_err(|source| RuntimeError::Signal { signal: 2, source })?;
            tracing::info!("Received Ctrl+C");
            Ok(())
        }))
    }
}

/// Resolve a signal given by name (`SIGINT`, `int`, `interrupt`) or number.
pub fn parse_signal(spec: &SignalSpec) -> Result<i32, RuntimeError> {
    let unknown = || RuntimeError::UnknownSignal(spec.to_string());
    match spec {
        SignalSpec::Number(number) if *number > 0 => Ok(*number),
        SignalSpec::Number(_) => Err(unknown()),
        SignalSpec::Name(name) => {
            let name = name.trim();
            if let Ok(number) = name.parse::<i32>() {
                return if number > 0 { Ok(number) } else { Err(unknown()) };
            }
            let upper = name.to_ascii_uppercase();
            let short = upper.strip_prefix("SIG").unwrap_or(&upper);
            signal_number(short).ok_or_else(unknown)
        }
    }
}

#[cfg(unix)]
fn signal_number(name: &str) -> Option<i32> {
    use tokio::signal::unix::SignalKind;

    let kind = match name {
        "INT" | "INTERRUPT" => SignalKind::interrupt(),
        "TERM" | "TERMINATE" => SignalKind::terminate(),
        "HUP" | "HANGUP" => SignalKind::hangup(),
        "QUIT" => SignalKind::quit(),
        "USR1" | "USER_DEFINED1" => SignalKind::user_defined1(),
        "USR2" | "USER_DEFINED2" => SignalKind::user_defined2(),
        "ALRM" | "ALARM" => SignalKind::alarm(),
        "CHLD" | "CHILD" => SignalKind::child(),
        "PIPE" => SignalKind::pipe(),
        "WINCH" | "WINDOW_CHANGE" => SignalKind::window_change(),
        _ => return None,
    };
    Some(kind.as_raw_value())
}

#[cfg(not(unix))]
fn signal_number(name: &str) -> Option<i32> {
    match name {
        "INT" | "INTERRUPT" => Some(2),
        "TERM" | "TERMINATE" => Some(15),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn resolves_within(
        event: BoxFuture<'static, ExitResult>,
        limit: Duration,
    ) -> Option<ExitResult> {
        tokio::time::timeout(limit, event).await.ok()
    }

    #[tokio::test]
    async fn first_event_wins_and_late_events_do_not_block() {
        let (first, first_source) = manual_signal();
        let (second, second_source) = manual_signal();
        let (third, third_source) = manual_signal();

        let mut multi = MultiSignal::default();
        multi.push(first_source);
        multi.push(second_source);
        multi.push(third_source);
        let event = Box::new(multi).install().unwrap();

        second.fail(RuntimeError::Fault("E".into()));
        let result = resolves_within(event, Duration::from_secs(1))
            .await
            .expect("combined event should fire");
        assert!(matches!(result, Err(RuntimeError::Fault(ref msg)) if msg == "E"));

        // Nobody listens anymore; firing returns immediately either way.
        first.stop();
        third.stop();
    }

    #[tokio::test]
    async fn event_fired_before_install_is_kept() {
        let (trigger, source) = manual_signal();
        assert!(trigger.stop());

        let multi = MultiSignal::new(vec![Box::new(source)]);
        let event = Box::new(multi).install().unwrap();
        assert!(matches!(
            resolves_within(event, Duration::from_secs(1)).await,
            Some(Ok(()))
        ));
    }

    #[tokio::test]
    async fn empty_fan_in_never_fires() {
        let event = Box::new(MultiSignal::default()).install().unwrap();
        assert!(resolves_within(event, Duration::from_millis(50)).await.is_none());
    }

    #[tokio::test]
    async fn dropped_trigger_leaves_source_pending() {
        let (trigger, source) = manual_signal();
        drop(trigger);
        let event = Box::new(source).install().unwrap();
        assert!(resolves_within(event, Duration::from_millis(50)).await.is_none());
    }

    #[tokio::test]
    async fn dropped_trigger_fails_when_asked_to() {
        let (trigger, source) = manual_signal();
        let source = source.fail_on_drop(|| RuntimeError::Fault("trigger lost".into()));
        let event = Box::new(source).install().unwrap();

        drop(trigger);
        let result = resolves_within(event, Duration::from_secs(1))
            .await
            .expect("dropped trigger should resolve the source");
        assert!(matches!(result, Err(RuntimeError::Fault(ref msg)) if msg == "trigger lost"));
    }

    #[tokio::test]
    async fn fired_trigger_wins_over_drop_handling() {
        let (trigger, source) = manual_signal();
        let source = source.fail_on_drop(|| RuntimeError::Fault("trigger lost".into()));
        let event = Box::new(source).install().unwrap();

        trigger.stop();
        let result = resolves_within(event, Duration::from_secs(1)).await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn future_source_forwards_its_output() {
        let source = FutureSignal::new(async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Err(RuntimeError::Fault("late".into()))
        });
        let pending = FutureSignal::new(future::pending::<ExitResult>());
        let multi = MultiSignal::new(vec![Box::new(pending), Box::new(source)]);

        let event = Box::new(multi).install().unwrap();
        assert!(matches!(
            resolves_within(event, Duration::from_secs(1)).await,
            Some(Err(RuntimeError::Fault(_)))
        ));
    }

    #[test]
    fn parses_names_and_numbers() {
        let int = parse_signal(&SignalSpec::Name("SIGINT".into())).unwrap();
        assert_eq!(parse_signal(&SignalSpec::Name("int".into())).unwrap(), int);
        assert_eq!(parse_signal(&SignalSpec::Name("Interrupt".into())).unwrap(), int);
        assert_eq!(parse_signal(&SignalSpec::Number(15)).unwrap(), 15);
        assert_eq!(parse_signal(&SignalSpec::Name("15".into())).unwrap(), 15);
    }

    #[test]
    fn rejects_unknown_and_non_positive() {
        assert!(parse_signal(&SignalSpec::Name("SIGBOGUS".into())).is_err());
        assert!(parse_signal(&SignalSpec::Number(0)).is_err());
        assert!(parse_signal(&SignalSpec::Name("-3".into())).is_err());
    }

    #[test]
    fn default_os_signal_is_term_and_int() {
        let os = OsSignal::default();
        let expected = OsSignal::from_specs(&[
            SignalSpec::Name("SIGTERM".into()),
            SignalSpec::Name("SIGINT".into()),
        ])
        .unwrap();
        assert_eq!(os.signals(), expected.signals());
        assert_eq!(os.signals().len(), 2);
    }
}
