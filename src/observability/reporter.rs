//! Periodic telemetry reporters.
//!
//! # Responsibilities
//! - Uniform handle over anything that emits metrics on a fixed interval
//! - Start every reporter concurrently, stop them together
//!
//! # Design Decisions
//! - One task per reporter; a slow or panicking reporter only affects itself
//! - A pending stop always wins over a pending tick, so no tick begins after
//!   the stop is observed
//! - Stopping never blocks; callers that care wait separately

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::instrument::WithSubscriber;

use crate::config::schema::MAX_REPORT_INTERVAL_MS;
use crate::lifecycle::shutdown::{Shutdown, ShutdownListener};

const MIN_PERIOD: Duration = Duration::from_millis(1);
const MAX_PERIOD: Duration = Duration::from_millis(MAX_REPORT_INTERVAL_MS);

/// Something that emits telemetry once per interval.
pub trait Reporter: Send + Sync + 'static {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Time between two ticks.
    fn interval(&self) -> Duration;

    /// Emit one tick of telemetry.
    fn report(&self);
}

/// Set of reporters started and stopped as one unit.
pub struct ReporterGroup {
    reporters: Vec<Arc<dyn Reporter>>,
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
}

impl ReporterGroup {
    pub fn new() -> Self {
        Self {
            reporters: Vec::new(),
            shutdown: Shutdown::new(),
            tasks: Vec::new(),
        }
    }

    pub fn push(&mut self, reporter: Arc<dyn Reporter>) {
        self.reporters.push(reporter);
    }

    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }

    /// Spawn one ticking task per reporter and return immediately.
    ///
    /// Calling it again while the group runs does nothing. Must be called
    /// from within a tokio runtime.
    pub fn start_all(&mut self) {
        if !self.tasks.is_empty() || self.shutdown.is_triggered() {
            return;
        }

        for reporter in &self.reporters {
            tracing::debug!(
                reporter = reporter.name(),
                interval_ms = reporter.interval().as_millis() as u64,
                "Starting reporter"
            );
            let task = run_reporter(Arc::clone(reporter), self.shutdown.subscribe());
            self.tasks.push(tokio::spawn(task.with_current_subscriber()));
        }
    }

    /// Number of reporter tasks that have not exited.
    pub fn running(&self) -> usize {
        self.tasks.iter().filter(|task| !task.is_finished()).count()
    }

    /// Ask every reporter to stop. Does not wait for them.
    pub fn stop_all(&self) {
        self.shutdown.trigger();
    }

    /// Wait up to `limit` for every reporter task to finish.
    ///
    /// Returns `false` if some task was still running at the deadline.
    pub async fn wait_stopped(&mut self, limit: Duration) -> bool {
        let tasks = std::mem::take(&mut self.tasks);
        time::timeout(limit, futures_util::future::join_all(tasks))
            .await
            .is_ok()
    }
}

impl Default for ReporterGroup {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_reporter(reporter: Arc<dyn Reporter>, mut stop: ShutdownListener) {
    let period = reporter.interval().clamp(MIN_PERIOD, MAX_PERIOD);
    let start = Instant::now().checked_add(period).unwrap_or_else(Instant::now);
    let mut ticker = time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.recv() => break,
            _ = ticker.tick() => {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| reporter.report())) {
                    tracing::warn!(
                        reporter = reporter.name(),
                        panic = panic_message(panic.as_ref()),
                        "Reporter tick panicked"
                    );
                }
            }
        }
    }

    tracing::debug!(reporter = reporter.name(), "Reporter stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Ticker {
        ticks: AtomicUsize,
        panics: bool,
    }

    impl Ticker {
        fn new(panics: bool) -> Arc<Self> {
            Arc::new(Self {
                ticks: AtomicUsize::new(0),
                panics,
            })
        }

        fn ticks(&self) -> usize {
            self.ticks.load(Ordering::SeqCst)
        }
    }

    impl Reporter for Ticker {
        fn name(&self) -> &'static str {
            "ticker"
        }

        fn interval(&self) -> Duration {
            Duration::from_secs(5)
        }

        fn report(&self) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            if self.panics {
                panic!("sink unavailable");
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_each_interval_until_stopped() {
        let ticker = Ticker::new(false);
        let mut group = ReporterGroup::new();
        group.push(ticker.clone());
        group.start_all();

        time::sleep(Duration::from_secs(12)).await;
        assert_eq!(ticker.ticks(), 2);

        group.stop_all();
        assert!(group.wait_stopped(Duration::from_secs(1)).await);

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(ticker.ticks(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_reporter_keeps_ticking_without_affecting_others() {
        let healthy = Ticker::new(false);
        let broken = Ticker::new(true);
        let mut group = ReporterGroup::new();
        group.push(broken.clone());
        group.push(healthy.clone());
        group.start_all();

        time::sleep(Duration::from_secs(16)).await;
        assert_eq!(broken.ticks(), 3);
        assert_eq!(healthy.ticks(), 3);

        group.stop_all();
        assert!(group.wait_stopped(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_first_tick_means_no_ticks() {
        let ticker = Ticker::new(false);
        let mut group = ReporterGroup::new();
        group.push(ticker.clone());
        group.start_all();
        group.stop_all();

        assert!(group.wait_stopped(Duration::from_secs(1)).await);
        time::sleep(Duration::from_secs(20)).await;
        assert_eq!(ticker.ticks(), 0);
    }

    struct Dormant;

    impl Reporter for Dormant {
        fn name(&self) -> &'static str {
            "dormant"
        }

        fn interval(&self) -> Duration {
            Duration::MAX
        }

        fn report(&self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_interval_still_starts_and_stops() {
        let ticker = Ticker::new(false);
        let mut group = ReporterGroup::new();
        group.push(Arc::new(Dormant));
        group.push(ticker.clone());
        group.start_all();

        time::sleep(Duration::from_secs(6)).await;
        assert_eq!(ticker.ticks(), 1);
        assert_eq!(group.running(), 2);

        group.stop_all();
        assert!(group.wait_stopped(Duration::from_secs(1)).await);
        assert_eq!(group.running(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_spawns_once() {
        let ticker = Ticker::new(false);
        let mut group = ReporterGroup::new();
        group.push(ticker.clone());
        group.start_all();
        group.start_all();

        time::sleep(Duration::from_secs(6)).await;
        assert_eq!(ticker.ticks(), 1);
        group.stop_all();
    }
}
