//! Process memory and runtime telemetry.
//!
//! # Responsibilities
//! - Sample allocator counters, process size and live task count each tick
//! - Emit every scalar as a gauge in a fixed order
//! - Emit the pauses recorded since the previous tick as histogram samples
//!
//! # Pause History
//! A pause is an executor stall: the reporter measures how late each of its
//! own ticks fired and records lags above [`LAG_THRESHOLD`] into a
//! process-wide ring buffer of [`PAUSE_HISTORY_LEN`] entries. Pause `N`
//! (1-based) lives at index `(N - 1) % 256`, so the most recent pause is at
//! `(num_gc + 255) % 256`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use sysinfo::{Pid, ProcessExt, System, SystemExt};
use tokio::time::Instant;

use crate::config::schema::RuntimeStatsConfig;
use crate::observability::allocator::allocation_counters;
use crate::observability::metrics::SharedSink;
use crate::observability::reporter::Reporter;

/// Number of entries in the pause ring buffer.
pub const PAUSE_HISTORY_LEN: usize = 256;

/// Tick lag below this is scheduling noise, not a pause.
pub const LAG_THRESHOLD: Duration = Duration::from_millis(1);

/// One reading of process memory counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySample {
    pub alloc: u64,
    pub frees: u64,
    pub heap_alloc: u64,
    pub heap_idle: u64,
    pub heap_inuse: u64,
    pub heap_objects: u64,
    pub heap_released: u64,
    pub heap_sys: u64,
    pub lookups: u64,
    pub mallocs: u64,
    /// Number of pauses recorded so far. Wraps at `u32::MAX`.
    pub num_gc: u32,
    pub pause_total_ns: u64,
    /// Recent pause durations, indexed by pause count modulo 256.
    pub pause_ns: [u64; PAUSE_HISTORY_LEN],
    pub total_alloc: u64,
    /// Live tasks on the current tokio runtime.
    pub tasks_alive: u64,
}

impl Default for MemorySample {
    fn default() -> Self {
        Self {
            alloc: 0,
            frees: 0,
            heap_alloc: 0,
            heap_idle: 0,
            heap_inuse: 0,
            heap_objects: 0,
            heap_released: 0,
            heap_sys: 0,
            lookups: 0,
            mallocs: 0,
            num_gc: 0,
            pause_total_ns: 0,
            pause_ns: [0; PAUSE_HISTORY_LEN],
            total_alloc: 0,
            tasks_alive: 0,
        }
    }
}

struct PauseRing {
    count: u32,
    total_ns: u64,
    buf: [u64; PAUSE_HISTORY_LEN],
}

/// Ring buffer of recent pause durations.
pub struct PauseHistory {
    ring: Mutex<PauseRing>,
}

static PAUSES: PauseHistory = PauseHistory::new();

/// The process-wide pause history fed by every stats reporter.
pub fn pause_history() -> &'static PauseHistory {
    &PAUSES
}

impl PauseHistory {
    pub const fn new() -> Self {
        Self {
            ring: Mutex::new(PauseRing {
                count: 0,
                total_ns: 0,
                buf: [0; PAUSE_HISTORY_LEN],
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PauseRing> {
        self.ring.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, pause: Duration) {
        let ns = u64::try_from(pause.as_nanos()).unwrap_or(u64::MAX);
        let mut ring = self.lock();
        let slot = ring.count as usize % PAUSE_HISTORY_LEN;
        ring.buf[slot] = ns;
        ring.count = ring.count.wrapping_add(1);
        ring.total_ns = ring.total_ns.saturating_add(ns);
    }

    /// Returns `(count, total_ns, buffer)`.
    pub fn snapshot(&self) -> (u32, u64, [u64; PAUSE_HISTORY_LEN]) {
        let ring = self.lock();
        (ring.count, ring.total_ns, ring.buf)
    }
}

impl Default for PauseHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// Source of memory samples.
pub trait MemorySampler: Send + Sync + 'static {
    fn read(&self) -> MemorySample;
}

/// Samples the running process: allocator counters, resident size from
/// the OS process table, and the global pause history.
pub struct ProcessSampler {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl ProcessSampler {
    pub fn new() -> Self {
        Self {
            pid: sysinfo::get_current_pid().ok(),
            system: Mutex::new(System::new()),
        }
    }

    /// Resident set size of this process in bytes.
    pub fn resident_bytes(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !system.refresh_process(pid) {
            return None;
        }
        system.process(pid).map(|process| process.memory())
    }
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProcessSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSampler").field("pid", &self.pid).finish()
    }
}

impl MemorySampler for ProcessSampler {
    fn read(&self) -> MemorySample {
        let counters = allocation_counters();
        let (num_gc, pause_total_ns, pause_ns) = pause_history().snapshot();

        let heap_inuse = counters.allocated;
        let heap_sys = self.resident_bytes().unwrap_or(heap_inuse).max(heap_inuse);

        MemorySample {
            alloc: counters.allocated,
            frees: counters.frees,
            heap_alloc: counters.allocated,
            heap_idle: heap_sys - heap_inuse,
            heap_inuse,
            heap_objects: counters.mallocs.saturating_sub(counters.frees),
            heap_released: 0,
            heap_sys,
            lookups: 0,
            mallocs: counters.mallocs,
            num_gc,
            pause_total_ns,
            pause_ns,
            total_alloc: counters.total_allocated,
            tasks_alive: 0,
        }
    }
}

/// Counts live tasks.
pub type TaskCounter = Arc<dyn Fn() -> u64 + Send + Sync>;

fn tokio_alive_tasks() -> u64 {
    tokio::runtime::Handle::try_current()
        .map(|handle| handle.metrics().num_alive_tasks() as u64)
        .unwrap_or(0)
}

/// Entries of `pause_ns` recorded after pause `last` up to pause `current`,
/// oldest first.
///
/// The window is `[last % 256, (current + 255) % 256 + 1)`. When it wraps the
/// tail of the buffer comes first. More than 256 pauses between calls drops
/// the oldest ones.
pub fn pause_window(pause_ns: &[u64; PAUSE_HISTORY_LEN], last: u32, current: u32) -> Vec<u64> {
    if last == current {
        return Vec::new();
    }

    let len = PAUSE_HISTORY_LEN as u32;
    let start = (last % len) as usize;
    let end = (current.wrapping_add(len - 1) % len + 1) as usize;

    if start < end {
        pause_ns[start..end].to_vec()
    } else {
        let mut values = Vec::with_capacity(PAUSE_HISTORY_LEN - start + end);
        values.extend_from_slice(&pause_ns[start..]);
        values.extend_from_slice(&pause_ns[..end]);
        values
    }
}

struct ReportState {
    last_num_gc: u32,
    last_tick: Option<Instant>,
}

/// Periodic reporter for process memory counters and pauses.
pub struct RuntimeStatsReporter {
    names: RuntimeStatsConfig,
    sink: SharedSink,
    sampler: Arc<dyn MemorySampler>,
    tasks: TaskCounter,
    state: Mutex<ReportState>,
}

impl RuntimeStatsReporter {
    pub fn new(names: RuntimeStatsConfig, sink: SharedSink) -> Self {
        Self {
            names,
            sink,
            sampler: Arc::new(ProcessSampler::new()),
            tasks: Arc::new(tokio_alive_tasks),
            state: Mutex::new(ReportState {
                last_num_gc: 0,
                last_tick: None,
            }),
        }
    }

    pub fn with_sampler(mut self, sampler: impl MemorySampler) -> Self {
        self.sampler = Arc::new(sampler);
        self
    }

    pub fn with_task_counter(mut self, tasks: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        self.tasks = Arc::new(tasks);
        self
    }

    /// Pause count seen at the previous tick.
    pub fn last_num_gc(&self) -> u32 {
        self.lock().last_num_gc
    }

    fn lock(&self) -> MutexGuard<'_, ReportState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn measure_lag(&self, state: &mut ReportState) {
        let now = Instant::now();
        if let Some(previous) = state.last_tick.replace(now) {
            let lag = now
                .saturating_duration_since(previous)
                .saturating_sub(self.names.report_interval());
            if lag >= LAG_THRESHOLD {
                pause_history().record(lag);
            }
        }
    }
}

impl Reporter for RuntimeStatsReporter {
    fn name(&self) -> &'static str {
        "runtimestats"
    }

    fn interval(&self) -> Duration {
        self.names.report_interval()
    }

    fn report(&self) {
        let mut state = self.lock();
        self.measure_lag(&mut state);

        let mut sample = self.sampler.read();
        sample.tasks_alive = (self.tasks)();

        let names = &self.names;
        let sink = &self.sink;
        sink.gauge(&names.alloc, sample.alloc as f64);
        sink.gauge(&names.frees, sample.frees as f64);
        sink.gauge(&names.heap_alloc, sample.heap_alloc as f64);
        sink.gauge(&names.heap_idle, sample.heap_idle as f64);
        sink.gauge(&names.heap_inuse, sample.heap_inuse as f64);
        sink.gauge(&names.heap_objects, sample.heap_objects as f64);
        sink.gauge(&names.heap_released, sample.heap_released as f64);
        sink.gauge(&names.heap_sys, sample.heap_sys as f64);
        sink.gauge(&names.lookups, sample.lookups as f64);
        sink.gauge(&names.mallocs, sample.mallocs as f64);
        sink.gauge(&names.num_gc, f64::from(sample.num_gc));
        sink.gauge(&names.pause_total_ns, sample.pause_total_ns as f64);
        sink.gauge(&names.total_alloc, sample.total_alloc as f64);
        sink.gauge(&names.tasks_alive, sample.tasks_alive as f64);

        if sample.num_gc == state.last_num_gc {
            return;
        }
        let pauses = pause_window(&sample.pause_ns, state.last_num_gc, sample.num_gc);
        state.last_num_gc = sample.num_gc;

        for pause in pauses {
            sink.histogram(&names.pause_ns, pause as f64);
        }
    }
}
