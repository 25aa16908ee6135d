use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use parking_lot::Mutex;

/// Count and cumulative latency of one kind of routed call
#[derive(Debug, Default)]
struct Timed {
    calls: AtomicUsize,
    nanos: AtomicU64,
}

impl Timed {
    fn record(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn total(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Relaxed))
    }

    fn mean(&self) -> Duration {
        match u32::try_from(self.calls()) {
            Ok(0) => Duration::ZERO,
            Ok(calls) => self.total() / calls,
            Err(_) => Duration::from_nanos(self.nanos.load(Ordering::Relaxed) / self.calls() as u64),
        }
    }

    fn clear(&self) {
        self.calls.store(0, Ordering::Relaxed);
        self.nanos.store(0, Ordering::Relaxed);
    }
}

/// In-process counters for a table
///
/// Appends and lookups are timed from routing to the shard's return. Routing
/// failures count identifier and shard errors, not calls on a closed table.
#[derive(Debug)]
pub struct TableMetrics {
    appends: Timed,
    lookups: Timed,
    failures: AtomicUsize,
    opens: AtomicUsize,
    last_open: Mutex<Duration>,
    created: Instant,
}

impl Default for TableMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TableMetrics {
    pub fn new() -> Self {
        Self {
            appends: Timed::default(),
            lookups: Timed::default(),
            failures: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
            last_open: Mutex::new(Duration::ZERO),
            created: Instant::now(),
        }
    }

    /// Record a successful append
    pub fn record_write(&self, elapsed: Duration) {
        self.appends.record(elapsed);
    }

    /// Record a successful lookup
    pub fn record_read(&self, elapsed: Duration) {
        self.lookups.record(elapsed);
    }

    pub fn increment_failures(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed open and how long discovery plus shard opens took
    pub fn record_open(&self, elapsed: Duration) {
        self.opens.fetch_add(1, Ordering::Relaxed);
        *self.last_open.lock() = elapsed;
    }

    pub fn get_write_count(&self) -> usize {
        self.appends.calls()
    }

    pub fn get_read_count(&self) -> usize {
        self.lookups.calls()
    }

    pub fn get_failure_count(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn get_open_count(&self) -> usize {
        self.opens.load(Ordering::Relaxed)
    }

    pub fn get_write_duration(&self) -> Duration {
        self.appends.total()
    }

    pub fn get_read_duration(&self) -> Duration {
        self.lookups.total()
    }

    pub fn get_avg_write_duration(&self) -> Duration {
        self.appends.mean()
    }

    pub fn get_avg_read_duration(&self) -> Duration {
        self.lookups.mean()
    }

    pub fn get_last_open_duration(&self) -> Duration {
        *self.last_open.lock()
    }

    /// Time since the table handle was constructed
    pub fn get_uptime(&self) -> Duration {
        self.created.elapsed()
    }

    /// Zero every counter; uptime keeps running
    pub fn reset(&self) {
        self.appends.clear();
        self.lookups.clear();
        self.failures.store(0, Ordering::Relaxed);
        self.opens.store(0, Ordering::Relaxed);
        *self.last_open.lock() = Duration::ZERO;
    }

    /// Multi-line summary for logs and diagnostics
    pub fn get_report(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TableMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Table Metrics ===")?;
        writeln!(f, "Uptime: {:?}", self.get_uptime())?;
        writeln!(
            f,
            "Opens: {} (last took {:?})",
            self.get_open_count(),
            self.get_last_open_duration()
        )?;
        writeln!(
            f,
            "Appends: {} (avg {:?})",
            self.get_write_count(),
            self.get_avg_write_duration()
        )?;
        writeln!(
            f,
            "Lookups: {} (avg {:?})",
            self.get_read_count(),
            self.get_avg_read_duration()
        )?;
        writeln!(f, "Routing failures: {}", self.get_failure_count())
    }
}
