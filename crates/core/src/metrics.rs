use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

const DEFAULT_WINDOW: usize = 64;

/// Lightweight counters for buffer pools.
///
/// # Example
/// ```rust
/// use hwimg_core::metrics::Metrics;
///
/// let metrics = Metrics::default();
/// metrics.hit();
/// assert_eq!(metrics.hits(), 1);
/// ```
#[derive(Debug, Default)]
pub struct Metrics {
    hits: AtomicU64,
    misses: AtomicU64,
    allocations: AtomicU64,
}

impl Metrics {
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn alloc(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }
}

/// Rolling timing and failure counts for one kind of pipeline call.
///
/// Clones share the same counters.
///
/// # Example
/// ```rust
/// use hwimg_core::metrics::StageMetrics;
/// use std::time::Duration;
///
/// let metrics = StageMetrics::default();
/// metrics.record(Duration::from_millis(4));
/// metrics.record_failure();
/// assert_eq!(metrics.total_samples(), 1);
/// assert_eq!(metrics.failures(), 1);
/// assert_eq!(metrics.avg_millis(), Some(4.0));
/// ```
#[derive(Default, Clone)]
pub struct StageMetrics {
    inner: Arc<StageState>,
}

#[derive(Default)]
struct StageState {
    count: AtomicU64,
    failures: AtomicU64,
    last_nanos: AtomicU64,
    window: Mutex<VecDeque<u64>>,
}

impl StageMetrics {
    /// Record the duration of a successful call.
    pub fn record(&self, dur: Duration) {
        let nanos = dur.as_nanos().min(u64::MAX as u128) as u64;
        self.inner.count.fetch_add(1, Ordering::Relaxed);
        self.inner.last_nanos.store(nanos, Ordering::Relaxed);
        let mut window = self.inner.window.lock();
        window.push_back(nanos);
        while window.len() > DEFAULT_WINDOW {
            window.pop_front();
        }
    }

    /// Count a failed call.
    pub fn record_failure(&self) {
        self.inner.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Successful calls over the lifetime.
    pub fn total_samples(&self) -> u64 {
        self.inner.count.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.inner.failures.load(Ordering::Relaxed)
    }

    /// Average of the recent window in milliseconds.
    pub fn avg_millis(&self) -> Option<f64> {
        let window = self.inner.window.lock();
        if window.is_empty() {
            return None;
        }
        let total: u128 = window.iter().map(|n| *n as u128).sum();
        Some(total as f64 / 1_000_000.0 / window.len() as f64)
    }

    /// Most recent sample in milliseconds.
    pub fn last_millis(&self) -> Option<f64> {
        match self.inner.last_nanos.load(Ordering::Relaxed) {
            0 => None,
            n => Some(n as f64 / 1_000_000.0),
        }
    }
}

impl std::fmt::Debug for StageMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageMetrics")
            .field("samples", &self.total_samples())
            .field("failures", &self.failures())
            .field("avg_millis", &self.avg_millis())
            .finish()
    }
}
