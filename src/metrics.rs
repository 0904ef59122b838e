use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sliding window of latency measurements
#[derive(Debug, Clone)]
pub struct PercentileTracker {
    measurements: Arc<Mutex<VecDeque<u64>>>,
    window_size: usize,
}

impl PercentileTracker {
    /// Create a tracker that keeps the last `window_size` measurements
    pub fn new(window_size: usize) -> Self {
        Self {
            measurements: Arc::new(Mutex::new(VecDeque::with_capacity(window_size))),
            window_size: window_size.max(1),
        }
    }

    /// Record a measurement (in nanoseconds)
    pub fn record(&self, nanos: u64) {
        let mut measurements = self.measurements.lock();
        if measurements.len() >= self.window_size {
            measurements.pop_front();
        }
        measurements.push_back(nanos);
    }

    /// Median in microseconds
    pub fn p50_us(&self) -> f64 {
        self.percentile(0.50)
    }

    /// 95th percentile in microseconds
    pub fn p95_us(&self) -> f64 {
        self.percentile(0.95)
    }

    /// 99th percentile in microseconds
    pub fn p99_us(&self) -> f64 {
        self.percentile(0.99)
    }

    fn percentile(&self, p: f64) -> f64 {
        let mut sorted: Vec<u64> = self.measurements.lock().iter().copied().collect();
        if sorted.is_empty() {
            return 0.0;
        }
        sorted.sort_unstable();

        let idx = ((sorted.len() as f64 * p).ceil() as usize).saturating_sub(1);
        sorted[idx] as f64 / 1000.0
    }

    /// Measurements currently in the window
    pub fn count(&self) -> usize {
        self.measurements.lock().len()
    }
}

/// Counters for one priority block.
///
/// Cheap to clone; clones share the same counters.
#[derive(Debug, Clone)]
pub struct BlockMetrics {
    accepted: Arc<AtomicU64>,
    declined: Arc<AtomicU64>,
    unavailable: Arc<AtomicU64>,
    delivered: Arc<AtomicU64>,
    stalls: Arc<AtomicU64>,
    discarded: Arc<AtomicU64>,
    /// Time from acceptance to delivery
    queue_latency: PercentileTracker,
    start_time: Instant,
}

impl BlockMetrics {
    /// Zeroed counters, clock starting now
    pub fn new() -> Self {
        Self {
            accepted: Arc::new(AtomicU64::new(0)),
            declined: Arc::new(AtomicU64::new(0)),
            unavailable: Arc::new(AtomicU64::new(0)),
            delivered: Arc::new(AtomicU64::new(0)),
            stalls: Arc::new(AtomicU64::new(0)),
            discarded: Arc::new(AtomicU64::new(0)),
            queue_latency: PercentileTracker::new(1000),
            start_time: Instant::now(),
        }
    }

    /// An offer was accepted
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// An offer was declined permanently
    pub fn record_declined(&self) {
        self.declined.fetch_add(1, Ordering::Relaxed);
    }

    /// A confirmed-consumption offer came back empty
    pub fn record_unavailable(&self) {
        self.unavailable.fetch_add(1, Ordering::Relaxed);
    }

    /// A record reached a target after waiting `queued_for`
    pub fn record_delivered(&self, queued_for: Duration) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        self.queue_latency.record(queued_for.as_nanos() as u64);
    }

    /// A propagation pass ended because no target accepted the head record
    pub fn record_stall(&self) {
        self.stalls.fetch_add(1, Ordering::Relaxed);
    }

    /// Records dropped by a fault
    pub fn record_discarded(&self, count: usize) {
        self.discarded.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Offers accepted
    pub fn total_accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Offers declined permanently
    pub fn total_declined(&self) -> u64 {
        self.declined.load(Ordering::Relaxed)
    }

    /// Confirmed offers whose source had nothing
    pub fn total_unavailable(&self) -> u64 {
        self.unavailable.load(Ordering::Relaxed)
    }

    /// Records handed to a target
    pub fn total_delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Passes that ended with records left
    pub fn total_stalls(&self) -> u64 {
        self.stalls.load(Ordering::Relaxed)
    }

    /// Records dropped by a fault
    pub fn total_discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// Delivered records per second since creation
    pub fn throughput_mps(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.total_delivered() as f64 / elapsed
        }
    }

    /// Capture the current values
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_accepted: self.total_accepted(),
            total_declined: self.total_declined(),
            total_unavailable: self.total_unavailable(),
            total_delivered: self.total_delivered(),
            total_stalls: self.total_stalls(),
            total_discarded: self.total_discarded(),
            throughput_mps: self.throughput_mps(),
            queue_p50_us: self.queue_latency.p50_us(),
            queue_p95_us: self.queue_latency.p95_us(),
            queue_p99_us: self.queue_latency.p99_us(),
            elapsed: self.start_time.elapsed(),
        }
    }
}

impl Default for BlockMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of block metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub total_accepted: u64,
    pub total_declined: u64,
    pub total_unavailable: u64,
    pub total_delivered: u64,
    pub total_stalls: u64,
    pub total_discarded: u64,
    pub throughput_mps: f64,
    pub queue_p50_us: f64,
    pub queue_p95_us: f64,
    pub queue_p99_us: f64,
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    /// Format metrics as a human-readable string
    pub fn format(&self) -> String {
        format!(
            "Accepted: {}, Delivered: {}, Declined: {}, Unavailable: {}, Stalls: {}, \
             Discarded: {}, Throughput: {:.2} msg/s, Queue P50: {:.2}µs, P95: {:.2}µs, \
             P99: {:.2}µs, Elapsed: {:.2}s",
            self.total_accepted,
            self.total_delivered,
            self.total_declined,
            self.total_unavailable,
            self.total_stalls,
            self.total_discarded,
            self.throughput_mps,
            self.queue_p50_us,
            self.queue_p95_us,
            self.queue_p99_us,
            self.elapsed.as_secs_f64()
        )
    }
}
