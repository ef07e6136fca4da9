//! Timing helpers for the demo binaries: a raw monotonic clock and a
//! percentile sink for latency samples.

/// Returns the monotonic clock in nanoseconds.
#[cfg(unix)]
#[inline(never)]
pub fn mono_time_ns() -> u64 {
    use libc::{CLOCK_MONOTONIC, clock_gettime, timespec};
    unsafe {
        let mut ts = timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        clock_gettime(CLOCK_MONOTONIC, &mut ts);
        (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
    }
}

/// A fixed-capacity sink of latency samples with percentile reporting.
///
/// Recording never allocates once constructed; samples past the capacity are
/// dropped so the measurement loop stays undisturbed.
pub struct Samples {
    values: Vec<u64>,
    limit: usize,
    sorted: bool,
}

impl Samples {
    /// Creates a sink that retains at most `capacity` samples.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            limit: capacity,
            sorted: false,
        }
    }

    /// Records one sample; silently dropped once the sink is full.
    #[inline(always)]
    pub fn record(&mut self, value: u64) {
        if self.values.len() < self.limit {
            self.values.push(value);
            self.sorted = false;
        }
    }

    /// Number of retained samples.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether the sink has reached its capacity.
    pub fn is_full(&self) -> bool {
        self.values.len() == self.limit
    }

    /// The sample at quantile `p` in `[0.0, 1.0]`.
    ///
    /// # Panics
    ///
    /// Panics when the sink is empty or `p` is outside `[0.0, 1.0]`.
    pub fn percentile(&mut self, p: f64) -> u64 {
        assert!(!self.values.is_empty(), "no samples recorded");
        assert!((0.0..=1.0).contains(&p), "quantile out of range: {p}");
        if !self.sorted {
            self.values.sort_unstable();
            self.sorted = true;
        }
        let idx = ((self.values.len() - 1) as f64 * p).round() as usize;
        self.values[idx]
    }

    /// One-line summary: count, min, median, upper percentiles, max.
    pub fn summary(&mut self, label: &str) -> String {
        format!(
            "{}: n={} min={} p50={} p90={} p99={} p99.9={} max={}",
            label,
            self.len(),
            self.percentile(0.0),
            self.percentile(0.5),
            self.percentile(0.9),
            self.percentile(0.99),
            self.percentile(0.999),
            self.percentile(1.0),
        )
    }
}
