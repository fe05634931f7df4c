//! Round-trip latency tracking with HdrHistogram.
//!
//! The load client stamps each send with [`RawClock::now`] and records
//! the delta when the matching acknowledgement arrives.

use hdrhistogram::{CreationError, Histogram};

/// Significant figures kept by [`LatencyHistogram::new`].
pub const DEFAULT_SIGFIG: u8 = 3;

/// Nanosecond latency histogram.
pub struct LatencyHistogram {
    histogram: Histogram<u64>,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self::with_precision(DEFAULT_SIGFIG).expect("default precision is within 0..=5")
    }

    /// Create with custom precision (0-5 significant digits).
    pub fn with_precision(sigfig: u8) -> Result<Self, CreationError> {
        Ok(Self {
            histogram: Histogram::new(sigfig)?,
        })
    }

    /// Record a latency value in nanoseconds.
    #[inline(always)]
    pub fn record(&mut self, nanos: u64) {
        // Auto-resizing, so any value fits.
        let _ = self.histogram.record(nanos);
    }

    /// Value at percentile (0.0 - 100.0).
    pub fn value_at_percentile(&self, percentile: f64) -> u64 {
        self.histogram.value_at_quantile(percentile / 100.0)
    }

    pub fn p50(&self) -> u64 {
        self.value_at_percentile(50.0)
    }

    pub fn p90(&self) -> u64 {
        self.value_at_percentile(90.0)
    }

    pub fn p99(&self) -> u64 {
        self.value_at_percentile(99.0)
    }

    pub fn p999(&self) -> u64 {
        self.value_at_percentile(99.9)
    }

    pub fn max(&self) -> u64 {
        self.histogram.max()
    }

    pub fn min(&self) -> u64 {
        self.histogram.min()
    }

    pub fn mean(&self) -> f64 {
        self.histogram.mean()
    }

    /// Total count of recorded values.
    pub fn count(&self) -> u64 {
        self.histogram.len()
    }

    /// Fold another histogram's samples into this one.
    pub fn merge(&mut self, other: &LatencyHistogram) {
        let _ = self.histogram.add(&other.histogram);
    }

    pub fn reset(&mut self) {
        self.histogram.reset();
    }

    /// Print the percentile ladder, one line per percentile.
    pub fn print_summary(&self, prefix: &str) {
        println!("{} Distribution ({} samples):", prefix, self.count());
        println!("{}   Min:   {:>12}", prefix, Self::format_latency(self.min()));
        println!("{}   P50:   {:>12}", prefix, Self::format_latency(self.p50()));
        println!("{}   P90:   {:>12}", prefix, Self::format_latency(self.p90()));
        println!("{}   P99:   {:>12}", prefix, Self::format_latency(self.p99()));
        println!("{}   P99.9: {:>12}", prefix, Self::format_latency(self.p999()));
        println!("{}   Max:   {:>12}", prefix, Self::format_latency(self.max()));
        println!("{}   Mean:  {:>12}", prefix, Self::format_latency(self.mean() as u64));
    }

    /// Format latency with appropriate units.
    pub fn format_latency(nanos: u64) -> String {
        if nanos < 1_000 {
            format!("{} ns", nanos)
        } else if nanos < 1_000_000 {
            format!("{:.2} μs", nanos as f64 / 1_000.0)
        } else if nanos < 1_000_000_000 {
            format!("{:.2} ms", nanos as f64 / 1_000_000.0)
        } else {
            format!("{:.2} s", nanos as f64 / 1_000_000_000.0)
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Low-overhead raw clock (TSC where available).
#[derive(Clone)]
pub struct RawClock {
    clock: quanta::Clock,
}

impl RawClock {
    pub fn new() -> Self {
        Self {
            clock: quanta::Clock::new(),
        }
    }

    /// Raw timestamp; only meaningful to [`Self::delta_as_nanos`].
    #[inline(always)]
    pub fn now(&self) -> u64 {
        self.clock.raw()
    }

    #[inline(always)]
    pub fn delta_as_nanos(&self, start: u64, end: u64) -> u64 {
        self.clock.delta_as_nanos(start, end)
    }

    /// Nanoseconds since `start`.
    #[inline(always)]
    pub fn elapsed_nanos(&self, start: u64) -> u64 {
        self.delta_as_nanos(start, self.now())
    }
}

impl Default for RawClock {
    fn default() -> Self {
        Self::new()
    }
}
