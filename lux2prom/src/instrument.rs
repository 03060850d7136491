//! Live metric instruments.
//!
//! Gauges and counters are lock-free atomics from `prometheus-client`.
//! Histograms and summaries update several fields per observation and keep
//! them behind a private mutex, so a reader always sees a consistent
//! snapshot.

use std::sync::atomic::AtomicU64;

use parking_lot::Mutex;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;

use crate::catalog::MetricKind;

/// Default histogram buckets, matching the Prometheus client libraries.
pub const DEFAULT_BUCKETS: [f64; 14] = [
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

/// Reason an update was refused by an instrument.
pub type Rejection = &'static str;

/// A metric instrument of one of the four supported kinds.
#[derive(Debug)]
pub enum Instrument {
    Gauge(Gauge<f64, AtomicU64>),
    Counter(Counter<f64, AtomicU64>),
    Histogram(Histogram),
    Summary(Summary),
}

impl Instrument {
    /// Create an instrument of the given kind.
    ///
    /// `buckets` is only consulted for histograms; `None` selects
    /// [`DEFAULT_BUCKETS`].
    pub fn new(kind: MetricKind, buckets: Option<&[f64]>) -> Self {
        match kind {
            MetricKind::Gauge => Instrument::Gauge(Gauge::default()),
            MetricKind::Counter => Instrument::Counter(Counter::default()),
            MetricKind::Histogram => {
                Instrument::Histogram(Histogram::new(buckets.unwrap_or(&DEFAULT_BUCKETS)))
            }
            MetricKind::Summary => Instrument::Summary(Summary::default()),
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Instrument::Gauge(_) => MetricKind::Gauge,
            Instrument::Counter(_) => MetricKind::Counter,
            Instrument::Histogram(_) => MetricKind::Histogram,
            Instrument::Summary(_) => MetricKind::Summary,
        }
    }

    /// Apply a reading.
    ///
    /// Gauges are overwritten, counters incremented, histograms and summaries
    /// record one sample. Counters refuse negative or non-finite increments;
    /// histograms and summaries refuse NaN.
    pub fn apply(&self, value: f64) -> Result<(), Rejection> {
        match self {
            Instrument::Gauge(gauge) => {
                gauge.set(value);
            }
            Instrument::Counter(counter) => {
                if !value.is_finite() || value < 0.0 {
                    return Err("counter increment must be a finite, non-negative number");
                }
                counter.inc_by(value);
            }
            Instrument::Histogram(histogram) => {
                if value.is_nan() {
                    return Err("cannot observe NaN");
                }
                histogram.observe(value);
            }
            Instrument::Summary(summary) => {
                if value.is_nan() {
                    return Err("cannot observe NaN");
                }
                summary.observe(value);
            }
        }
        Ok(())
    }

    /// Current value of a gauge or counter. `None` for distributions.
    pub fn value(&self) -> Option<f64> {
        match self {
            Instrument::Gauge(gauge) => Some(gauge.get()),
            Instrument::Counter(counter) => Some(counter.get()),
            Instrument::Histogram(_) | Instrument::Summary(_) => None,
        }
    }
}

/// Point-in-time view of a histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    /// `(upper bound, cumulative count)`, ending with `+Inf`.
    pub buckets: Vec<(f64, u64)>,
    pub sum: f64,
    pub count: u64,
}

#[derive(Debug)]
struct HistogramState {
    /// Per-bucket counts; the last slot is the `+Inf` bucket.
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

/// Histogram with fixed bucket upper bounds.
#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<f64>,
    state: Mutex<HistogramState>,
}

impl Histogram {
    pub fn new(bounds: &[f64]) -> Self {
        let bounds: Vec<f64> = bounds.iter().copied().filter(|b| b.is_finite()).collect();
        let counts = vec![0; bounds.len() + 1];

        Self {
            bounds,
            state: Mutex::new(HistogramState {
                counts,
                sum: 0.0,
                count: 0,
            }),
        }
    }

    pub fn observe(&self, value: f64) {
        let slot = self
            .bounds
            .iter()
            .position(|bound| value <= *bound)
            .unwrap_or(self.bounds.len());

        let mut state = self.state.lock();
        state.counts[slot] += 1;
        state.sum += value;
        state.count += 1;
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let state = self.state.lock();

        let mut cumulative = 0;
        let mut buckets = Vec::with_capacity(state.counts.len());
        for (i, count) in state.counts.iter().enumerate() {
            cumulative += count;
            let bound = self.bounds.get(i).copied().unwrap_or(f64::INFINITY);
            buckets.push((bound, cumulative));
        }

        HistogramSnapshot {
            buckets,
            sum: state.sum,
            count: state.count,
        }
    }
}

/// Summary tracking the sum and count of observations.
#[derive(Debug, Default)]
pub struct Summary {
    state: Mutex<(f64, u64)>,
}

impl Summary {
    pub fn observe(&self, value: f64) {
        let mut state = self.state.lock();
        state.0 += value;
        state.1 += 1;
    }

    /// `(sum, count)`.
    pub fn snapshot(&self) -> (f64, u64) {
        *self.state.lock()
    }
}
