//! Streaming histogram accumulator
//!
//! Summarizes one flush interval of samples as exact count/sum/min/max plus
//! approximate percentiles from a CKMS sketch. The sketch holds a bounded
//! number of tuples regardless of how many samples arrive; the configured
//! size budget sets its rank-error bound (budget 100 -> 1% rank error), so
//! memory is traded directly for percentile accuracy.

use quantiles::ckms::CKMS;

/// Accumulates one interval's worth of samples for a histogram or timer.
pub struct Histo {
    sketch: CKMS<f64>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Histo {
    /// `size_budget` is the accuracy knob: the CKMS error bound is its
    /// reciprocal. Must be at least 1.
    pub fn new(size_budget: u32) -> Self {
        let error = (1.0 / f64::from(size_budget.max(1))).min(0.5);
        Histo {
            sketch: CKMS::new(error),
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    #[inline]
    pub fn insert(&mut self, value: f64) {
        self.sketch.insert(value);
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// Approximate value at quantile `q` in [0, 1]. None until at least one
    /// sample has been inserted.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        self.sketch.query(q).map(|(_rank, v)| v)
    }
}

/// Render a quantile as a point-name suffix: 0.5 -> "p50", 0.999 -> "p99.9".
pub fn percentile_suffix(q: f64) -> String {
    // tenths of a percent, to keep float formatting out of metric names
    let tenths = (q * 1000.0).round() as u32;
    if tenths % 10 == 0 {
        format!("p{}", tenths / 10)
    } else {
        format!("p{}.{}", tenths / 10, tenths % 10)
    }
}
