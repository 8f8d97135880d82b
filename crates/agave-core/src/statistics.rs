//! Online accumulators used by the estimators.

/// Default number of timestamps a [`TimeIntervalEstimator`] accepts.
pub const DEFAULT_TOTAL_SAMPLES: usize = 100_000;

// ---------------------------------------------------------------------------
// Welford accumulator
// ---------------------------------------------------------------------------

/// Running mean and variance (Welford).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AccumulatedStatistics {
    count: usize,
    mean: f64,
    m2: f64,
}

impl AccumulatedStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Unbiased sample variance; zero with fewer than two samples.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn standard_deviation(&self) -> f64 {
        self.variance().sqrt()
    }
}

// ---------------------------------------------------------------------------
// Time intervals
// ---------------------------------------------------------------------------

/// Accumulates the spacing between consecutive timestamps.
///
/// Accepts at most `total_samples` timestamps; further calls to
/// [`add_timestamp`](Self::add_timestamp) are ignored and return `false`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeIntervalEstimator {
    total_samples: usize,
    processed: usize,
    last_timestamp: Option<f64>,
    intervals: AccumulatedStatistics,
}

impl Default for TimeIntervalEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_TOTAL_SAMPLES)
    }
}

impl TimeIntervalEstimator {
    pub fn new(total_samples: usize) -> Self {
        Self {
            total_samples,
            processed: 0,
            last_timestamp: None,
            intervals: AccumulatedStatistics::new(),
        }
    }

    /// Sample cap; `usize::MAX` means unbounded.
    pub fn total_samples(&self) -> usize {
        self.total_samples
    }

    pub fn set_total_samples(&mut self, total_samples: usize) {
        self.total_samples = total_samples;
    }

    /// Adds a timestamp in seconds.
    pub fn add_timestamp(&mut self, timestamp: f64) -> bool {
        if self.is_finished() {
            return false;
        }

        if let Some(last) = self.last_timestamp {
            self.intervals.add(timestamp - last);
        }
        self.last_timestamp = Some(timestamp);
        self.processed += 1;
        true
    }

    pub fn is_finished(&self) -> bool {
        self.processed >= self.total_samples
    }

    pub fn num_processed_samples(&self) -> usize {
        self.processed
    }

    /// Mean spacing in seconds; zero until two timestamps were added.
    pub fn average_time_interval(&self) -> f64 {
        self.intervals.mean()
    }

    pub fn time_interval_variance(&self) -> f64 {
        self.intervals.variance()
    }

    pub fn time_interval_standard_deviation(&self) -> f64 {
        self.intervals.standard_deviation()
    }

    pub fn reset(&mut self) {
        self.processed = 0;
        self.last_timestamp = None;
        self.intervals.reset();
    }
}

/// Noise power spectral density from a sample variance and sampling period.
#[inline]
pub fn power_spectral_density(variance: f64, time_interval: f64) -> f64 {
    variance * time_interval
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_welford_matches_batch() {
        let values = [9.79, 9.81, 9.80, 9.82, 9.78];
        let mut stats = AccumulatedStatistics::new();
        for v in values {
            stats.add(v);
        }

        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;

        assert_eq!(stats.count(), 5);
        assert_relative_eq!(stats.mean(), mean, epsilon = 1e-12);
        assert_relative_eq!(stats.variance(), var, epsilon = 1e-12);
    }

    #[test]
    fn test_single_sample_has_zero_variance() {
        let mut stats = AccumulatedStatistics::new();
        stats.add(3.0);
        assert_eq!(stats.variance(), 0.0);
        stats.reset();
        assert_eq!(stats.count(), 0);
    }

    #[test]
    fn test_time_intervals() {
        let mut est = TimeIntervalEstimator::new(4);
        assert!(est.add_timestamp(0.0));
        assert!(est.add_timestamp(0.02));
        assert!(est.add_timestamp(0.04));
        assert!(est.add_timestamp(0.06));
        assert!(est.is_finished());
        assert!(!est.add_timestamp(0.08));

        assert_eq!(est.num_processed_samples(), 4);
        assert_relative_eq!(est.average_time_interval(), 0.02, epsilon = 1e-12);
        assert!(est.time_interval_variance() < 1e-20);
    }

    #[test]
    fn test_time_interval_reset() {
        let mut est = TimeIntervalEstimator::new(usize::MAX);
        est.add_timestamp(1.0);
        est.add_timestamp(2.0);
        est.reset();
        assert_eq!(est.num_processed_samples(), 0);
        assert_eq!(est.average_time_interval(), 0.0);
        assert_eq!(est.total_samples(), usize::MAX);
    }
}
