//! Averaging filters separating gravity from accelerometer samples.

use nalgebra::Vector3;
use std::collections::VecDeque;

/// Default filter time constant (s).
pub const DEFAULT_TIME_CONSTANT: f64 = 0.1;

/// Smooths a stream of timestamped triads.
pub trait AveragingFilter {
    /// Feeds one sample and returns the current filtered value.
    fn filter(&mut self, sample: &Vector3<f64>, timestamp_nanos: i64) -> Vector3<f64>;

    fn reset(&mut self);
}

impl<F: AveragingFilter + ?Sized> AveragingFilter for Box<F> {
    fn filter(&mut self, sample: &Vector3<f64>, timestamp_nanos: i64) -> Vector3<f64> {
        (**self).filter(sample, timestamp_nanos)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

// ---------------------------------------------------------------------------
// Low pass
// ---------------------------------------------------------------------------

/// First-order exponential filter, `α = τ / (τ + Δt)`.
///
/// The first sample after construction or reset seeds the output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LowPassAveragingFilter {
    time_constant: f64,
    state: Option<(Vector3<f64>, i64)>,
}

impl Default for LowPassAveragingFilter {
    fn default() -> Self {
        Self::new(DEFAULT_TIME_CONSTANT)
    }
}

impl LowPassAveragingFilter {
    pub fn new(time_constant: f64) -> Self {
        Self {
            time_constant,
            state: None,
        }
    }

    pub fn time_constant(&self) -> f64 {
        self.time_constant
    }
}

impl AveragingFilter for LowPassAveragingFilter {
    fn filter(&mut self, sample: &Vector3<f64>, timestamp_nanos: i64) -> Vector3<f64> {
        let output = match self.state {
            None => *sample,
            Some((previous, last_timestamp)) => {
                let dt = ((timestamp_nanos - last_timestamp) as f64 * 1e-9).max(0.0);
                let alpha = self.time_constant / (self.time_constant + dt);
                previous * alpha + sample * (1.0 - alpha)
            }
        };
        self.state = Some((output, timestamp_nanos));
        output
    }

    fn reset(&mut self) {
        self.state = None;
    }
}

// ---------------------------------------------------------------------------
// Moving mean
// ---------------------------------------------------------------------------

/// Mean of the samples received within the last `time_constant` seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct MeanAveragingFilter {
    time_constant: f64,
    window: VecDeque<(i64, Vector3<f64>)>,
    sum: Vector3<f64>,
}

impl Default for MeanAveragingFilter {
    fn default() -> Self {
        Self::new(DEFAULT_TIME_CONSTANT)
    }
}

impl MeanAveragingFilter {
    pub fn new(time_constant: f64) -> Self {
        Self {
            time_constant,
            window: VecDeque::new(),
            sum: Vector3::zeros(),
        }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

impl AveragingFilter for MeanAveragingFilter {
    fn filter(&mut self, sample: &Vector3<f64>, timestamp_nanos: i64) -> Vector3<f64> {
        self.window.push_back((timestamp_nanos, *sample));
        self.sum += sample;

        let window_nanos = (self.time_constant * 1e9) as i64;
        while let Some(&(ts, value)) = self.window.front() {
            if timestamp_nanos - ts <= window_nanos {
                break;
            }
            self.sum -= value;
            self.window.pop_front();
        }

        self.sum / self.window.len() as f64
    }

    fn reset(&mut self) {
        self.window.clear();
        self.sum = Vector3::zeros();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_low_pass_seeds_and_converges() {
        let mut f = LowPassAveragingFilter::default();
        let first = f.filter(&Vector3::new(0.0, 0.0, 10.0), 0);
        assert_eq!(first, Vector3::new(0.0, 0.0, 10.0));

        let target = Vector3::new(0.0, 0.0, 9.8);
        let mut out = first;
        for i in 1..500 {
            out = f.filter(&target, i * 20_000_000);
        }
        assert_relative_eq!(out, target, epsilon = 1e-9);
    }

    #[test]
    fn test_low_pass_alpha() {
        let mut f = LowPassAveragingFilter::new(0.1);
        f.filter(&Vector3::zeros(), 0);
        // dt = 0.1 s gives alpha = 0.5
        let out = f.filter(&Vector3::new(2.0, 0.0, 0.0), 100_000_000);
        assert_relative_eq!(out.x, 1.0, epsilon = 1e-12);

        f.reset();
        assert_eq!(f.filter(&Vector3::new(3.0, 0.0, 0.0), 0).x, 3.0);
    }

    #[test]
    fn test_mean_window_drops_old_samples() {
        let mut f = MeanAveragingFilter::new(0.05);
        f.filter(&Vector3::new(1.0, 0.0, 0.0), 0);
        f.filter(&Vector3::new(3.0, 0.0, 0.0), 20_000_000);
        let out = f.filter(&Vector3::new(5.0, 0.0, 0.0), 40_000_000);
        assert_relative_eq!(out.x, 3.0, epsilon = 1e-12);

        let out = f.filter(&Vector3::new(7.0, 0.0, 0.0), 60_000_000);
        assert_eq!(f.len(), 3);
        assert_relative_eq!(out.x, 5.0, epsilon = 1e-12);

        f.reset();
        assert!(f.is_empty());
    }
}
