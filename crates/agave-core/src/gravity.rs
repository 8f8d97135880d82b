//! Gravity vector and gravity norm estimation.
//!
//! [`GravityEstimator`] turns raw gravity-sensor (or low-pass filtered
//! accelerometer) samples into a gravity vector in body NED axes.
//! [`GravityNormEstimator`] accumulates the norm of that vector over a
//! bounded window and freezes noise statistics once a stop condition fires.

use crate::averaging::{AveragingFilter, LowPassAveragingFilter, DEFAULT_TIME_CONSTANT};
use crate::earth::ned_gravity;
use crate::error::{Error, Result};
use crate::frames::GeodeticLocation;
use crate::sensor::{SensorAccuracy, SensorDelay, SensorSource, TriadMeasurement};
use crate::statistics::{power_spectral_density, AccumulatedStatistics, TimeIntervalEstimator};
use nalgebra::Vector3;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Gravity vector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GravityEstimatorConfig {
    pub sensor_delay: SensorDelay,
    /// Derive gravity from a filtered accelerometer instead of a gravity sensor.
    pub use_accelerometer: bool,
    /// Time constant of the default low-pass filter (s).
    pub time_constant: f64,
}

impl Default for GravityEstimatorConfig {
    fn default() -> Self {
        Self {
            sensor_delay: SensorDelay::Game,
            use_accelerometer: false,
            time_constant: DEFAULT_TIME_CONSTANT,
        }
    }
}

/// Gravity in body NED axes (pointing down when the device lies flat).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GravityEstimate {
    pub gravity: Vector3<f64>,
    pub timestamp_nanos: i64,
    pub accuracy: SensorAccuracy,
}

impl GravityEstimate {
    pub fn norm(&self) -> f64 {
        self.gravity.norm()
    }
}

pub type GravityListener = Box<dyn FnMut(&GravityEstimate)>;

pub struct GravityEstimator {
    source: Box<dyn SensorSource>,
    config: GravityEstimatorConfig,
    filter: Box<dyn AveragingFilter>,
    running: bool,
    listener: Option<GravityListener>,
}

impl GravityEstimator {
    pub fn new(source: Box<dyn SensorSource>, config: GravityEstimatorConfig) -> Self {
        let filter = Box::new(LowPassAveragingFilter::new(config.time_constant));
        Self {
            source,
            config,
            filter,
            running: false,
            listener: None,
        }
    }

    /// Replaces the filter used when `use_accelerometer` is set.
    pub fn with_filter(mut self, filter: Box<dyn AveragingFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn config(&self) -> &GravityEstimatorConfig {
        &self.config
    }

    pub fn uses_accelerometer(&self) -> bool {
        self.config.use_accelerometer
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn set_listener(&mut self, listener: Option<GravityListener>) {
        self.listener = listener;
    }

    pub fn start(&mut self) -> Result<bool> {
        if self.running {
            return Err(Error::IllegalState("gravity estimator already running"));
        }
        self.filter.reset();
        if !self.source.start(self.config.sensor_delay) {
            debug!("gravity source unavailable");
            self.stop();
            return Ok(false);
        }
        self.running = true;
        debug!(use_accelerometer = self.config.use_accelerometer, "gravity estimator started");
        Ok(true)
    }

    pub fn stop(&mut self) {
        self.source.stop();
        self.running = false;
    }

    /// Processes one gravity (or accelerometer) sample in device axes.
    ///
    /// Returns `None` while stopped.
    pub fn on_measurement(&mut self, measurement: &TriadMeasurement) -> Option<GravityEstimate> {
        if !self.running {
            return None;
        }

        let mut reading = measurement.corrected_ned();
        if self.config.use_accelerometer {
            reading = self.filter.filter(&reading, measurement.timestamp_nanos);
        }

        let estimate = GravityEstimate {
            gravity: -reading,
            timestamp_nanos: measurement.timestamp_nanos,
            accuracy: measurement.accuracy,
        };
        if let Some(listener) = self.listener.as_mut() {
            listener(&estimate);
        }
        Some(estimate)
    }
}

/// Gravity magnitude predicted by the Earth model at `location`.
pub fn expected_gravity_norm(location: &GeodeticLocation) -> f64 {
    ned_gravity(location.latitude, location.height).norm()
}

// ---------------------------------------------------------------------------
// Gravity norm
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopMode {
    MaxSamplesOnly,
    MaxDurationOnly,
    #[default]
    MaxSamplesOrDuration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GravityNormConfig {
    pub max_samples: usize,
    pub max_duration_millis: i64,
    pub stop_mode: StopMode,
    pub gravity: GravityEstimatorConfig,
}

impl Default for GravityNormConfig {
    fn default() -> Self {
        Self {
            max_samples: 1000,
            max_duration_millis: 5000,
            stop_mode: StopMode::default(),
            gravity: GravityEstimatorConfig::default(),
        }
    }
}

impl GravityNormConfig {
    fn validate(&self) -> Result<()> {
        if self.max_samples == 0 {
            return Err(Error::IllegalArgument("max_samples must be positive"));
        }
        if self.max_duration_millis < 0 {
            return Err(Error::IllegalArgument("max_duration_millis must not be negative"));
        }
        Ok(())
    }
}

/// Statistics frozen when a gravity norm estimation completes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GravityNormResult {
    pub average_gravity_norm: f64,
    pub gravity_norm_variance: f64,
    pub gravity_norm_standard_deviation: f64,
    /// Noise PSD in (m/s²)²·s.
    pub gravity_psd: f64,
    pub gravity_root_psd: f64,
    pub average_time_interval: f64,
    pub time_interval_variance: f64,
    pub time_interval_standard_deviation: f64,
    pub elapsed_time_seconds: f64,
    pub num_measurements: usize,
    pub unreliable: bool,
}

pub type GravityNormListener = Box<dyn FnMut(&GravityNormResult)>;
pub type UnreliableListener = Box<dyn FnMut()>;

pub struct GravityNormEstimator {
    gravity: GravityEstimator,
    config: GravityNormConfig,
    running: bool,
    norms: AccumulatedStatistics,
    intervals: TimeIntervalEstimator,
    initial_timestamp_nanos: Option<i64>,
    end_timestamp_nanos: i64,
    num_measurements: usize,
    unreliable: bool,
    result: Option<GravityNormResult>,
    completed_listener: Option<GravityNormListener>,
    unreliable_listener: Option<UnreliableListener>,
}

impl GravityNormEstimator {
    pub fn new(source: Box<dyn SensorSource>, config: GravityNormConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            gravity: GravityEstimator::new(source, config.gravity),
            config,
            running: false,
            norms: AccumulatedStatistics::new(),
            intervals: TimeIntervalEstimator::new(config.max_samples),
            initial_timestamp_nanos: None,
            end_timestamp_nanos: 0,
            num_measurements: 0,
            unreliable: false,
            result: None,
            completed_listener: None,
            unreliable_listener: None,
        })
    }

    pub fn config(&self) -> &GravityNormConfig {
        &self.config
    }

    pub fn set_max_samples(&mut self, max_samples: usize) -> Result<()> {
        self.update_config(GravityNormConfig {
            max_samples,
            ..self.config
        })
    }

    pub fn set_max_duration_millis(&mut self, max_duration_millis: i64) -> Result<()> {
        self.update_config(GravityNormConfig {
            max_duration_millis,
            ..self.config
        })
    }

    pub fn set_stop_mode(&mut self, stop_mode: StopMode) -> Result<()> {
        self.update_config(GravityNormConfig {
            stop_mode,
            ..self.config
        })
    }

    fn update_config(&mut self, config: GravityNormConfig) -> Result<()> {
        if self.running {
            return Err(Error::IllegalState("cannot reconfigure while running"));
        }
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn set_completed_listener(&mut self, listener: Option<GravityNormListener>) {
        self.completed_listener = listener;
    }

    pub fn set_unreliable_listener(&mut self, listener: Option<UnreliableListener>) {
        self.unreliable_listener = listener;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_result_available(&self) -> bool {
        self.result.is_some()
    }

    pub fn result(&self) -> Option<&GravityNormResult> {
        self.result.as_ref()
    }

    pub fn is_unreliable(&self) -> bool {
        self.unreliable
    }

    pub fn num_measurements(&self) -> usize {
        self.num_measurements
    }

    /// Running mean of the norms accumulated so far.
    pub fn average_gravity_norm(&self) -> f64 {
        self.norms.mean()
    }

    pub fn gravity_norm_variance(&self) -> f64 {
        self.norms.variance()
    }

    pub fn elapsed_time_nanos(&self) -> i64 {
        self.initial_timestamp_nanos
            .map_or(0, |t0| self.end_timestamp_nanos - t0)
    }

    pub fn start(&mut self) -> Result<bool> {
        if self.running {
            return Err(Error::IllegalState("gravity norm estimator already running"));
        }

        self.norms.reset();
        self.intervals.reset();
        self.intervals.set_total_samples(match self.config.stop_mode {
            StopMode::MaxDurationOnly => usize::MAX,
            _ => self.config.max_samples,
        });
        self.initial_timestamp_nanos = None;
        self.end_timestamp_nanos = 0;
        self.num_measurements = 0;
        self.unreliable = false;
        self.result = None;

        if !self.gravity.start()? {
            self.stop();
            return Ok(false);
        }
        self.running = true;
        debug!(
            max_samples = self.config.max_samples,
            max_duration_millis = self.config.max_duration_millis,
            stop_mode = ?self.config.stop_mode,
            "gravity norm estimation started"
        );
        Ok(true)
    }

    pub fn stop(&mut self) {
        self.gravity.stop();
        self.running = false;
    }

    pub fn on_accuracy_changed(&mut self, accuracy: SensorAccuracy) {
        if accuracy == SensorAccuracy::Unreliable {
            self.mark_unreliable();
        }
    }

    /// Processes one sample. Returns the frozen result on the sample that
    /// completes the estimation.
    pub fn on_measurement(&mut self, measurement: &TriadMeasurement) -> Option<GravityNormResult> {
        if !self.running {
            return None;
        }
        let estimate = self.gravity.on_measurement(measurement)?;

        if estimate.accuracy == SensorAccuracy::Unreliable {
            self.mark_unreliable();
        }

        let timestamp = estimate.timestamp_nanos;
        let t0 = *self.initial_timestamp_nanos.get_or_insert(timestamp);
        self.norms.add(estimate.norm());
        self.intervals.add_timestamp((timestamp - t0) as f64 * 1e-9);
        self.num_measurements += 1;
        self.end_timestamp_nanos = timestamp;

        if !self.is_complete() {
            return None;
        }

        self.gravity.stop();
        self.running = false;
        let result = self.freeze();
        self.result = Some(result);
        info!(
            average = result.average_gravity_norm,
            std_dev = result.gravity_norm_standard_deviation,
            samples = result.num_measurements,
            "gravity norm estimation completed"
        );
        if let Some(listener) = self.completed_listener.as_mut() {
            listener(&result);
        }
        Some(result)
    }

    fn is_complete(&self) -> bool {
        let samples_reached = self.num_measurements >= self.config.max_samples;
        let duration_reached = self.elapsed_time_nanos() / 1_000_000 >= self.config.max_duration_millis;
        match self.config.stop_mode {
            StopMode::MaxSamplesOnly => samples_reached,
            StopMode::MaxDurationOnly => duration_reached,
            StopMode::MaxSamplesOrDuration => samples_reached || duration_reached,
        }
    }

    fn freeze(&self) -> GravityNormResult {
        let variance = self.norms.variance();
        let average_time_interval = self.intervals.average_time_interval();
        // Duration-bounded runs have no fixed sample density
        let psd = match self.config.stop_mode {
            StopMode::MaxDurationOnly => 0.0,
            _ => power_spectral_density(variance, average_time_interval),
        };
        GravityNormResult {
            average_gravity_norm: self.norms.mean(),
            gravity_norm_variance: variance,
            gravity_norm_standard_deviation: self.norms.standard_deviation(),
            gravity_psd: psd,
            gravity_root_psd: psd.sqrt(),
            average_time_interval,
            time_interval_variance: self.intervals.time_interval_variance(),
            time_interval_standard_deviation: self.intervals.time_interval_standard_deviation(),
            elapsed_time_seconds: self.elapsed_time_nanos() as f64 * 1e-9,
            num_measurements: self.num_measurements,
            unreliable: self.unreliable,
        }
    }

    fn mark_unreliable(&mut self) {
        if self.unreliable {
            return;
        }
        self.unreliable = true;
        warn!("gravity sensor reported unreliable accuracy");
        if let Some(listener) = self.unreliable_listener.as_mut() {
            listener();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::averaging::MeanAveragingFilter;
    use crate::sensor::mock::MockSource;
    use approx::assert_relative_eq;
    use std::cell::Cell;
    use std::rc::Rc;

    fn flat(z: f64, ts: i64) -> TriadMeasurement {
        TriadMeasurement::new(0.0, 0.0, z, ts, SensorAccuracy::High)
    }

    #[test]
    fn test_gravity_points_down_when_flat() {
        let (source, _) = MockSource::new(true);
        let mut est = GravityEstimator::new(source, GravityEstimatorConfig::default());
        assert!(est.on_measurement(&flat(9.81, 0)).is_none());

        assert!(est.start().unwrap());
        let g = est.on_measurement(&flat(9.81, 0)).unwrap();
        assert_relative_eq!(g.gravity, Vector3::new(0.0, 0.0, 9.81), epsilon = 1e-12);
    }

    #[test]
    fn test_accelerometer_mode_filters() {
        let (source, _) = MockSource::new(true);
        let config = GravityEstimatorConfig {
            use_accelerometer: true,
            ..Default::default()
        };
        let mut est = GravityEstimator::new(source, config).with_filter(Box::new(MeanAveragingFilter::new(1.0)));
        est.start().unwrap();
        est.on_measurement(&flat(9.0, 0));
        let g = est.on_measurement(&flat(11.0, 10_000_000)).unwrap();
        assert_relative_eq!(g.gravity.z, 10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_gravity_start_twice_fails() {
        let (source, calls) = MockSource::new(true);
        let mut est = GravityEstimator::new(source, GravityEstimatorConfig::default());
        est.start().unwrap();
        assert!(matches!(est.start(), Err(Error::IllegalState(_))));
        assert_eq!(calls.starts.get(), 1);
    }

    #[test]
    fn test_rejects_bad_config() {
        let (source, _) = MockSource::new(true);
        let config = GravityNormConfig {
            max_duration_millis: -1,
            ..Default::default()
        };
        assert!(matches!(GravityNormEstimator::new(source, config), Err(Error::IllegalArgument(_))));

        let (source, _) = MockSource::new(true);
        let config = GravityNormConfig {
            max_samples: 0,
            ..Default::default()
        };
        assert!(matches!(GravityNormEstimator::new(source, config), Err(Error::IllegalArgument(_))));
    }

    #[test]
    fn test_max_samples_identical_norms() {
        let (source, calls) = MockSource::new(true);
        let config = GravityNormConfig {
            max_samples: 50,
            stop_mode: StopMode::MaxSamplesOnly,
            ..Default::default()
        };
        let mut est = GravityNormEstimator::new(source, config).unwrap();
        let completions = Rc::new(Cell::new(0));
        let counter = Rc::clone(&completions);
        est.set_completed_listener(Some(Box::new(move |_| counter.set(counter.get() + 1))));

        assert!(est.start().unwrap());
        let mut result = None;
        for i in 0..50 {
            result = est.on_measurement(&flat(9.80665, i * 20_000_000));
        }
        // Samples after completion are ignored
        assert!(est.on_measurement(&flat(1.0, 60 * 20_000_000)).is_none());

        let result = result.unwrap();
        assert!(est.is_result_available());
        assert!(!est.is_running());
        assert_relative_eq!(result.average_gravity_norm, 9.80665, epsilon = 1e-12);
        assert_eq!(result.gravity_norm_variance, 0.0);
        assert_eq!(result.num_measurements, 50);
        assert_relative_eq!(result.average_time_interval, 0.02, epsilon = 1e-9);
        assert_relative_eq!(result.elapsed_time_seconds, 0.98, epsilon = 1e-12);
        assert_eq!(calls.stops.get(), 1);
        assert_eq!(completions.get(), 1);
    }

    #[test]
    fn test_max_duration_two_samples() {
        let (source, calls) = MockSource::new(true);
        let config = GravityNormConfig {
            max_samples: 1,
            max_duration_millis: 1000,
            stop_mode: StopMode::MaxDurationOnly,
            ..Default::default()
        };
        let mut est = GravityNormEstimator::new(source, config).unwrap();
        est.start().unwrap();

        assert!(est.on_measurement(&flat(9.81, 5_000)).is_none());
        let result = est.on_measurement(&flat(9.81, 5_000 + 1_000_000_000)).unwrap();
        assert_eq!(result.gravity_psd, 0.0);
        assert_eq!(result.num_measurements, 2);
        assert_relative_eq!(result.elapsed_time_seconds, 1.0, epsilon = 1e-12);
        assert_eq!(calls.stops.get(), 1);
    }

    #[test]
    fn test_max_duration_zeroes_psd_with_noisy_norms() {
        let (source, _) = MockSource::new(true);
        let config = GravityNormConfig {
            max_duration_millis: 1000,
            stop_mode: StopMode::MaxDurationOnly,
            ..Default::default()
        };
        let mut est = GravityNormEstimator::new(source, config).unwrap();
        est.start().unwrap();

        assert!(est.on_measurement(&flat(9.80, 0)).is_none());
        let result = est.on_measurement(&flat(9.82, 1_000_000_000)).unwrap();
        assert!(result.gravity_norm_variance > 0.0);
        assert_eq!(result.gravity_psd, 0.0);
        assert_eq!(result.gravity_root_psd, 0.0);
        assert_relative_eq!(result.average_gravity_norm, 9.81, epsilon = 1e-12);
    }

    #[test]
    fn test_samples_or_duration_keeps_psd() {
        let (source, _) = MockSource::new(true);
        let config = GravityNormConfig {
            max_samples: 2,
            stop_mode: StopMode::MaxSamplesOrDuration,
            ..Default::default()
        };
        let mut est = GravityNormEstimator::new(source, config).unwrap();
        est.start().unwrap();

        est.on_measurement(&flat(9.80, 0));
        let result = est.on_measurement(&flat(9.82, 20_000_000)).unwrap();
        assert!(result.gravity_psd > 0.0);
        assert_relative_eq!(result.gravity_root_psd, result.gravity_psd.sqrt(), epsilon = 1e-15);
    }

    #[test]
    fn test_huge_max_duration_does_not_overflow() {
        let (source, _) = MockSource::new(true);
        let config = GravityNormConfig {
            max_duration_millis: i64::MAX,
            stop_mode: StopMode::MaxDurationOnly,
            ..Default::default()
        };
        let mut est = GravityNormEstimator::new(source, config).unwrap();
        est.start().unwrap();

        for i in 0..10 {
            assert!(est.on_measurement(&flat(9.81, i * 1_000_000_000)).is_none());
        }
        assert!(est.is_running());
        assert_eq!(est.num_measurements(), 10);
    }

    #[test]
    fn test_unreliable_is_sticky() {
        let (source, _) = MockSource::new(true);
        let mut est = GravityNormEstimator::new(source, GravityNormConfig::default()).unwrap();
        let notified = Rc::new(Cell::new(0));
        let counter = Rc::clone(&notified);
        est.set_unreliable_listener(Some(Box::new(move || counter.set(counter.get() + 1))));
        est.start().unwrap();

        est.on_measurement(&TriadMeasurement::new(0.0, 0.0, 9.8, 0, SensorAccuracy::Unreliable));
        est.on_accuracy_changed(SensorAccuracy::Unreliable);
        est.on_measurement(&flat(9.8, 10));

        assert!(est.is_unreliable());
        assert_eq!(notified.get(), 1);
        assert_eq!(est.num_measurements(), 2);
    }

    #[test]
    fn test_start_while_running_and_unavailable() {
        let (source, calls) = MockSource::new(true);
        let mut est = GravityNormEstimator::new(source, GravityNormConfig::default()).unwrap();
        est.start().unwrap();
        assert!(matches!(est.start(), Err(Error::IllegalState(_))));
        assert_eq!(calls.starts.get(), 1);
        assert!(est.set_max_samples(10).is_err());

        let (source, calls) = MockSource::new(false);
        let mut est = GravityNormEstimator::new(source, GravityNormConfig::default()).unwrap();
        assert!(!est.start().unwrap());
        assert!(!est.is_running());
        assert!(calls.stops.get() >= 1);
    }

    #[test]
    fn test_stop_when_idle() {
        let (source, calls) = MockSource::new(true);
        let mut est = GravityNormEstimator::new(source, GravityNormConfig::default()).unwrap();
        est.stop();
        assert!(!est.is_running());
        assert_eq!(calls.stops.get(), 1);
    }

    #[test]
    fn test_expected_norm() {
        let norm = expected_gravity_norm(&GeodeticLocation::from_degrees(45.0, 0.0, 0.0));
        assert_relative_eq!(norm, 9.806, epsilon = 1e-3);
    }
}
