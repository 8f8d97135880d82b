//! Relative attitude from integrated angular rate.

use crate::attitude::{
    build_estimate, AttitudeEstimate, AttitudeEstimator, AttitudeListener, AttitudeOutputConfig,
    DisplayOrientation, DisplayOrientationProvider,
};
use crate::error::{Error, Result};
use crate::sensor::{SensorDelay, SensorSource, TriadMeasurement};
use crate::statistics::TimeIntervalEstimator;
use nalgebra::{UnitQuaternion, Vector3};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GyroscopeConfig {
    pub sensor_delay: SensorDelay,
    pub outputs: AttitudeOutputConfig,
}

/// Integrates gyroscope samples into a body -> NED attitude relative to the
/// attitude at start.
pub struct RelativeGyroscopeAttitudeEstimator {
    source: Box<dyn SensorSource>,
    config: GyroscopeConfig,
    display: Box<dyn DisplayOrientationProvider>,
    running: bool,
    delta_attitude: UnitQuaternion<f64>,
    internal_attitude: UnitQuaternion<f64>,
    attitude: UnitQuaternion<f64>,
    intervals: TimeIntervalEstimator,
    initial_timestamp_nanos: Option<i64>,
    last_timestamp_nanos: i64,
    listener: Option<AttitudeListener>,
}

impl RelativeGyroscopeAttitudeEstimator {
    pub fn new(source: Box<dyn SensorSource>, config: GyroscopeConfig) -> Self {
        Self {
            source,
            config,
            display: Box::new(DisplayOrientation::Rotation0),
            running: false,
            delta_attitude: UnitQuaternion::identity(),
            internal_attitude: UnitQuaternion::identity(),
            attitude: UnitQuaternion::identity(),
            intervals: TimeIntervalEstimator::new(usize::MAX),
            initial_timestamp_nanos: None,
            last_timestamp_nanos: 0,
            listener: None,
        }
    }

    pub fn config(&self) -> &GyroscopeConfig {
        &self.config
    }

    pub fn set_outputs(&mut self, outputs: AttitudeOutputConfig) {
        self.config.outputs = outputs;
    }

    pub fn set_display_provider(&mut self, display: Box<dyn DisplayOrientationProvider>) {
        self.display = display;
    }

    /// Rotation integrated from the last sample (body frame).
    pub fn delta_attitude(&self) -> &UnitQuaternion<f64> {
        &self.delta_attitude
    }

    /// Accumulated body -> NED attitude without display correction.
    pub fn internal_attitude(&self) -> &UnitQuaternion<f64> {
        &self.internal_attitude
    }

    /// Last published (NED -> body) attitude.
    pub fn attitude(&self) -> &UnitQuaternion<f64> {
        &self.attitude
    }

    /// Mean sample spacing in seconds.
    pub fn average_time_interval(&self) -> f64 {
        self.intervals.average_time_interval()
    }

    pub fn initial_timestamp_nanos(&self) -> Option<i64> {
        self.initial_timestamp_nanos
    }

    /// Processes one gyroscope sample in device axes.
    ///
    /// The first sample after start only sets the time reference.
    pub fn on_measurement(&mut self, measurement: &TriadMeasurement) -> Option<AttitudeEstimate> {
        if !self.running {
            return None;
        }

        let timestamp = measurement.timestamp_nanos;
        let Some(t0) = self.initial_timestamp_nanos else {
            self.initial_timestamp_nanos = Some(timestamp);
            self.last_timestamp_nanos = timestamp;
            self.intervals.add_timestamp(0.0);
            return None;
        };

        let dt = (timestamp - self.last_timestamp_nanos) as f64 * 1e-9;
        self.last_timestamp_nanos = timestamp;
        self.intervals.add_timestamp((timestamp - t0) as f64 * 1e-9);

        let rate: Vector3<f64> = measurement.corrected_ned();
        self.delta_attitude = UnitQuaternion::from_scaled_axis(rate * dt);
        self.internal_attitude = self.internal_attitude * self.delta_attitude;
        self.internal_attitude.renormalize();

        let mut body_to_ned = self.internal_attitude;
        if !self.config.outputs.ignore_display_orientation {
            body_to_ned *= self.display.display_orientation().correction();
        }
        self.attitude = body_to_ned.inverse();

        let estimate = build_estimate(self.attitude, timestamp, &self.config.outputs, true);
        if let Some(listener) = self.listener.as_mut() {
            listener(&estimate);
        }
        Some(estimate)
    }
}

impl AttitudeEstimator for RelativeGyroscopeAttitudeEstimator {
    fn start(&mut self) -> Result<bool> {
        if self.running {
            return Err(Error::IllegalState("gyroscope estimator already running"));
        }

        self.delta_attitude = UnitQuaternion::identity();
        self.internal_attitude = UnitQuaternion::identity();
        self.attitude = UnitQuaternion::identity();
        self.intervals.reset();
        self.initial_timestamp_nanos = None;
        self.last_timestamp_nanos = 0;

        if !self.source.start(self.config.sensor_delay) {
            debug!("gyroscope source unavailable");
            self.stop();
            return Ok(false);
        }
        self.running = true;
        debug!("gyroscope estimator started");
        Ok(true)
    }

    fn stop(&mut self) {
        self.source.stop();
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn set_listener(&mut self, listener: Option<AttitudeListener>) {
        self.listener = listener;
    }
}
