//! Roll and pitch from the sensed gravity direction.

use crate::attitude::{
    build_estimate, AttitudeEstimate, AttitudeEstimator, AttitudeListener, AttitudeOutputConfig,
    DisplayOrientation, DisplayOrientationProvider,
};
use crate::earth::ned_gravity;
use crate::error::{Error, Result};
use crate::frames::GeodeticLocation;
use crate::gravity::{GravityEstimate, GravityEstimator, GravityEstimatorConfig};
use crate::sensor::{SensorSource, TriadMeasurement};
use nalgebra::{UnitQuaternion, Vector3};
use tracing::debug;

/// Which gravity direction the tilt is solved against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LevelingModel {
    /// Gravity along NED down.
    Standard,
    /// Gravity direction from the Earth model at a location.
    Accurate(GeodeticLocation),
}

/// (roll, pitch) of a body sensing `gravity` in its NED axes.
pub fn level(gravity: &Vector3<f64>) -> (f64, f64) {
    let roll = gravity.y.atan2(gravity.z);
    let pitch = (-gravity.x / gravity.y.hypot(gravity.z)).atan();
    (roll, pitch)
}

/// Zero-yaw body -> NED tilt for a body sensing `gravity`.
fn tilt_for(model: &LevelingModel, gravity: &Vector3<f64>) -> UnitQuaternion<f64> {
    let (roll, pitch) = level(gravity);
    let standard = UnitQuaternion::from_euler_angles(roll, pitch, 0.0);

    match model {
        LevelingModel::Standard => standard,
        LevelingModel::Accurate(location) => {
            let local = ned_gravity(location.latitude, location.height);
            let deflection = UnitQuaternion::rotation_between(&Vector3::z(), &local)
                .unwrap_or_else(UnitQuaternion::identity);
            let (roll, pitch, _) = (deflection * standard).euler_angles();
            UnitQuaternion::from_euler_angles(roll, pitch, 0.0)
        }
    }
}

pub struct LevelingEstimator {
    gravity: GravityEstimator,
    model: LevelingModel,
    outputs: AttitudeOutputConfig,
    display: Box<dyn DisplayOrientationProvider>,
    tilt: UnitQuaternion<f64>,
    listener: Option<AttitudeListener>,
}

impl LevelingEstimator {
    pub fn new(gravity: GravityEstimator, model: LevelingModel) -> Self {
        Self {
            gravity,
            model,
            outputs: AttitudeOutputConfig::default(),
            display: Box::new(DisplayOrientation::Rotation0),
            tilt: UnitQuaternion::identity(),
            listener: None,
        }
    }

    pub fn standard(source: Box<dyn SensorSource>, config: GravityEstimatorConfig) -> Self {
        Self::new(GravityEstimator::new(source, config), LevelingModel::Standard)
    }

    pub fn accurate(
        source: Box<dyn SensorSource>,
        config: GravityEstimatorConfig,
        location: GeodeticLocation,
    ) -> Self {
        Self::new(
            GravityEstimator::new(source, config),
            LevelingModel::Accurate(location),
        )
    }

    pub fn model(&self) -> &LevelingModel {
        &self.model
    }

    pub fn set_model(&mut self, model: LevelingModel) -> Result<()> {
        if self.is_running() {
            return Err(Error::IllegalState("cannot change leveling model while running"));
        }
        self.model = model;
        Ok(())
    }

    pub fn outputs(&self) -> &AttitudeOutputConfig {
        &self.outputs
    }

    pub fn set_outputs(&mut self, outputs: AttitudeOutputConfig) {
        self.outputs = outputs;
    }

    pub fn set_display_provider(&mut self, display: Box<dyn DisplayOrientationProvider>) {
        self.display = display;
    }

    pub fn uses_accelerometer(&self) -> bool {
        self.gravity.uses_accelerometer()
    }

    /// Latest zero-yaw body -> NED tilt, without display correction.
    pub fn tilt(&self) -> &UnitQuaternion<f64> {
        &self.tilt
    }

    /// Processes a gravity (or accelerometer) sample in device axes.
    pub fn on_measurement(&mut self, measurement: &TriadMeasurement) -> Option<AttitudeEstimate> {
        let gravity = self.gravity.on_measurement(measurement)?;
        Some(self.on_gravity(&gravity))
    }

    fn on_gravity(&mut self, gravity: &GravityEstimate) -> AttitudeEstimate {
        self.tilt = tilt_for(&self.model, &gravity.gravity);

        let mut body_to_ned = self.tilt;
        if !self.outputs.ignore_display_orientation {
            body_to_ned *= self.display.display_orientation().correction();
        }
        let estimate = build_estimate(
            body_to_ned.inverse(),
            gravity.timestamp_nanos,
            &self.outputs,
            false,
        );

        if let Some(listener) = self.listener.as_mut() {
            listener(&estimate);
        }
        estimate
    }
}

impl AttitudeEstimator for LevelingEstimator {
    fn start(&mut self) -> Result<bool> {
        if self.is_running() {
            return Err(Error::IllegalState("leveling estimator already running"));
        }
        self.tilt = UnitQuaternion::identity();
        let started = self.gravity.start()?;
        debug!(started, model = ?self.model, "leveling estimator start");
        Ok(started)
    }

    fn stop(&mut self) {
        self.gravity.stop();
    }

    fn is_running(&self) -> bool {
        self.gravity.is_running()
    }

    fn set_listener(&mut self, listener: Option<AttitudeListener>) {
        self.listener = listener;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::mock::MockSource;
    use crate::sensor::{ned_to_enu, SensorAccuracy};
    use approx::assert_relative_eq;

    /// Gravity-sensor sample (device axes) for a body with the given attitude.
    fn gravity_sample(roll: f64, pitch: f64, ts: i64) -> TriadMeasurement {
        let body_to_ned = UnitQuaternion::from_euler_angles(roll, pitch, 0.3);
        let g_body = body_to_ned.inverse() * Vector3::new(0.0, 0.0, 9.81);
        let reading = ned_to_enu(&-g_body);
        TriadMeasurement::new(reading.x, reading.y, reading.z, ts, SensorAccuracy::High)
    }

    #[test]
    fn test_level_recovers_tilt() {
        let (roll, pitch) = (0.2, -0.35);
        let g = UnitQuaternion::from_euler_angles(roll, pitch, 1.0).inverse() * Vector3::new(0.0, 0.0, 9.8);
        let (r, p) = level(&g);
        assert_relative_eq!(r, roll, epsilon = 1e-12);
        assert_relative_eq!(p, pitch, epsilon = 1e-12);
    }

    #[test]
    fn test_standard_estimate() {
        let (source, _) = MockSource::new(true);
        let mut est = LevelingEstimator::standard(source, GravityEstimatorConfig::default());
        assert!(est.start().unwrap());

        let estimate = est.on_measurement(&gravity_sample(0.1, 0.2, 7)).unwrap();
        assert_relative_eq!(estimate.roll.unwrap(), 0.1, epsilon = 1e-9);
        assert_relative_eq!(estimate.pitch.unwrap(), 0.2, epsilon = 1e-9);
        assert!(estimate.yaw.is_none());
        assert_eq!(estimate.timestamp_nanos, 7);
        assert_relative_eq!(
            estimate.body_to_ned().angle_to(est.tilt()),
            0.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_accurate_close_to_standard() {
        let (source, _) = MockSource::new(true);
        let location = GeodeticLocation::from_degrees(41.38, 2.17, 2000.0);
        let mut est = LevelingEstimator::accurate(source, GravityEstimatorConfig::default(), location);
        est.start().unwrap();
        let estimate = est.on_measurement(&gravity_sample(0.1, 0.2, 0)).unwrap();
        assert_relative_eq!(estimate.roll.unwrap(), 0.1, epsilon = 1e-4);
        assert_relative_eq!(estimate.pitch.unwrap(), 0.2, epsilon = 1e-4);
    }

    #[test]
    fn test_display_rotation_applied() {
        let (source, _) = MockSource::new(true);
        let mut est = LevelingEstimator::standard(source, GravityEstimatorConfig::default());
        est.set_display_provider(Box::new(|| DisplayOrientation::Rotation90));
        est.start().unwrap();

        let estimate = est.on_measurement(&gravity_sample(0.0, 0.0, 0)).unwrap();
        let expected = DisplayOrientation::Rotation90.correction().inverse();
        assert_relative_eq!(estimate.attitude.angle_to(&expected), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_model_locked_while_running() {
        let (source, calls) = MockSource::new(true);
        let mut est = LevelingEstimator::standard(source, GravityEstimatorConfig::default());
        est.start().unwrap();
        assert!(est.set_model(LevelingModel::Standard).is_err());
        assert!(matches!(est.start(), Err(Error::IllegalState(_))));
        assert_eq!(calls.starts.get(), 1);

        est.stop();
        assert!(est.set_model(LevelingModel::Accurate(GeodeticLocation::default())).is_ok());
    }
}
