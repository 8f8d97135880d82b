//! Pose estimation: fused attitude plus strapdown navigation.
//!
//! The first fused attitude bootstraps the initial ECEF frame at the
//! configured location. Every later one advances the previous frame by the
//! latest body kinematics and reports rigid transformations between frames.

use crate::attitude::{AttitudeEstimate, AttitudeEstimator, AttitudeOutputConfig};
use crate::error::{Error, Result};
use crate::frames::{BodyKinematics, CoordinateTransformation, EcefFrame, FrameType, GeodeticLocation, NedFrame};
use crate::geomagnetic::FusedGeomagneticAttitudeEstimator;
use crate::navigator::{EcefInertialNavigator, InertialNavigator};
use crate::sensor::TriadMeasurement;
use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoseConfig {
    pub estimate_initial_transformation: bool,
    pub estimate_previous_transformation: bool,
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            estimate_initial_transformation: true,
            estimate_previous_transformation: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseEstimate {
    pub current_frame: EcefFrame,
    /// Frame before this update.
    pub previous_frame: EcefFrame,
    pub initial_frame: EcefFrame,
    /// Fused NED -> body attitude that triggered the update.
    pub attitude: UnitQuaternion<f64>,
    /// Body rotation from the previous frame to the current one.
    pub delta_attitude: UnitQuaternion<f64>,
    pub timestamp_nanos: i64,
    pub initial_transformation: Option<Isometry3<f64>>,
    pub previous_transformation: Option<Isometry3<f64>>,
}

pub type PoseListener = Box<dyn FnMut(&PoseEstimate)>;

/// Rigid transformation mapping `start`'s position onto `end`'s.
///
/// The rotation is the attitude change between both frames in ECEF axes.
pub fn compute_transformation(start: &EcefFrame, end: &EcefFrame) -> Isometry3<f64> {
    let rotation = end.attitude() * start.attitude().inverse();
    let translation: Vector3<f64> = end.position - rotation * start.position;
    Isometry3::from_parts(Translation3::from(translation), rotation)
}

pub struct PoseEstimator<N = EcefInertialNavigator> {
    attitude: FusedGeomagneticAttitudeEstimator,
    navigator: N,
    location: GeodeticLocation,
    config: PoseConfig,
    running: bool,
    initialized: bool,
    kinematics: BodyKinematics,
    initial_frame: EcefFrame,
    previous_frame: EcefFrame,
    current_frame: EcefFrame,
    listener: Option<PoseListener>,
}

impl PoseEstimator {
    pub fn new(attitude: FusedGeomagneticAttitudeEstimator, location: GeodeticLocation, config: PoseConfig) -> Self {
        Self::with_navigator(attitude, EcefInertialNavigator::new(), location, config)
    }
}

impl<N: InertialNavigator> PoseEstimator<N> {
    pub fn with_navigator(
        mut attitude: FusedGeomagneticAttitudeEstimator,
        navigator: N,
        location: GeodeticLocation,
        config: PoseConfig,
    ) -> Self {
        // Frames follow the physical body, not the screen
        attitude.set_outputs(AttitudeOutputConfig {
            estimate_euler_angles: false,
            estimate_coordinate_transformation: false,
            ignore_display_orientation: true,
        });
        Self {
            attitude,
            navigator,
            location,
            config,
            running: false,
            initialized: false,
            kinematics: BodyKinematics::default(),
            initial_frame: EcefFrame::default(),
            previous_frame: EcefFrame::default(),
            current_frame: EcefFrame::default(),
            listener: None,
        }
    }

    pub fn config(&self) -> &PoseConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: PoseConfig) -> Result<()> {
        self.check_stopped()?;
        self.config = config;
        Ok(())
    }

    pub fn location(&self) -> &GeodeticLocation {
        &self.location
    }

    pub fn set_location(&mut self, location: GeodeticLocation) -> Result<()> {
        self.check_stopped()?;
        self.location = location;
        Ok(())
    }

    pub fn set_listener(&mut self, listener: Option<PoseListener>) {
        self.listener = listener;
    }

    pub fn attitude_estimator(&self) -> &FusedGeomagneticAttitudeEstimator {
        &self.attitude
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn kinematics(&self) -> &BodyKinematics {
        &self.kinematics
    }

    pub fn initial_frame(&self) -> Option<&EcefFrame> {
        self.initialized.then_some(&self.initial_frame)
    }

    pub fn current_frame(&self) -> Option<&EcefFrame> {
        self.initialized.then_some(&self.current_frame)
    }

    fn check_stopped(&self) -> Result<()> {
        if self.running {
            Err(Error::IllegalState("cannot reconfigure while running"))
        } else {
            Ok(())
        }
    }

    pub fn start(&mut self) -> Result<bool> {
        self.check_stopped()?;
        if !self.attitude.start()? {
            debug!("attitude estimator failed to start");
            self.stop();
            return Ok(false);
        }
        self.initialized = false;
        self.kinematics = BodyKinematics::default();
        self.running = true;
        Ok(true)
    }

    pub fn stop(&mut self) {
        self.attitude.stop();
        self.running = false;
    }

    pub fn on_accelerometer_measurement(&mut self, measurement: &TriadMeasurement) {
        if !self.running {
            return;
        }
        self.kinematics.specific_force = measurement.corrected_ned();
        if self.attitude.uses_accelerometer() {
            self.attitude.on_gravity_measurement(measurement);
        }
    }

    pub fn on_gravity_measurement(&mut self, measurement: &TriadMeasurement) {
        if self.running && !self.attitude.uses_accelerometer() {
            self.attitude.on_gravity_measurement(measurement);
        }
    }

    pub fn on_magnetometer_measurement(&mut self, measurement: &TriadMeasurement) {
        if self.running {
            self.attitude.on_magnetometer_measurement(measurement);
        }
    }

    /// Updates the angular rate and advances the pose on the resulting
    /// fused attitude.
    pub fn on_gyroscope_measurement(&mut self, measurement: &TriadMeasurement) -> Result<Option<PoseEstimate>> {
        if !self.running {
            return Ok(None);
        }
        self.kinematics.angular_rate = measurement.corrected_ned();
        match self.attitude.on_gyroscope_measurement(measurement) {
            Some(estimate) => self.on_attitude(&estimate),
            None => Ok(None),
        }
    }

    fn on_attitude(&mut self, estimate: &AttitudeEstimate) -> Result<Option<PoseEstimate>> {
        if !self.initialized {
            let c_body_to_ned = CoordinateTransformation::from_rotation(
                &estimate.body_to_ned(),
                FrameType::Body,
                FrameType::LocalNavigation,
            );
            self.initial_frame = NedFrame::new(self.location, Vector3::zeros(), c_body_to_ned)?.to_ecef();
            self.previous_frame = self.initial_frame;
            self.current_frame = self.initial_frame;
            self.initialized = true;
            debug!(timestamp = estimate.timestamp_nanos, "pose reference frame initialized");
            return Ok(None);
        }

        let time_interval = self.attitude.average_time_interval();
        self.navigator.navigate(
            time_interval,
            &self.previous_frame,
            &self.kinematics,
            &mut self.current_frame,
        )?;

        let initial_transformation = self
            .config
            .estimate_initial_transformation
            .then(|| compute_transformation(&self.initial_frame, &self.current_frame));
        let previous_transformation = self
            .config
            .estimate_previous_transformation
            .then(|| compute_transformation(&self.previous_frame, &self.current_frame));

        let pose = PoseEstimate {
            current_frame: self.current_frame,
            previous_frame: self.previous_frame,
            initial_frame: self.initial_frame,
            attitude: estimate.attitude,
            delta_attitude: self.previous_frame.attitude().inverse() * self.current_frame.attitude(),
            timestamp_nanos: estimate.timestamp_nanos,
            initial_transformation,
            previous_transformation,
        };
        self.previous_frame = self.current_frame;

        if let Some(listener) = self.listener.as_mut() {
            listener(&pose);
        }
        Ok(Some(pose))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geomagnetic::{FusionConfig, GeomagneticAttitudeEstimator, GeomagneticConfig};
    use crate::sensor::mock::MockSource;
    use crate::sensor::{ned_to_enu, SensorAccuracy, SensorDelay};
    use approx::assert_relative_eq;
    use std::cell::Cell;
    use std::rc::Rc;

    struct CountingNavigator {
        calls: Rc<Cell<usize>>,
        inner: EcefInertialNavigator,
    }

    impl InertialNavigator for CountingNavigator {
        fn navigate(
            &mut self,
            time_interval: f64,
            old: &EcefFrame,
            kinematics: &BodyKinematics,
            result: &mut EcefFrame,
        ) -> Result<()> {
            self.calls.set(self.calls.get() + 1);
            self.inner.navigate(time_interval, old, kinematics, result)
        }
    }

    fn fused(available: bool) -> FusedGeomagneticAttitudeEstimator {
        let (gravity, _) = MockSource::new(available);
        let (magnetometer, _) = MockSource::new(true);
        let (gyro, _) = MockSource::new(true);
        let absolute =
            GeomagneticAttitudeEstimator::new(gravity, magnetometer, GeomagneticConfig::default(), None).unwrap();
        FusedGeomagneticAttitudeEstimator::new(absolute, gyro, SensorDelay::Game, FusionConfig::default())
    }

    fn device(v: Vector3<f64>, ts: i64) -> TriadMeasurement {
        let d = ned_to_enu(&v);
        TriadMeasurement::new(d.x, d.y, d.z, ts, SensorAccuracy::High)
    }

    fn frame_at(position: Vector3<f64>, attitude: UnitQuaternion<f64>) -> EcefFrame {
        EcefFrame::new(
            position,
            Vector3::zeros(),
            CoordinateTransformation::from_rotation(&attitude, FrameType::Body, FrameType::EarthCenteredEarthFixed),
        )
        .unwrap()
    }

    #[test]
    fn test_translation_only_transformation() {
        let attitude = UnitQuaternion::from_euler_angles(0.3, 0.1, -0.4);
        let start = frame_at(Vector3::new(4_789_000.0, 176_000.0, 4_195_000.0), attitude);
        let end = frame_at(start.position + Vector3::new(1.5, -2.0, 0.25), attitude);

        let t = compute_transformation(&start, &end);
        let mapped = t * nalgebra::Point3::from(start.position);
        assert_relative_eq!(mapped.coords, end.position, epsilon = 1e-6);
        assert_relative_eq!(t.rotation.angle(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rotated_transformation_maps_position() {
        let start = frame_at(Vector3::new(6_378_137.0, 0.0, 0.0), UnitQuaternion::identity());
        let end = frame_at(Vector3::new(6_378_140.0, 1.0, -1.0), UnitQuaternion::from_euler_angles(0.0, 0.0, 0.2));
        let t = compute_transformation(&start, &end);
        let mapped = t * nalgebra::Point3::from(start.position);
        assert_relative_eq!(mapped.coords, end.position, epsilon = 1e-6);
    }

    #[test]
    fn test_bootstrap_then_navigate() {
        let calls = Rc::new(Cell::new(0));
        let navigator = CountingNavigator {
            calls: Rc::clone(&calls),
            inner: EcefInertialNavigator::new(),
        };
        let location = GeodeticLocation::from_degrees(41.38, 2.17, 100.0);
        let mut pose = PoseEstimator::with_navigator(fused(true), navigator, location, PoseConfig::default());
        let notified = Rc::new(Cell::new(0));
        let n = Rc::clone(&notified);
        pose.set_listener(Some(Box::new(move |_| n.set(n.get() + 1))));
        assert!(pose.start().unwrap());

        let g = Vector3::new(0.0, 0.0, 9.8);
        let field = Vector3::new(20e-6, 0.0, 40e-6);
        pose.on_magnetometer_measurement(&device(field, 0));
        pose.on_gravity_measurement(&device(-g, 0));
        pose.on_accelerometer_measurement(&device(-g, 0));

        let rate = Vector3::zeros();
        assert!(pose.on_gyroscope_measurement(&device(rate, 0)).unwrap().is_none());
        // First fused attitude bootstraps the reference frame
        assert!(pose.on_gyroscope_measurement(&device(rate, 10_000_000)).unwrap().is_none());
        assert!(pose.is_initialized());
        assert_eq!(calls.get(), 0);
        assert_eq!(notified.get(), 0);

        let estimate = pose.on_gyroscope_measurement(&device(rate, 20_000_000)).unwrap().unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(notified.get(), 1);
        assert!(estimate.initial_transformation.is_some());
        assert!(estimate.previous_transformation.is_some());
        assert_eq!(estimate.previous_frame, *pose.initial_frame().unwrap());

        let initial_position = location.to_ecef_position();
        assert_relative_eq!(estimate.initial_frame.position, initial_position, epsilon = 1e-6);
        // A device at rest barely moves over one step
        assert!((estimate.current_frame.position - initial_position).norm() < 1e-2);
    }

    #[test]
    fn test_start_twice_and_rollback() {
        let location = GeodeticLocation::default();
        let mut pose = PoseEstimator::new(fused(true), location, PoseConfig::default());
        assert!(pose.start().unwrap());
        assert!(matches!(pose.start(), Err(Error::IllegalState(_))));
        assert!(pose.set_location(location).is_err());
        pose.stop();
        pose.stop();
        assert!(!pose.is_running());

        let mut pose = PoseEstimator::new(fused(false), location, PoseConfig::default());
        assert!(!pose.start().unwrap());
        assert!(!pose.is_running());
        assert!(!pose.attitude_estimator().is_running());
    }

    #[test]
    fn test_disabled_transformations() {
        let location = GeodeticLocation::from_degrees(10.0, 20.0, 0.0);
        let config = PoseConfig {
            estimate_initial_transformation: false,
            estimate_previous_transformation: false,
        };
        let mut pose = PoseEstimator::new(fused(true), location, config);
        pose.start().unwrap();

        let g = Vector3::new(0.0, 0.0, 9.8);
        pose.on_magnetometer_measurement(&device(Vector3::new(20e-6, 0.0, 40e-6), 0));
        pose.on_gravity_measurement(&device(-g, 0));
        pose.on_accelerometer_measurement(&device(-g, 0));
        let mut last = None;
        for i in 0..4 {
            last = pose.on_gyroscope_measurement(&device(Vector3::zeros(), i * 10_000_000)).unwrap();
        }
        let estimate = last.unwrap();
        assert!(estimate.initial_transformation.is_none());
        assert!(estimate.previous_transformation.is_none());
    }
}
