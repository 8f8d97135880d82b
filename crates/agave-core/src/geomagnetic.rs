//! Absolute attitude from gravity and magnetometer, and its gyroscope fusion.
//!
//! [`GeomagneticAttitudeEstimator`] combines the leveling tilt with the
//! magnetometer heading on every gravity sample.
//! [`FusedGeomagneticAttitudeEstimator`] propagates that attitude with the
//! gyroscope between absolute updates and rejects absolute outliers.

use crate::attitude::{
    build_estimate, AttitudeEstimate, AttitudeEstimator, AttitudeListener, AttitudeOutputConfig,
    DisplayOrientation, DisplayOrientationProvider,
};
use crate::error::{Error, Result};
use crate::frames::GeodeticLocation;
use crate::gravity::{GravityEstimator, GravityEstimatorConfig};
use crate::gyroscope::{GyroscopeConfig, RelativeGyroscopeAttitudeEstimator};
use crate::leveling::{LevelingEstimator, LevelingModel};
use crate::magnetic::{decimal_year, magnetic_heading, DipoleMagneticModel, WorldMagneticModel};
use crate::sensor::{SensorDelay, SensorSource, TriadMeasurement};
use nalgebra::{UnitQuaternion, Vector3};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Absolute estimator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeomagneticConfig {
    pub gravity: GravityEstimatorConfig,
    pub magnetometer_delay: SensorDelay,
    pub outputs: AttitudeOutputConfig,
    pub use_accurate_leveling: bool,
    pub use_world_magnetic_model: bool,
    /// Decimal year for the magnetic model; current date when `None`.
    pub year: Option<f64>,
}

impl Default for GeomagneticConfig {
    fn default() -> Self {
        Self {
            gravity: GravityEstimatorConfig::default(),
            magnetometer_delay: SensorDelay::Game,
            outputs: AttitudeOutputConfig::default(),
            use_accurate_leveling: false,
            use_world_magnetic_model: false,
            year: None,
        }
    }
}

/// Outputs used for the inner leveling estimator; only its tilt is read.
const TILT_ONLY: AttitudeOutputConfig = AttitudeOutputConfig {
    estimate_euler_angles: false,
    estimate_coordinate_transformation: false,
    ignore_display_orientation: true,
};

pub struct GeomagneticAttitudeEstimator {
    leveling: LevelingEstimator,
    magnetometer: Box<dyn SensorSource>,
    config: GeomagneticConfig,
    location: Option<GeodeticLocation>,
    world_magnetic_model: Option<Box<dyn WorldMagneticModel>>,
    display: Box<dyn DisplayOrientationProvider>,
    running: bool,
    declination: f64,
    magnetic: Option<Vector3<f64>>,
    attitude: UnitQuaternion<f64>,
    listener: Option<AttitudeListener>,
}

impl GeomagneticAttitudeEstimator {
    /// Fails with `IllegalState` when accurate leveling is requested
    /// without a location.
    pub fn new(
        gravity_source: Box<dyn SensorSource>,
        magnetometer: Box<dyn SensorSource>,
        config: GeomagneticConfig,
        location: Option<GeodeticLocation>,
    ) -> Result<Self> {
        if config.use_accurate_leveling && location.is_none() {
            return Err(Error::IllegalState("accurate leveling requires a location"));
        }

        let mut leveling = LevelingEstimator::new(
            GravityEstimator::new(gravity_source, config.gravity),
            leveling_model(config.use_accurate_leveling, location),
        );
        leveling.set_outputs(TILT_ONLY);

        Ok(Self {
            leveling,
            magnetometer,
            config,
            location,
            world_magnetic_model: None,
            display: Box::new(DisplayOrientation::Rotation0),
            running: false,
            declination: 0.0,
            magnetic: None,
            attitude: UnitQuaternion::identity(),
            listener: None,
        })
    }

    pub fn config(&self) -> &GeomagneticConfig {
        &self.config
    }

    pub fn location(&self) -> Option<&GeodeticLocation> {
        self.location.as_ref()
    }

    /// `None` is accepted while stopped; starting then fails if accurate
    /// leveling or the magnetic model needs it.
    pub fn set_location(&mut self, location: Option<GeodeticLocation>) -> Result<()> {
        self.check_stopped()?;
        self.location = location;
        Ok(())
    }

    pub fn set_use_accurate_leveling(&mut self, use_accurate_leveling: bool) -> Result<()> {
        self.check_stopped()?;
        if use_accurate_leveling && self.location.is_none() {
            return Err(Error::IllegalState("accurate leveling requires a location"));
        }
        self.config.use_accurate_leveling = use_accurate_leveling;
        Ok(())
    }

    pub fn set_world_magnetic_model(&mut self, model: Option<Box<dyn WorldMagneticModel>>) -> Result<()> {
        self.check_stopped()?;
        self.world_magnetic_model = model;
        Ok(())
    }

    pub fn set_use_world_magnetic_model(&mut self, use_world_magnetic_model: bool) -> Result<()> {
        self.check_stopped()?;
        self.config.use_world_magnetic_model = use_world_magnetic_model;
        Ok(())
    }

    pub fn set_year(&mut self, year: Option<f64>) -> Result<()> {
        self.check_stopped()?;
        self.config.year = year;
        Ok(())
    }

    pub fn set_outputs(&mut self, outputs: AttitudeOutputConfig) {
        self.config.outputs = outputs;
    }

    pub fn set_display_provider(&mut self, display: Box<dyn DisplayOrientationProvider>) {
        self.display = display;
    }

    pub fn uses_accelerometer(&self) -> bool {
        self.leveling.uses_accelerometer()
    }

    /// Magnetic declination applied to the heading (rad).
    pub fn declination(&self) -> f64 {
        self.declination
    }

    /// Latest body -> NED attitude, without display correction.
    pub fn body_attitude(&self) -> &UnitQuaternion<f64> {
        &self.attitude
    }

    fn check_stopped(&self) -> Result<()> {
        if self.running {
            Err(Error::IllegalState("cannot reconfigure while running"))
        } else {
            Ok(())
        }
    }

    fn resolve_declination(&self) -> Result<f64> {
        if !self.config.use_world_magnetic_model {
            return Ok(0.0);
        }
        let location = self
            .location
            .ok_or(Error::IllegalState("world magnetic model requires a location"))?;
        let year = self
            .config
            .year
            .unwrap_or_else(|| decimal_year(&chrono::Utc::now()));
        let declination = match &self.world_magnetic_model {
            Some(model) => model.declination(&location, year),
            None => DipoleMagneticModel::default().declination(&location, year),
        };
        Ok(declination)
    }

    /// Stores a magnetometer sample (device axes, hard-iron bias removed).
    pub fn on_magnetometer_measurement(&mut self, measurement: &TriadMeasurement) {
        if self.running {
            self.magnetic = Some(measurement.corrected_ned());
        }
    }

    /// Processes a gravity (or accelerometer) sample and publishes the
    /// absolute attitude. Skipped until a magnetometer sample arrived.
    pub fn on_gravity_measurement(&mut self, measurement: &TriadMeasurement) -> Option<AttitudeEstimate> {
        let body_to_ned = self.update(measurement)?;
        let estimate = self.publish(&body_to_ned, measurement.timestamp_nanos);
        if let Some(listener) = self.listener.as_mut() {
            listener(&estimate);
        }
        Some(estimate)
    }

    /// Absolute body -> NED attitude for one gravity sample.
    pub(crate) fn update(&mut self, measurement: &TriadMeasurement) -> Option<UnitQuaternion<f64>> {
        if !self.running {
            return None;
        }
        self.leveling.on_measurement(measurement)?;
        let magnetic = self.magnetic?;

        let tilt = *self.leveling.tilt();
        let (roll, pitch, _) = tilt.euler_angles();
        let yaw = magnetic_heading(&tilt, &magnetic) + self.declination;

        let mut attitude = UnitQuaternion::from_euler_angles(roll, pitch, yaw);
        attitude.renormalize();
        self.attitude = attitude;
        Some(attitude)
    }

    /// Applies the display correction and derives the configured outputs.
    pub(crate) fn publish(&self, body_to_ned: &UnitQuaternion<f64>, timestamp_nanos: i64) -> AttitudeEstimate {
        let mut corrected = *body_to_ned;
        if !self.config.outputs.ignore_display_orientation {
            corrected *= self.display.display_orientation().correction();
        }
        corrected.renormalize();
        let mut published = corrected.inverse();
        published.renormalize();

        // Transformation is derived only alongside the Euler angles
        let mut outputs = self.config.outputs;
        outputs.estimate_coordinate_transformation &= outputs.estimate_euler_angles;
        build_estimate(published, timestamp_nanos, &outputs, true)
    }
}

fn leveling_model(use_accurate: bool, location: Option<GeodeticLocation>) -> LevelingModel {
    match location {
        Some(location) if use_accurate => LevelingModel::Accurate(location),
        _ => LevelingModel::Standard,
    }
}

impl AttitudeEstimator for GeomagneticAttitudeEstimator {
    fn start(&mut self) -> Result<bool> {
        self.check_stopped()?;
        if self.config.use_accurate_leveling && self.location.is_none() {
            return Err(Error::IllegalState("accurate leveling requires a location"));
        }
        self.declination = self.resolve_declination()?;
        self.leveling
            .set_model(leveling_model(self.config.use_accurate_leveling, self.location))?;
        self.magnetic = None;
        self.attitude = UnitQuaternion::identity();

        if !self.leveling.start()? {
            debug!("leveling failed to start, rolling back");
            self.stop();
            return Ok(false);
        }
        if !self.magnetometer.start(self.config.magnetometer_delay) {
            debug!("magnetometer unavailable, rolling back");
            self.stop();
            return Ok(false);
        }

        self.running = true;
        debug!(declination = self.declination, "geomagnetic estimator started");
        Ok(true)
    }

    fn stop(&mut self) {
        self.leveling.stop();
        self.magnetometer.stop();
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn set_listener(&mut self, listener: Option<AttitudeListener>) {
        self.listener = listener;
    }
}

// ---------------------------------------------------------------------------
// Fused estimator
// ---------------------------------------------------------------------------

/// Outlier handling for absolute corrections.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionConfig {
    /// Minimum agreement for an absolute sample to be blended in.
    pub outlier_threshold: f64,
    /// Agreement below this counts towards a reset.
    pub outlier_panic_threshold: f64,
    pub panic_counter_threshold: usize,
    /// Slerp weight of an accepted absolute sample.
    pub interpolation_value: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            outlier_threshold: 0.85,
            outlier_panic_threshold: 0.65,
            panic_counter_threshold: 60,
            interpolation_value: 0.01,
        }
    }
}

/// Outcome of feeding one absolute attitude into the fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    Initialized,
    Blended,
    Outlier,
    Panic,
    Reset,
}

pub struct FusedGeomagneticAttitudeEstimator {
    absolute: GeomagneticAttitudeEstimator,
    gyroscope: RelativeGyroscopeAttitudeEstimator,
    fusion: FusionConfig,
    running: bool,
    fused: Option<UnitQuaternion<f64>>,
    panic_counter: usize,
    listener: Option<AttitudeListener>,
}

impl FusedGeomagneticAttitudeEstimator {
    pub fn new(
        absolute: GeomagneticAttitudeEstimator,
        gyroscope_source: Box<dyn SensorSource>,
        gyroscope_delay: SensorDelay,
        fusion: FusionConfig,
    ) -> Self {
        let config = GyroscopeConfig {
            sensor_delay: gyroscope_delay,
            outputs: TILT_ONLY,
        };
        Self {
            absolute,
            gyroscope: RelativeGyroscopeAttitudeEstimator::new(gyroscope_source, config),
            fusion,
            running: false,
            fused: None,
            panic_counter: 0,
            listener: None,
        }
    }

    pub fn absolute(&self) -> &GeomagneticAttitudeEstimator {
        &self.absolute
    }

    pub fn fusion_config(&self) -> &FusionConfig {
        &self.fusion
    }

    pub fn set_fusion_config(&mut self, fusion: FusionConfig) -> Result<()> {
        self.check_stopped()?;
        self.fusion = fusion;
        Ok(())
    }

    pub fn set_location(&mut self, location: Option<GeodeticLocation>) -> Result<()> {
        self.check_stopped()?;
        self.absolute.set_location(location)
    }

    pub fn set_use_accurate_leveling(&mut self, use_accurate_leveling: bool) -> Result<()> {
        self.check_stopped()?;
        self.absolute.set_use_accurate_leveling(use_accurate_leveling)
    }

    pub fn set_world_magnetic_model(&mut self, model: Option<Box<dyn WorldMagneticModel>>) -> Result<()> {
        self.check_stopped()?;
        self.absolute.set_world_magnetic_model(model)
    }

    pub fn set_use_world_magnetic_model(&mut self, use_world_magnetic_model: bool) -> Result<()> {
        self.check_stopped()?;
        self.absolute.set_use_world_magnetic_model(use_world_magnetic_model)
    }

    pub fn set_outputs(&mut self, outputs: AttitudeOutputConfig) {
        self.absolute.set_outputs(outputs);
    }

    pub fn set_display_provider(&mut self, display: Box<dyn DisplayOrientationProvider>) {
        self.absolute.set_display_provider(display);
    }

    pub fn uses_accelerometer(&self) -> bool {
        self.absolute.uses_accelerometer()
    }

    /// Mean gyroscope sample spacing (s).
    pub fn average_time_interval(&self) -> f64 {
        self.gyroscope.average_time_interval()
    }

    /// Fused body -> NED attitude, `None` before the first absolute sample.
    pub fn body_attitude(&self) -> Option<&UnitQuaternion<f64>> {
        self.fused.as_ref()
    }

    pub fn panic_counter(&self) -> usize {
        self.panic_counter
    }

    fn check_stopped(&self) -> Result<()> {
        if self.running {
            Err(Error::IllegalState("cannot reconfigure while running"))
        } else {
            Ok(())
        }
    }

    pub fn on_magnetometer_measurement(&mut self, measurement: &TriadMeasurement) {
        self.absolute.on_magnetometer_measurement(measurement);
    }

    /// Corrects the fused attitude with an absolute sample. Nothing is
    /// published; estimates are emitted on gyroscope samples.
    pub fn on_gravity_measurement(&mut self, measurement: &TriadMeasurement) -> Option<Correction> {
        if !self.running {
            return None;
        }
        let absolute = self.absolute.update(measurement)?;
        Some(self.correct(absolute))
    }

    /// Propagates the fused attitude and publishes it.
    pub fn on_gyroscope_measurement(&mut self, measurement: &TriadMeasurement) -> Option<AttitudeEstimate> {
        if !self.running {
            return None;
        }
        self.gyroscope.on_measurement(measurement)?;
        let fused = self.fused.as_mut()?;
        *fused *= *self.gyroscope.delta_attitude();
        fused.renormalize();
        let fused = *fused;

        let estimate = self.absolute.publish(&fused, measurement.timestamp_nanos);
        if let Some(listener) = self.listener.as_mut() {
            listener(&estimate);
        }
        Some(estimate)
    }

    fn correct(&mut self, absolute: UnitQuaternion<f64>) -> Correction {
        let Some(predicted) = self.fused else {
            self.fused = Some(absolute);
            self.panic_counter = 0;
            return Correction::Initialized;
        };

        let agreement = predicted.coords.dot(&absolute.coords).abs();
        if agreement >= self.fusion.outlier_threshold {
            let blended = predicted
                .try_slerp(&absolute, self.fusion.interpolation_value, 1e-9)
                .unwrap_or(absolute);
            self.fused = Some(blended);
            self.panic_counter = 0;
            Correction::Blended
        } else if agreement >= self.fusion.outlier_panic_threshold {
            Correction::Outlier
        } else {
            self.panic_counter += 1;
            if self.panic_counter >= self.fusion.panic_counter_threshold {
                warn!(panics = self.panic_counter, "fused attitude diverged, resetting to absolute");
                self.fused = Some(absolute);
                self.panic_counter = 0;
                Correction::Reset
            } else {
                Correction::Panic
            }
        }
    }
}

impl AttitudeEstimator for FusedGeomagneticAttitudeEstimator {
    fn start(&mut self) -> Result<bool> {
        self.check_stopped()?;
        self.fused = None;
        self.panic_counter = 0;

        if !self.absolute.start()? {
            self.stop();
            return Ok(false);
        }
        if !self.gyroscope.start()? {
            debug!("gyroscope failed to start, rolling back");
            self.stop();
            return Ok(false);
        }
        self.running = true;
        Ok(true)
    }

    fn stop(&mut self) {
        self.absolute.stop();
        self.gyroscope.stop();
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn set_listener(&mut self, listener: Option<AttitudeListener>) {
        self.listener = listener;
    }
}
