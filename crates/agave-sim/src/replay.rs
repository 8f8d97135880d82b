//! Replays synthetic sensor data through the estimators.
//!
//! Samples are pushed in timestamp order, the way a sensor framework would
//! deliver them on one callback thread, and only to sensors the estimator
//! under test has started.

use crate::motion::{simulate_motion, Trajectory};
use crate::scenario::Scenario;
use crate::sensor::{generate_sensor_data, SensorData};
use agave_core::attitude::{AttitudeEstimator, AttitudeOutputConfig};
use agave_core::frames::ned_to_ecef_matrix;
use agave_core::geomagnetic::{Correction, FusedGeomagneticAttitudeEstimator, FusionConfig, GeomagneticAttitudeEstimator, GeomagneticConfig};
use agave_core::gravity::{expected_gravity_norm, GravityEstimatorConfig, GravityNormConfig, GravityNormEstimator};
use agave_core::pose::{PoseConfig, PoseEstimator};
use agave_core::sensor::{SensorDelay, SensorSource, SensorType, TriadMeasurement};
use nalgebra::{UnitQuaternion, Vector3};
use rand_distr::NormalError;
use serde::Serialize;
use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("invalid sensor noise: {0}")]
    Noise(#[from] NormalError),
    #[error(transparent)]
    Estimator(#[from] agave_core::Error),
    #[error("estimator failed to start its sensors")]
    StartFailed,
}

// ---------------------------------------------------------------------------
// Scripted sources
// ---------------------------------------------------------------------------

/// A [`SensorSource`] whose samples come from a pre-generated stream.
pub struct ScriptedSource {
    kind: SensorType,
    available: bool,
    active: Rc<Cell<bool>>,
}

impl SensorSource for ScriptedSource {
    fn start(&mut self, delay: SensorDelay) -> bool {
        debug!(kind = ?self.kind, period_us = delay.nominal_period_micros(), available = self.available, "sensor start");
        self.active.set(self.available);
        self.available
    }

    fn stop(&mut self) {
        self.active.set(false);
    }
}

/// Tracks which scripted sensors are currently started.
#[derive(Default)]
pub struct ScriptedSensors {
    active: HashMap<SensorType, Rc<Cell<bool>>>,
    unavailable: Vec<SensorType>,
}

impl ScriptedSensors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `kind` as missing on the simulated device.
    pub fn without(mut self, kind: SensorType) -> Self {
        self.unavailable.push(kind);
        self
    }

    pub fn source(&mut self, kind: SensorType) -> Box<ScriptedSource> {
        let active = Rc::clone(self.active.entry(kind).or_default());
        Box::new(ScriptedSource {
            kind,
            available: !self.unavailable.contains(&kind),
            active,
        })
    }

    pub fn is_active(&self, kind: SensorType) -> bool {
        self.active.get(&kind).is_some_and(|a| a.get())
    }
}

// ---------------------------------------------------------------------------
// Event ordering
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct SensorEvent<'a> {
    pub kind: SensorType,
    /// Trajectory step the sample belongs to
    pub step: usize,
    pub measurement: &'a TriadMeasurement,
}

/// All samples merged by timestamp. Within one timestamp the magnetometer
/// comes first, then accelerometer and gravity, then the gyroscope.
pub fn merged_events(data: &SensorData) -> Vec<SensorEvent<'_>> {
    let streams = [
        (SensorType::Magnetometer, &data.magnetometer),
        (SensorType::Accelerometer, &data.accelerometer),
        (SensorType::Gravity, &data.gravity),
        (SensorType::Gyroscope, &data.gyroscope),
    ];
    let mut events: Vec<SensorEvent<'_>> = Vec::with_capacity(streams.iter().map(|(_, s)| s.len()).sum());
    for step in 0..data.time.len() {
        for &(kind, stream) in &streams {
            if let Some(measurement) = stream.get(step) {
                events.push(SensorEvent { kind, step, measurement });
            }
        }
    }
    // Stable: keeps the per-timestamp order above
    events.sort_by_key(|e| e.measurement.timestamp_nanos);
    events
}

fn gravity_kind(use_accelerometer: bool) -> SensorType {
    if use_accelerometer {
        SensorType::Accelerometer
    } else {
        SensorType::Gravity
    }
}

fn prepare(scenario: &Scenario) -> Result<(Trajectory, SensorData), ReplayError> {
    let traj = simulate_motion(&scenario.motion);
    let data = generate_sensor_data(&traj, &scenario.sensors, &scenario.magnetic_field())?;
    debug!(samples = traj.len(), scenario = %scenario.name, "sensor data generated");
    Ok((traj, data))
}

fn fused_estimator(
    scenario: &Scenario,
    sensors: &mut ScriptedSensors,
) -> Result<FusedGeomagneticAttitudeEstimator, ReplayError> {
    let settings = &scenario.estimator;
    let config = GeomagneticConfig {
        gravity: GravityEstimatorConfig {
            use_accelerometer: settings.use_accelerometer,
            ..Default::default()
        },
        use_accurate_leveling: settings.use_accurate_leveling,
        use_world_magnetic_model: settings.use_world_magnetic_model,
        year: Some(scenario.year),
        outputs: AttitudeOutputConfig {
            ignore_display_orientation: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let absolute = GeomagneticAttitudeEstimator::new(
        sensors.source(gravity_kind(settings.use_accelerometer)),
        sensors.source(SensorType::Magnetometer),
        config,
        Some(scenario.motion.location()),
    )?;
    let fusion = FusionConfig {
        outlier_threshold: settings.outlier_threshold,
        outlier_panic_threshold: settings.outlier_panic_threshold,
        panic_counter_threshold: settings.panic_counter_threshold,
        interpolation_value: settings.interpolation_value,
    };
    Ok(FusedGeomagneticAttitudeEstimator::new(
        absolute,
        sensors.source(SensorType::Gyroscope),
        SensorDelay::Game,
        fusion,
    ))
}

// ---------------------------------------------------------------------------
// Attitude
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct AttitudeRow {
    pub time_s: f64,
    pub roll_deg: f64,
    pub pitch_deg: f64,
    pub yaw_deg: f64,
    pub true_roll_deg: f64,
    pub true_pitch_deg: f64,
    pub true_yaw_deg: f64,
    /// Rotation angle between estimate and reference
    pub error_deg: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CorrectionCounts {
    pub initialized: usize,
    pub blended: usize,
    pub outliers: usize,
    pub panics: usize,
    pub resets: usize,
}

impl CorrectionCounts {
    fn record(&mut self, correction: Correction) {
        match correction {
            Correction::Initialized => self.initialized += 1,
            Correction::Blended => self.blended += 1,
            Correction::Outlier => self.outliers += 1,
            Correction::Panic => self.panics += 1,
            Correction::Reset => self.resets += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AttitudeReport {
    pub scenario: String,
    /// Declination applied to the truth when the estimator reports magnetic yaw
    pub reference_declination_deg: f64,
    pub rms_error_deg: f64,
    pub max_error_deg: f64,
    pub final_error_deg: f64,
    pub corrections: CorrectionCounts,
    pub rows: Vec<AttitudeRow>,
}

fn euler_deg(q: &UnitQuaternion<f64>) -> (f64, f64, f64) {
    let (r, p, y) = q.euler_angles();
    (r.to_degrees(), p.to_degrees(), y.to_degrees())
}

/// Runs the fused geomagnetic estimator over the scenario.
pub fn run_attitude(scenario: &Scenario) -> Result<AttitudeReport, ReplayError> {
    let (traj, data) = prepare(scenario)?;
    let mut sensors = ScriptedSensors::new();
    let mut estimator = fused_estimator(scenario, &mut sensors)?;
    if !estimator.start()? {
        return Err(ReplayError::StartFailed);
    }

    // Without the magnetic model yaw is relative to magnetic north
    let declination = if scenario.estimator.use_world_magnetic_model {
        0.0
    } else {
        scenario.declination()
    };
    let reference_rotation = UnitQuaternion::from_euler_angles(0.0, 0.0, -declination);

    let gravity = gravity_kind(estimator.uses_accelerometer());
    let mut corrections = CorrectionCounts::default();
    let mut rows = Vec::with_capacity(traj.len());

    for event in merged_events(&data) {
        if !sensors.is_active(event.kind) {
            continue;
        }
        match event.kind {
            SensorType::Magnetometer => estimator.on_magnetometer_measurement(event.measurement),
            SensorType::Gyroscope => {
                let Some(estimate) = estimator.on_gyroscope_measurement(event.measurement) else {
                    continue;
                };
                let reference = reference_rotation * traj.attitude[event.step];
                let estimated = estimate.body_to_ned();
                let (roll_deg, pitch_deg, yaw_deg) = euler_deg(&estimated);
                let (true_roll_deg, true_pitch_deg, true_yaw_deg) = euler_deg(&reference);
                rows.push(AttitudeRow {
                    time_s: traj.time[event.step],
                    roll_deg,
                    pitch_deg,
                    yaw_deg,
                    true_roll_deg,
                    true_pitch_deg,
                    true_yaw_deg,
                    error_deg: estimated.angle_to(&reference).to_degrees(),
                });
            }
            kind if kind == gravity => {
                if let Some(correction) = estimator.on_gravity_measurement(event.measurement) {
                    corrections.record(correction);
                }
            }
            _ => {}
        }
    }
    estimator.stop();

    let errors: Vec<f64> = rows.iter().map(|r| r.error_deg).collect();
    let report = AttitudeReport {
        scenario: scenario.name.clone(),
        reference_declination_deg: declination.to_degrees(),
        rms_error_deg: rms(&errors),
        max_error_deg: errors.iter().copied().fold(0.0, f64::max),
        final_error_deg: errors.last().copied().unwrap_or(0.0),
        corrections,
        rows,
    };
    info!(
        rms_deg = report.rms_error_deg,
        max_deg = report.max_error_deg,
        samples = report.rows.len(),
        "attitude replay finished"
    );
    Ok(report)
}

fn rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
}

// ---------------------------------------------------------------------------
// Pose
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PoseRow {
    pub time_s: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
    pub true_x: f64,
    pub true_y: f64,
    pub true_z: f64,
    pub position_error_m: f64,
    /// Translation of the initial -> current transformation
    pub displacement_m: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoseReport {
    pub scenario: String,
    pub final_position_error_m: f64,
    pub max_position_error_m: f64,
    pub rows: Vec<PoseRow>,
}

/// Runs the pose estimator over the scenario. The host feeds accelerometer
/// samples for the body kinematics whenever the estimator runs.
pub fn run_pose(scenario: &Scenario) -> Result<PoseReport, ReplayError> {
    let (traj, data) = prepare(scenario)?;
    let mut sensors = ScriptedSensors::new();
    let fused = fused_estimator(scenario, &mut sensors)?;
    let location = scenario.motion.location();
    let mut pose = PoseEstimator::new(fused, location, PoseConfig::default());
    if !pose.start()? {
        return Err(ReplayError::StartFailed);
    }

    let origin = location.to_ecef_position();
    let c_ned_to_ecef = ned_to_ecef_matrix(location.latitude, location.longitude);
    let mut rows = Vec::with_capacity(traj.len());

    for event in merged_events(&data) {
        let m = event.measurement;
        match event.kind {
            SensorType::Accelerometer => pose.on_accelerometer_measurement(m),
            kind if !sensors.is_active(kind) => {}
            SensorType::Gravity => pose.on_gravity_measurement(m),
            SensorType::Magnetometer => pose.on_magnetometer_measurement(m),
            SensorType::Gyroscope => {
                let Some(estimate) = pose.on_gyroscope_measurement(m)? else {
                    continue;
                };
                let frame = &estimate.current_frame;
                let truth: Vector3<f64> = origin + c_ned_to_ecef * traj.position_ned[event.step];
                rows.push(PoseRow {
                    time_s: traj.time[event.step],
                    x: frame.position.x,
                    y: frame.position.y,
                    z: frame.position.z,
                    vx: frame.velocity.x,
                    vy: frame.velocity.y,
                    vz: frame.velocity.z,
                    true_x: truth.x,
                    true_y: truth.y,
                    true_z: truth.z,
                    position_error_m: (frame.position - truth).norm(),
                    displacement_m: estimate
                        .initial_transformation
                        .map_or(0.0, |t| t.translation.vector.norm()),
                });
            }
        }
    }
    pose.stop();

    let report = PoseReport {
        scenario: scenario.name.clone(),
        final_position_error_m: rows.last().map_or(0.0, |r| r.position_error_m),
        max_position_error_m: rows.iter().map(|r| r.position_error_m).fold(0.0, f64::max),
        rows,
    };
    info!(
        final_error_m = report.final_position_error_m,
        samples = report.rows.len(),
        "pose replay finished"
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// Gravity norm
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct GravityNormReport {
    pub scenario: String,
    pub completed: bool,
    pub expected_gravity_norm: f64,
    pub average_gravity_norm: f64,
    pub gravity_norm_standard_deviation: f64,
    pub gravity_psd: f64,
    pub gravity_root_psd: f64,
    pub average_time_interval: f64,
    pub time_interval_standard_deviation: f64,
    pub elapsed_time_seconds: f64,
    pub num_measurements: usize,
    pub unreliable: bool,
}

/// Runs the gravity norm estimator until its stop condition or the end of
/// the data, whichever comes first.
pub fn run_gravity_norm(scenario: &Scenario) -> Result<GravityNormReport, ReplayError> {
    let (_, data) = prepare(scenario)?;
    let settings = &scenario.gravity_norm;
    let use_accelerometer = scenario.estimator.use_accelerometer;
    let kind = gravity_kind(use_accelerometer);

    let mut sensors = ScriptedSensors::new();
    let config = GravityNormConfig {
        max_samples: settings.max_samples,
        max_duration_millis: settings.max_duration_ms,
        stop_mode: settings.stop_mode.into(),
        gravity: GravityEstimatorConfig {
            use_accelerometer,
            ..Default::default()
        },
    };
    let mut estimator = GravityNormEstimator::new(sensors.source(kind), config)?;
    if !estimator.start()? {
        return Err(ReplayError::StartFailed);
    }

    let mut frozen = None;
    for event in merged_events(&data) {
        if event.kind != kind || !sensors.is_active(kind) {
            continue;
        }
        if let Some(result) = estimator.on_measurement(event.measurement) {
            frozen = Some(result);
            break;
        }
    }
    estimator.stop();

    let expected = expected_gravity_norm(&scenario.motion.location());
    let report = match frozen {
        Some(r) => GravityNormReport {
            scenario: scenario.name.clone(),
            completed: true,
            expected_gravity_norm: expected,
            average_gravity_norm: r.average_gravity_norm,
            gravity_norm_standard_deviation: r.gravity_norm_standard_deviation,
            gravity_psd: r.gravity_psd,
            gravity_root_psd: r.gravity_root_psd,
            average_time_interval: r.average_time_interval,
            time_interval_standard_deviation: r.time_interval_standard_deviation,
            elapsed_time_seconds: r.elapsed_time_seconds,
            num_measurements: r.num_measurements,
            unreliable: r.unreliable,
        },
        // Ran out of samples before the stop condition
        None => GravityNormReport {
            scenario: scenario.name.clone(),
            completed: false,
            expected_gravity_norm: expected,
            average_gravity_norm: estimator.average_gravity_norm(),
            gravity_norm_standard_deviation: estimator.gravity_norm_variance().sqrt(),
            gravity_psd: 0.0,
            gravity_root_psd: 0.0,
            average_time_interval: 0.0,
            time_interval_standard_deviation: 0.0,
            elapsed_time_seconds: estimator.elapsed_time_nanos() as f64 * 1e-9,
            num_measurements: estimator.num_measurements(),
            unreliable: estimator.is_unreliable(),
        },
    };
    Ok(report)
}
