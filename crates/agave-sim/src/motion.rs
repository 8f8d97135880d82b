use agave_core::earth::ned_gravity;
use agave_core::frames::GeodeticLocation;
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionParams {
    // Start location
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub height_m: f64,

    /// [roll, pitch, yaw] of the body -> NED attitude at t = 0 (°)
    pub initial_euler_deg: [f64; 3],
    /// Constant body angular rate (°/s)
    pub angular_rate_dps: [f64; 3],
    /// Constant kinematic acceleration in local NED (m/s²)
    pub acceleration_ned: [f64; 3],

    pub duration_s: f64,
    pub sample_rate_hz: f64,
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            latitude_deg: 41.3851,
            longitude_deg: 2.1734,
            height_m: 12.0,
            initial_euler_deg: [5.0, -3.0, 30.0],
            angular_rate_dps: [0.0, 0.0, 3.0],
            acceleration_ned: [0.0, 0.0, 0.0],
            duration_s: 10.0,
            sample_rate_hz: 50.0,
        }
    }
}

impl MotionParams {
    pub fn location(&self) -> GeodeticLocation {
        GeodeticLocation::from_degrees(self.latitude_deg, self.longitude_deg, self.height_m)
    }

    pub fn initial_attitude(&self) -> UnitQuaternion<f64> {
        let [roll, pitch, yaw] = self.initial_euler_deg.map(f64::to_radians);
        UnitQuaternion::from_euler_angles(roll, pitch, yaw)
    }

    pub fn time_step(&self) -> f64 {
        1.0 / self.sample_rate_hz
    }
}

// ---------------------------------------------------------------------------
// Truth
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Default)]
pub struct Trajectory {
    pub time: Vec<f64>,
    /// Displacement from the start point (local NED, m)
    pub position_ned: Vec<Vector3<f64>>,
    pub velocity_ned: Vec<Vector3<f64>>,
    /// Body -> NED
    pub attitude: Vec<UnitQuaternion<f64>>,
    /// What a gyroscope sees (body NED axes)
    pub angular_rate_body: Vec<Vector3<f64>>,
    /// What an accelerometer sees (body NED axes)
    pub specific_force_body: Vec<Vector3<f64>>,
    /// Gravity in body NED axes
    pub gravity_body: Vec<Vector3<f64>>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}

/// Propagates a constant-rate, constant-acceleration motion over a flat
/// local tangent plane.
pub fn simulate_motion(p: &MotionParams) -> Trajectory {
    let dt = p.time_step();
    let steps = (p.duration_s * p.sample_rate_hz).round().max(0.0) as usize + 1;

    let location = p.location();
    let gravity_ned = ned_gravity(location.latitude, location.height);
    let rate = Vector3::from(p.angular_rate_dps.map(f64::to_radians));
    let accel = Vector3::from(p.acceleration_ned);
    let dq = UnitQuaternion::from_scaled_axis(rate * dt);

    let mut res = Trajectory {
        time: Vec::with_capacity(steps),
        position_ned: Vec::with_capacity(steps),
        velocity_ned: Vec::with_capacity(steps),
        attitude: Vec::with_capacity(steps),
        angular_rate_body: Vec::with_capacity(steps),
        specific_force_body: Vec::with_capacity(steps),
        gravity_body: Vec::with_capacity(steps),
    };

    let mut att = p.initial_attitude();
    for i in 0..steps {
        let t = i as f64 * dt;
        res.time.push(t);
        res.position_ned.push(accel * (0.5 * t * t));
        res.velocity_ned.push(accel * t);
        res.attitude.push(att);
        res.angular_rate_body.push(rate);

        // Accelerometers sense everything but gravity
        res.specific_force_body
            .push(att.inverse_transform_vector(&(accel - gravity_ned)));
        res.gravity_body.push(att.inverse_transform_vector(&gravity_ned));

        // Body-frame update
        att *= dq;
    }

    res
}
