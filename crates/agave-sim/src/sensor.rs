use crate::motion::Trajectory;
use agave_core::sensor::{ned_to_enu, SensorAccuracy, TriadMeasurement};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, NormalError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub noise_scale: f64,
    pub accel_noise_std: f64,   // m/s^2
    pub gyro_noise_std: f64,    // rad/s
    pub mag_noise_std: f64,     // T
    pub gravity_noise_std: f64, // m/s^2

    // Static biases in body NED axes
    pub accel_bias: [f64; 3],
    pub gyro_bias: [f64; 3],
    /// Hard-iron offset, reported with every magnetometer sample
    pub hard_iron: [f64; 3],

    pub seed: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            noise_scale: 1.0,
            accel_noise_std: 0.02,
            gyro_noise_std: 0.002,
            mag_noise_std: 0.2e-6,
            gravity_noise_std: 0.005,
            accel_bias: [0.0; 3],
            gyro_bias: [0.0; 3],
            hard_iron: [12e-6, -4e-6, 7e-6],
            seed: 42,
        }
    }
}

/// Samples in device axes, one per trajectory step and sensor.
#[derive(Debug, Clone, Default)]
pub struct SensorData {
    pub time: Vec<f64>,
    pub accelerometer: Vec<TriadMeasurement>,
    pub gyroscope: Vec<TriadMeasurement>,
    pub magnetometer: Vec<TriadMeasurement>,
    pub gravity: Vec<TriadMeasurement>,
}

fn noisy<R: rand::Rng>(v: &Vector3<f64>, d: &Normal<f64>, rng: &mut R) -> Vector3<f64> {
    Vector3::new(
        v.x + d.sample(rng),
        v.y + d.sample(rng),
        v.z + d.sample(rng),
    )
}

fn device_sample(ned: &Vector3<f64>, timestamp_nanos: i64) -> TriadMeasurement {
    let d = ned_to_enu(ned);
    TriadMeasurement::new(d.x, d.y, d.z, timestamp_nanos, SensorAccuracy::High)
}

/// Synthesises noisy sensor samples along `traj` for a magnetic field
/// `field_ned` (T). Fails on a negative or non-finite noise deviation.
pub fn generate_sensor_data(
    traj: &Trajectory,
    cfg: &SensorConfig,
    field_ned: &Vector3<f64>,
) -> Result<SensorData, NormalError> {
    let mut rng = StdRng::seed_from_u64(cfg.seed);

    let n = traj.len();
    let mut data = SensorData {
        time: traj.time.clone(),
        accelerometer: Vec::with_capacity(n),
        gyroscope: Vec::with_capacity(n),
        magnetometer: Vec::with_capacity(n),
        gravity: Vec::with_capacity(n),
    };

    // Distributions
    let d_accel = Normal::new(0.0, cfg.noise_scale * cfg.accel_noise_std)?;
    let d_gyro = Normal::new(0.0, cfg.noise_scale * cfg.gyro_noise_std)?;
    let d_mag = Normal::new(0.0, cfg.noise_scale * cfg.mag_noise_std)?;
    let d_gravity = Normal::new(0.0, cfg.noise_scale * cfg.gravity_noise_std)?;

    let accel_bias = Vector3::from(cfg.accel_bias);
    let gyro_bias = Vector3::from(cfg.gyro_bias);
    let hard_iron = Vector3::from(cfg.hard_iron);
    let hard_iron_device = ned_to_enu(&hard_iron);

    for i in 0..n {
        let ts = (traj.time[i] * 1e9).round() as i64;

        // 1. Accelerometer
        let f = noisy(&(traj.specific_force_body[i] + accel_bias), &d_accel, &mut rng);
        data.accelerometer.push(device_sample(&f, ts));

        // 2. Gyroscope
        let w = noisy(&(traj.angular_rate_body[i] + gyro_bias), &d_gyro, &mut rng);
        data.gyroscope.push(device_sample(&w, ts));

        // 3. Magnetometer, uncalibrated: the hard-iron estimate rides along
        let m_body = traj.attitude[i].inverse_transform_vector(field_ned);
        let m = noisy(&(m_body + hard_iron), &d_mag, &mut rng);
        data.magnetometer.push(
            device_sample(&m, ts).with_bias(hard_iron_device.x, hard_iron_device.y, hard_iron_device.z),
        );

        // 4. Gravity sensor reads the reaction to gravity like an accelerometer
        let g = noisy(&-traj.gravity_body[i], &d_gravity, &mut rng);
        data.gravity.push(device_sample(&g, ts));
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::{simulate_motion, MotionParams};
    use approx::assert_relative_eq;

    #[test]
    fn test_same_seed_same_data() {
        let traj = simulate_motion(&MotionParams {
            duration_s: 1.0,
            ..Default::default()
        });
        let field = Vector3::new(25e-6, 0.0, 40e-6);
        let a = generate_sensor_data(&traj, &SensorConfig::default(), &field).unwrap();
        let b = generate_sensor_data(&traj, &SensorConfig::default(), &field).unwrap();
        assert_eq!(a.gyroscope, b.gyroscope);
        assert_eq!(a.accelerometer.len(), traj.len());
    }

    #[test]
    fn test_noise_free_samples_match_truth() {
        let traj = simulate_motion(&MotionParams {
            duration_s: 0.5,
            ..Default::default()
        });
        let cfg = SensorConfig {
            noise_scale: 0.0,
            ..Default::default()
        };
        let field = Vector3::new(25e-6, 1e-6, 40e-6);
        let data = generate_sensor_data(&traj, &cfg, &field).unwrap();

        let i = 10;
        assert_relative_eq!(data.accelerometer[i].corrected_ned(), traj.specific_force_body[i], epsilon = 1e-12);
        assert_relative_eq!(data.gravity[i].corrected_ned(), -traj.gravity_body[i], epsilon = 1e-12);
        let m = traj.attitude[i].inverse_transform_vector(&field);
        assert_relative_eq!(data.magnetometer[i].corrected_ned(), m, epsilon = 1e-15);
        assert_eq!(data.gyroscope[i].timestamp_nanos, 200_000_000);
    }
}
