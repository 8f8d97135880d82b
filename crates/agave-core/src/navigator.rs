//! Strapdown inertial navigation in ECEF axes.
//!
//! Two mechanizations of the same equations are provided:
//! - [`EcefInertialNavigator`] builds the attitude increment with the
//!   Rodrigues formula on rotation matrices,
//! - [`QuaternionEcefNavigator`] composes unit quaternions instead.
//!
//! Both produce the same frame to floating-point tolerance and are
//! interchangeable behind [`InertialNavigator`].

use crate::earth::{earth_rotation_rate_ecef, ecef_gravity, skew_symmetric, EARTH_ROTATION_RATE};
use crate::error::{Error, Result};
use crate::frames::{BodyKinematics, CoordinateTransformation, EcefFrame, FrameType};
use nalgebra::{Matrix3, UnitQuaternion, Vector3};

type Vector3r = Vector3<f64>;
type Matrix3r = Matrix3<f64>;

/// Below this rotation angle (rad) the first-order attitude update is used.
pub const ALPHA_THRESHOLD: f64 = 1e-8;

/// Advances an ECEF frame by one time step of body kinematics.
pub trait InertialNavigator {
    /// Writes the propagated frame into `result`.
    ///
    /// Fails when `time_interval` is not a positive finite number or when
    /// `old` does not carry a Body -> ECEF transformation. `result` is left
    /// untouched on failure.
    fn navigate(
        &mut self,
        time_interval: f64,
        old: &EcefFrame,
        kinematics: &BodyKinematics,
        result: &mut EcefFrame,
    ) -> Result<()>;
}

fn check_inputs(time_interval: f64, old: &EcefFrame) -> Result<()> {
    if !time_interval.is_finite() || time_interval <= 0.0 {
        return Err(Error::InvalidTimeInterval(time_interval));
    }
    old.check_transformation()
}

/// Velocity and position update shared by both mechanizations.
fn update_velocity_position(
    time_interval: f64,
    old: &EcefFrame,
    specific_force_ecef: &Vector3r,
) -> (Vector3r, Vector3r) {
    let omega_ie = skew_symmetric(&earth_rotation_rate_ecef());
    let velocity = old.velocity
        + time_interval
            * (specific_force_ecef + ecef_gravity(&old.position) - 2.0 * omega_ie * old.velocity);
    let position = old.position + (velocity + old.velocity) * 0.5 * time_interval;
    (velocity, position)
}

// ---------------------------------------------------------------------------
// Rotation matrix mechanization
// ---------------------------------------------------------------------------

/// Reference mechanization on rotation matrices.
#[derive(Debug, Clone, Copy, Default)]
pub struct EcefInertialNavigator;

impl EcefInertialNavigator {
    pub fn new() -> Self {
        Self
    }
}

impl InertialNavigator for EcefInertialNavigator {
    fn navigate(
        &mut self,
        time_interval: f64,
        old: &EcefFrame,
        kinematics: &BodyKinematics,
        result: &mut EcefFrame,
    ) -> Result<()> {
        check_inputs(time_interval, old)?;

        let alpha_ie = EARTH_ROTATION_RATE * time_interval;
        let (sin_ie, cos_ie) = alpha_ie.sin_cos();
        let c_earth = Matrix3r::new(cos_ie, sin_ie, 0.0, -sin_ie, cos_ie, 0.0, 0.0, 0.0, 1.0);

        let alpha_ib = kinematics.angular_rate * time_interval;
        let mag = alpha_ib.norm();
        let skew_alpha = skew_symmetric(&alpha_ib);
        let skew_alpha_sq = skew_alpha * skew_alpha;
        let identity = Matrix3r::identity();

        let c_new_old = if mag > ALPHA_THRESHOLD {
            let m2 = mag * mag;
            identity + mag.sin() / mag * skew_alpha + (1.0 - mag.cos()) / m2 * skew_alpha_sq
        } else {
            identity + skew_alpha
        };

        let old_cbe = old.c_body_to_ecef.matrix();
        let cbe = c_earth * old_cbe * c_new_old;

        let earth_term = 0.5 * skew_symmetric(&Vector3r::new(0.0, 0.0, alpha_ie)) * old_cbe;
        let ave_cbe = if mag > ALPHA_THRESHOLD {
            let m2 = mag * mag;
            old_cbe
                * (identity
                    + (1.0 - mag.cos()) / m2 * skew_alpha
                    + (1.0 - mag.sin() / mag) / m2 * skew_alpha_sq)
                - earth_term
        } else {
            old_cbe - earth_term
        };

        let (velocity, position) =
            update_velocity_position(time_interval, old, &(ave_cbe * kinematics.specific_force));

        result.position = position;
        result.velocity = velocity;
        result.c_body_to_ecef = CoordinateTransformation::from_matrix_unchecked(
            cbe,
            FrameType::Body,
            FrameType::EarthCenteredEarthFixed,
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Quaternion mechanization
// ---------------------------------------------------------------------------

/// Quaternion mechanization. Caches the Earth rotation for the last step.
#[derive(Debug, Clone, Default)]
pub struct QuaternionEcefNavigator {
    earth_rotation: Option<(f64, UnitQuaternion<f64>)>,
}

impl QuaternionEcefNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    fn earth_rotation(&mut self, time_interval: f64) -> UnitQuaternion<f64> {
        match self.earth_rotation {
            Some((dt, q)) if dt == time_interval => q,
            _ => {
                let q = UnitQuaternion::from_axis_angle(
                    &Vector3r::z_axis(),
                    -EARTH_ROTATION_RATE * time_interval,
                );
                self.earth_rotation = Some((time_interval, q));
                q
            }
        }
    }
}

impl InertialNavigator for QuaternionEcefNavigator {
    fn navigate(
        &mut self,
        time_interval: f64,
        old: &EcefFrame,
        kinematics: &BodyKinematics,
        result: &mut EcefFrame,
    ) -> Result<()> {
        check_inputs(time_interval, old)?;

        let q_earth = self.earth_rotation(time_interval);
        let alpha_ib = kinematics.angular_rate * time_interval;
        let q_body = UnitQuaternion::from_scaled_axis(alpha_ib);
        let q_old = old.attitude();
        let q_new = q_earth * q_old * q_body;

        // Average attitude over the step. Series coefficients avoid the
        // cancellation in 1 - cos and 1 - sin/m for small angles.
        let mag = alpha_ib.norm();
        let (a, b) = if mag > ALPHA_THRESHOLD {
            let half = 0.5 * mag;
            let sin_half = half.sin();
            (
                2.0 * sin_half * sin_half / (mag * mag),
                (mag - mag.sin()) / (mag * mag * mag),
            )
        } else {
            (0.0, 0.0)
        };
        let skew_alpha = skew_symmetric(&alpha_ib);
        let old_cbe = q_old.to_rotation_matrix().into_inner();
        let averaging = Matrix3r::identity() + a * skew_alpha + b * skew_alpha * skew_alpha;
        let earth_term = 0.5
            * skew_symmetric(&Vector3r::new(0.0, 0.0, EARTH_ROTATION_RATE * time_interval))
            * old_cbe;
        let ave_cbe = old_cbe * averaging - earth_term;

        let (velocity, position) =
            update_velocity_position(time_interval, old, &(ave_cbe * kinematics.specific_force));

        result.position = position;
        result.velocity = velocity;
        result.c_body_to_ecef = CoordinateTransformation::from_rotation(
            &q_new,
            FrameType::Body,
            FrameType::EarthCenteredEarthFixed,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{GeodeticLocation, NedFrame};
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_frame(rng: &mut StdRng) -> EcefFrame {
        let location = GeodeticLocation::from_degrees(
            rng.gen_range(-80.0..80.0),
            rng.gen_range(-180.0..180.0),
            rng.gen_range(-50.0..50.0),
        );
        let attitude = UnitQuaternion::from_euler_angles(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-3.0..3.0),
        );
        let c = CoordinateTransformation::from_rotation(
            &attitude,
            FrameType::Body,
            FrameType::LocalNavigation,
        );
        let velocity = Vector3r::new(
            rng.gen_range(-2.0..2.0),
            rng.gen_range(-2.0..2.0),
            rng.gen_range(-2.0..2.0),
        );
        NedFrame::new(location, velocity, c).unwrap().to_ecef()
    }

    #[test]
    fn test_mechanizations_agree() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut matrix_nav = EcefInertialNavigator::new();
        let mut quat_nav = QuaternionEcefNavigator::new();

        for _ in 0..50 {
            let old = random_frame(&mut rng);
            let kinematics = BodyKinematics::new(
                Vector3r::new(
                    rng.gen_range(-5.0..5.0),
                    rng.gen_range(-5.0..5.0),
                    rng.gen_range(-15.0..-5.0),
                ),
                Vector3r::new(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                ),
            );
            let dt = rng.gen_range(0.005..0.05);

            let mut a = EcefFrame::default();
            let mut b = EcefFrame::default();
            matrix_nav.navigate(dt, &old, &kinematics, &mut a).unwrap();
            quat_nav.navigate(dt, &old, &kinematics, &mut b).unwrap();

            assert_relative_eq!(a.position, b.position, epsilon = 1e-6);
            assert_relative_eq!(a.velocity, b.velocity, epsilon = 1e-9);
            assert_relative_eq!(
                a.c_body_to_ecef.matrix(),
                b.c_body_to_ecef.matrix(),
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn test_small_angle_branch_agrees() {
        let mut rng = StdRng::seed_from_u64(11);
        let old = random_frame(&mut rng);
        let kinematics = BodyKinematics::new(Vector3r::new(0.0, 0.0, -9.8), Vector3r::zeros());

        let mut a = EcefFrame::default();
        let mut b = EcefFrame::default();
        EcefInertialNavigator::new()
            .navigate(0.02, &old, &kinematics, &mut a)
            .unwrap();
        QuaternionEcefNavigator::new()
            .navigate(0.02, &old, &kinematics, &mut b)
            .unwrap();

        assert_relative_eq!(a.velocity, b.velocity, epsilon = 1e-9);
        assert_relative_eq!(
            a.c_body_to_ecef.matrix(),
            b.c_body_to_ecef.matrix(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_rejects_body_to_body() {
        let mut old = EcefFrame::default();
        old.c_body_to_ecef = CoordinateTransformation::identity(FrameType::Body, FrameType::Body);
        let kinematics = BodyKinematics::default();
        let mut result = EcefFrame::default();
        let before = result;

        for navigator in [
            &mut EcefInertialNavigator::new() as &mut dyn InertialNavigator,
            &mut QuaternionEcefNavigator::new(),
        ] {
            let err = navigator
                .navigate(0.01, &old, &kinematics, &mut result)
                .unwrap_err();
            assert!(matches!(err, Error::InvalidFrameTransformation { .. }));
            assert_eq!(result, before);
        }
    }

    #[test]
    fn test_rejects_bad_time_interval() {
        let old = EcefFrame::default();
        let mut result = EcefFrame::default();
        let mut nav = EcefInertialNavigator::new();
        for dt in [0.0, -0.1, f64::NAN] {
            assert!(matches!(
                nav.navigate(dt, &old, &BodyKinematics::default(), &mut result),
                Err(Error::InvalidTimeInterval(_))
            ));
        }
    }

    #[test]
    fn test_stationary_body_stays_put() {
        // At rest, the accelerometer measures the reaction to gravity
        let location = GeodeticLocation::from_degrees(41.38, 2.17, 0.0);
        let c = CoordinateTransformation::identity(FrameType::Body, FrameType::LocalNavigation);
        let mut frame = NedFrame::new(location, Vector3r::zeros(), c).unwrap().to_ecef();
        let start = frame.position;

        let c_ne = frame.c_body_to_ecef.matrix().transpose();
        let specific_force = -(c_ne * ecef_gravity(&frame.position));
        let angular_rate = c_ne * earth_rotation_rate_ecef();
        let kinematics = BodyKinematics::new(specific_force, angular_rate);

        let mut nav = EcefInertialNavigator::new();
        let mut next = EcefFrame::default();
        for _ in 0..100 {
            nav.navigate(0.01, &frame, &kinematics, &mut next).unwrap();
            frame = next;
        }
        assert!((frame.position - start).norm() < 1e-3);
        assert!(frame.velocity.norm() < 1e-3);
    }
}
