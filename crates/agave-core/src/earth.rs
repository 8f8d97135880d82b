//! WGS-84 Earth model: constants, rotation and gravity.
//!
//! Gravity models follow the usual strapdown references:
//! - ECEF: gravitation with the J2 term plus the centrifugal term,
//! - NED: Somigliana surface gravity with a height correction.

use nalgebra::{Matrix3, Vector3};

// ---------------------------------------------------------------------------
// WGS-84
// ---------------------------------------------------------------------------
/// Earth rotation rate (rad/s).
pub const EARTH_ROTATION_RATE: f64 = 7.292115e-5;
/// Equatorial radius (m).
pub const EQUATORIAL_RADIUS: f64 = 6_378_137.0;
/// Polar radius (m).
pub const POLAR_RADIUS: f64 = 6_356_752.31425;
/// First eccentricity.
pub const ECCENTRICITY: f64 = 0.0818191908425;
pub const ECCENTRICITY_SQUARED: f64 = ECCENTRICITY * ECCENTRICITY;
pub const FLATTENING: f64 = 1.0 / 298.257223563;
/// Earth gravitational constant GM (m³/s²).
pub const GRAVITATIONAL_CONSTANT: f64 = 3.986004418e14;
/// Second gravitational constant J2.
pub const J2: f64 = 1.082627e-3;
/// Standard gravity (m/s²).
pub const STANDARD_GRAVITY: f64 = 9.80665;

const SOMIGLIANA_EQUATORIAL_GRAVITY: f64 = 9.7803253359;
const SOMIGLIANA_K: f64 = 0.001931853;

/// Earth rotation rate vector resolved in ECEF axes.
#[inline]
pub fn earth_rotation_rate_ecef() -> Vector3<f64> {
    Vector3::new(0.0, 0.0, EARTH_ROTATION_RATE)
}

/// Skew-symmetric (cross product) matrix of `v`.
pub fn skew_symmetric(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

// ---------------------------------------------------------------------------
// Gravity
// ---------------------------------------------------------------------------

/// Acceleration due to gravity at an ECEF position, resolved in ECEF axes.
///
/// Zero at the Earth centre, where the model is undefined.
pub fn ecef_gravity(position: &Vector3<f64>) -> Vector3<f64> {
    let mag_r = position.norm();
    if mag_r == 0.0 {
        return Vector3::zeros();
    }

    let z_scale = 5.0 * (position.z / mag_r).powi(2);
    let j2_scale = 1.5 * J2 * (EQUATORIAL_RADIUS / mag_r).powi(2);
    let gamma = -GRAVITATIONAL_CONSTANT / mag_r.powi(3)
        * (position
            + j2_scale
                * Vector3::new(
                    (1.0 - z_scale) * position.x,
                    (1.0 - z_scale) * position.y,
                    (3.0 - z_scale) * position.z,
                ));

    let w2 = EARTH_ROTATION_RATE * EARTH_ROTATION_RATE;
    gamma + Vector3::new(w2 * position.x, w2 * position.y, 0.0)
}

/// Acceleration due to gravity at a geodetic latitude/height, resolved in
/// NED axes.
pub fn ned_gravity(latitude: f64, height: f64) -> Vector3<f64> {
    let sin_sq = latitude.sin().powi(2);
    let g0 = SOMIGLIANA_EQUATORIAL_GRAVITY * (1.0 + SOMIGLIANA_K * sin_sq)
        / (1.0 - ECCENTRICITY_SQUARED * sin_sq).sqrt();

    let w2 = EARTH_ROTATION_RATE * EARTH_ROTATION_RATE;
    let m = w2 * EQUATORIAL_RADIUS * EQUATORIAL_RADIUS * POLAR_RADIUS / GRAVITATIONAL_CONSTANT;
    let down = g0
        * (1.0 - (2.0 / EQUATORIAL_RADIUS) * (1.0 + FLATTENING * (1.0 - 2.0 * sin_sq) + m) * height
            + (3.0 / (EQUATORIAL_RADIUS * EQUATORIAL_RADIUS)) * height * height);
    let north = -8.08e-9 * height * (2.0 * latitude).sin();

    Vector3::new(north, 0.0, down)
}
