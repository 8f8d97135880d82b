//! Geomagnetic field lookups and magnetometer heading.

use crate::frames::GeodeticLocation;
use chrono::{DateTime, Datelike, Timelike, Utc};
use nalgebra::{UnitQuaternion, Vector3};

/// Geomagnetic reference radius (m).
pub const GEOMAGNETIC_REFERENCE_RADIUS: f64 = 6_371_200.0;

/// Magnetic field lookup at a position and date.
pub trait WorldMagneticModel {
    /// Flux density in NED axes, tesla.
    fn magnetic_flux_density(&self, location: &GeodeticLocation, decimal_year: f64) -> Vector3<f64>;

    /// Angle from true north to magnetic north, positive east (rad).
    fn declination(&self, location: &GeodeticLocation, decimal_year: f64) -> f64 {
        let b = self.magnetic_flux_density(location, decimal_year);
        b.y.atan2(b.x)
    }

    /// Inclination below the horizontal (rad).
    fn dip(&self, location: &GeodeticLocation, decimal_year: f64) -> f64 {
        let b = self.magnetic_flux_density(location, decimal_year);
        b.z.atan2(b.x.hypot(b.y))
    }
}

// ---------------------------------------------------------------------------
// Dipole
// ---------------------------------------------------------------------------

/// Tilted dipole from the degree-one Gauss coefficients (nT) with linear
/// secular variation (nT/yr).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DipoleMagneticModel {
    pub epoch: f64,
    pub g10: f64,
    pub g11: f64,
    pub h11: f64,
    pub g10_rate: f64,
    pub g11_rate: f64,
    pub h11_rate: f64,
}

impl Default for DipoleMagneticModel {
    /// IGRF-13, epoch 2020.
    fn default() -> Self {
        Self {
            epoch: 2020.0,
            g10: -29404.8,
            g11: -1450.9,
            h11: 4652.5,
            g10_rate: 5.7,
            g11_rate: 7.4,
            h11_rate: -25.9,
        }
    }
}

impl WorldMagneticModel for DipoleMagneticModel {
    fn magnetic_flux_density(&self, location: &GeodeticLocation, decimal_year: f64) -> Vector3<f64> {
        let years = decimal_year - self.epoch;
        let g10 = self.g10 + self.g10_rate * years;
        let g11 = self.g11 + self.g11_rate * years;
        let h11 = self.h11 + self.h11_rate * years;

        let position = location.to_ecef_position();
        let r = position.norm();
        let geocentric_latitude = (position.z / r).asin();
        let (sin_theta, cos_theta) = (std::f64::consts::FRAC_PI_2 - geocentric_latitude).sin_cos();
        let (sin_phi, cos_phi) = location.longitude.sin_cos();
        let ratio = (GEOMAGNETIC_REFERENCE_RADIUS / r).powi(3);

        let equatorial = g11 * cos_phi + h11 * sin_phi;
        let b_r = 2.0 * ratio * (g10 * cos_theta + equatorial * sin_theta);
        let b_theta = ratio * (g10 * sin_theta - equatorial * cos_theta);
        let b_phi = ratio * (g11 * sin_phi - h11 * cos_phi);

        // Geocentric to geodetic NED
        let (north_c, east, down_c) = (-b_theta, b_phi, -b_r);
        let (sin_d, cos_d) = (geocentric_latitude - location.latitude).sin_cos();
        let north = north_c * cos_d - down_c * sin_d;
        let down = north_c * sin_d + down_c * cos_d;

        Vector3::new(north, east, down) * 1e-9
    }
}

/// Fractional year, e.g. 2024.5 around the start of July.
pub fn decimal_year(time: &DateTime<Utc>) -> f64 {
    let year = time.year();
    let days_in_year = if is_leap_year(year) { 366.0 } else { 365.0 };
    let day = f64::from(time.ordinal0()) + f64::from(time.num_seconds_from_midnight()) / 86_400.0;
    f64::from(year) + day / days_in_year
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

// ---------------------------------------------------------------------------
// Heading
// ---------------------------------------------------------------------------

/// Magnetic heading (rad) of a body whose tilt is `tilt` (body -> NED,
/// zero yaw), from a body NED magnetometer reading.
pub fn magnetic_heading(tilt: &UnitQuaternion<f64>, magnetic_body: &Vector3<f64>) -> f64 {
    let level = tilt * magnetic_body;
    (-level.y).atan2(level.x)
}
