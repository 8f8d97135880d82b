//! Frames, coordinate transformations and body kinematics.
//!
//! A [`CoordinateTransformation`] carries the frame pair it maps between so
//! that navigation routines can reject transformations resolved in the wrong
//! frames. Matrices are always proper rotations: setters validate and leave
//! the previous value untouched on failure.

use crate::earth::{EQUATORIAL_RADIUS, POLAR_RADIUS};
use crate::error::{Error, Result};
use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};
use nav_types::{ECEF, WGS84};
use std::f64::consts::FRAC_PI_2;

/// Orthonormality tolerance used by [`CoordinateTransformation`].
pub const DEFAULT_ROTATION_THRESHOLD: f64 = 1e-9;

type Vector3r = Vector3<f64>;
type Matrix3r = Matrix3<f64>;

// ---------------------------------------------------------------------------
// Frame types
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Body,
    /// Local North-East-Down tangent frame.
    LocalNavigation,
    EarthCenteredEarthFixed,
    EarthCenteredInertial,
}

// ---------------------------------------------------------------------------
// Coordinate transformation
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateTransformation {
    from: FrameType,
    to: FrameType,
    matrix: Matrix3r,
}

impl CoordinateTransformation {
    pub fn identity(from: FrameType, to: FrameType) -> Self {
        Self {
            from,
            to,
            matrix: Matrix3r::identity(),
        }
    }

    /// Fails with [`Error::InvalidRotationMatrix`] unless `matrix` is a
    /// proper rotation.
    pub fn new(matrix: Matrix3r, from: FrameType, to: FrameType) -> Result<Self> {
        if !is_valid_rotation(&matrix, DEFAULT_ROTATION_THRESHOLD) {
            return Err(Error::InvalidRotationMatrix);
        }
        Ok(Self { from, to, matrix })
    }

    pub fn from_rotation(rotation: &UnitQuaternion<f64>, from: FrameType, to: FrameType) -> Self {
        Self {
            from,
            to,
            matrix: rotation.to_rotation_matrix().into_inner(),
        }
    }

    /// Skips validation; callers guarantee the matrix came from a rotation.
    pub(crate) fn from_matrix_unchecked(matrix: Matrix3r, from: FrameType, to: FrameType) -> Self {
        Self { from, to, matrix }
    }

    pub fn source_type(&self) -> FrameType {
        self.from
    }

    pub fn destination_type(&self) -> FrameType {
        self.to
    }

    pub fn matrix(&self) -> &Matrix3r {
        &self.matrix
    }

    pub fn set_matrix(&mut self, matrix: Matrix3r) -> Result<()> {
        if !is_valid_rotation(&matrix, DEFAULT_ROTATION_THRESHOLD) {
            return Err(Error::InvalidRotationMatrix);
        }
        self.matrix = matrix;
        Ok(())
    }

    pub fn is_between(&self, from: FrameType, to: FrameType) -> bool {
        self.from == from && self.to == to
    }

    pub fn check_frames(&self, from: FrameType, to: FrameType) -> Result<()> {
        if self.is_between(from, to) {
            Ok(())
        } else {
            Err(Error::InvalidFrameTransformation {
                expected_from: from,
                expected_to: to,
                from: self.from,
                to: self.to,
            })
        }
    }

    pub fn to_quaternion(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(self.matrix))
    }

    /// (roll, pitch, yaw) in radians, ZYX convention.
    pub fn euler_angles(&self) -> (f64, f64, f64) {
        Rotation3::from_matrix_unchecked(self.matrix).euler_angles()
    }

    pub fn inverse(&self) -> Self {
        Self {
            from: self.to,
            to: self.from,
            matrix: self.matrix.transpose(),
        }
    }
}

/// True when `m·mᵀ` is within `threshold` of identity and `det(m) > 0`.
pub fn is_valid_rotation(m: &Matrix3r, threshold: f64) -> bool {
    if m.iter().any(|v| !v.is_finite()) {
        return false;
    }
    let residual = (m * m.transpose() - Matrix3r::identity()).abs().max();
    residual <= threshold && m.determinant() > 0.0
}

// ---------------------------------------------------------------------------
// Geodetic location
// ---------------------------------------------------------------------------

/// Geodetic position on the WGS-84 ellipsoid. Angles in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GeodeticLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub height: f64,
}

impl GeodeticLocation {
    pub fn new(latitude: f64, longitude: f64, height: f64) -> Self {
        Self {
            latitude,
            longitude,
            height,
        }
    }

    pub fn from_degrees(latitude_deg: f64, longitude_deg: f64, height: f64) -> Self {
        Self::new(latitude_deg.to_radians(), longitude_deg.to_radians(), height)
    }

    /// Latitude clamped to the poles and longitude wrapped to (-π, π].
    fn wgs84(&self) -> WGS84<f64> {
        let latitude = self.latitude.clamp(-FRAC_PI_2, FRAC_PI_2);
        let longitude = self.longitude.sin().atan2(self.longitude.cos());
        WGS84::from_radians_and_meters(latitude, longitude, self.height)
    }

    pub fn to_ecef_position(&self) -> Vector3r {
        let ecef = ECEF::from(self.wgs84());
        Vector3r::new(ecef.x(), ecef.y(), ecef.z())
    }

    pub fn from_ecef_position(position: &Vector3r) -> Self {
        let (x, y, z) = (position.x, position.y, position.z);
        // Height is measured along the axis itself on the poles
        if x.hypot(y) < 1e-9 {
            return Self::new(FRAC_PI_2.copysign(z), 0.0, z.abs() - POLAR_RADIUS);
        }
        let wgs84 = WGS84::from(ECEF::new(x, y, z));
        Self::new(wgs84.latitude_radians(), wgs84.longitude_radians(), wgs84.altitude())
    }
}

/// Rotation resolving NED axes into ECEF axes at a geodetic position.
pub fn ned_to_ecef_matrix(latitude: f64, longitude: f64) -> Matrix3r {
    let (sin_lat, cos_lat) = latitude.sin_cos();
    let (sin_lon, cos_lon) = longitude.sin_cos();
    Matrix3r::new(
        -sin_lat * cos_lon,
        -sin_lon,
        -cos_lat * cos_lon,
        -sin_lat * sin_lon,
        cos_lon,
        -cos_lat * sin_lon,
        cos_lat,
        0.0,
        -sin_lat,
    )
}

// ---------------------------------------------------------------------------
// Body kinematics
// ---------------------------------------------------------------------------

/// Specific force (m/s²) and angular rate (rad/s) in body NED axes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BodyKinematics {
    pub specific_force: Vector3r,
    pub angular_rate: Vector3r,
}

impl BodyKinematics {
    pub fn new(specific_force: Vector3r, angular_rate: Vector3r) -> Self {
        Self {
            specific_force,
            angular_rate,
        }
    }
}

// ---------------------------------------------------------------------------
// NED frame
// ---------------------------------------------------------------------------

/// Position, velocity and attitude in a local NED frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NedFrame {
    pub location: GeodeticLocation,
    /// Velocity (north, east, down) in m/s.
    pub velocity: Vector3r,
    c_body_to_ned: CoordinateTransformation,
}

impl NedFrame {
    pub fn new(
        location: GeodeticLocation,
        velocity: Vector3r,
        c_body_to_ned: CoordinateTransformation,
    ) -> Result<Self> {
        c_body_to_ned.check_frames(FrameType::Body, FrameType::LocalNavigation)?;
        Ok(Self {
            location,
            velocity,
            c_body_to_ned,
        })
    }

    pub fn coordinate_transformation(&self) -> &CoordinateTransformation {
        &self.c_body_to_ned
    }

    pub fn to_ecef(&self) -> EcefFrame {
        let c_ne = ned_to_ecef_matrix(self.location.latitude, self.location.longitude);
        EcefFrame {
            position: self.location.to_ecef_position(),
            velocity: c_ne * self.velocity,
            c_body_to_ecef: CoordinateTransformation::from_matrix_unchecked(
                c_ne * self.c_body_to_ned.matrix(),
                FrameType::Body,
                FrameType::EarthCenteredEarthFixed,
            ),
        }
    }

    pub fn from_ecef(frame: &EcefFrame) -> Result<Self> {
        frame.check_transformation()?;
        let location = GeodeticLocation::from_ecef_position(&frame.position);
        let c_en = ned_to_ecef_matrix(location.latitude, location.longitude).transpose();
        Ok(Self {
            location,
            velocity: c_en * frame.velocity,
            c_body_to_ned: CoordinateTransformation::from_matrix_unchecked(
                c_en * frame.c_body_to_ecef.matrix(),
                FrameType::Body,
                FrameType::LocalNavigation,
            ),
        })
    }
}

// ---------------------------------------------------------------------------
// ECEF frame
// ---------------------------------------------------------------------------

/// Position, velocity and attitude resolved in ECEF axes.
///
/// Fields are public; [`check_transformation`](Self::check_transformation)
/// enforces the Body -> ECEF pairing where navigation requires it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EcefFrame {
    pub position: Vector3r,
    pub velocity: Vector3r,
    pub c_body_to_ecef: CoordinateTransformation,
}

impl Default for EcefFrame {
    fn default() -> Self {
        Self {
            position: Vector3r::new(EQUATORIAL_RADIUS, 0.0, 0.0),
            velocity: Vector3r::zeros(),
            c_body_to_ecef: CoordinateTransformation::identity(
                FrameType::Body,
                FrameType::EarthCenteredEarthFixed,
            ),
        }
    }
}

impl EcefFrame {
    pub fn new(
        position: Vector3r,
        velocity: Vector3r,
        c_body_to_ecef: CoordinateTransformation,
    ) -> Result<Self> {
        c_body_to_ecef.check_frames(FrameType::Body, FrameType::EarthCenteredEarthFixed)?;
        Ok(Self {
            position,
            velocity,
            c_body_to_ecef,
        })
    }

    pub fn check_transformation(&self) -> Result<()> {
        self.c_body_to_ecef
            .check_frames(FrameType::Body, FrameType::EarthCenteredEarthFixed)
    }

    /// Body attitude as a body -> ECEF rotation.
    pub fn attitude(&self) -> UnitQuaternion<f64> {
        self.c_body_to_ecef.to_quaternion()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rejects_non_rotation() {
        let scaled = Matrix3r::identity() * 2.0;
        assert_eq!(
            CoordinateTransformation::new(scaled, FrameType::Body, FrameType::LocalNavigation),
            Err(Error::InvalidRotationMatrix)
        );

        let reflection = Matrix3r::from_diagonal(&Vector3r::new(1.0, 1.0, -1.0));
        assert!(!is_valid_rotation(&reflection, DEFAULT_ROTATION_THRESHOLD));
    }

    #[test]
    fn test_set_matrix_keeps_state_on_failure() {
        let mut c = CoordinateTransformation::identity(FrameType::Body, FrameType::LocalNavigation);
        assert!(c.set_matrix(Matrix3r::zeros()).is_err());
        assert_eq!(*c.matrix(), Matrix3r::identity());

        let r = UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3);
        assert!(c.set_matrix(r.to_rotation_matrix().into_inner()).is_ok());
        assert_relative_eq!(c.to_quaternion().angle_to(&r), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_frame_check() {
        let c = CoordinateTransformation::identity(FrameType::Body, FrameType::Body);
        let err = c
            .check_frames(FrameType::Body, FrameType::EarthCenteredEarthFixed)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFrameTransformation { .. }));
    }

    #[test]
    fn test_geodetic_ecef_round_trip() {
        for (lat, lon, h) in [(41.38, 2.17, 120.0), (-33.9, 151.2, 5.0), (89.9, -45.0, 1000.0)] {
            let loc = GeodeticLocation::from_degrees(lat, lon, h);
            let back = GeodeticLocation::from_ecef_position(&loc.to_ecef_position());
            assert_relative_eq!(back.latitude, loc.latitude, epsilon = 1e-9);
            assert_relative_eq!(back.longitude, loc.longitude, epsilon = 1e-9);
            assert_relative_eq!(back.height, loc.height, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_polar_axis() {
        let north = GeodeticLocation::from_ecef_position(&Vector3r::new(0.0, 0.0, POLAR_RADIUS + 100.0));
        assert_eq!(north.latitude, FRAC_PI_2);
        assert_relative_eq!(north.height, 100.0, epsilon = 1e-9);

        let south = GeodeticLocation::from_ecef_position(&Vector3r::new(0.0, 0.0, -POLAR_RADIUS + 20.0));
        assert_eq!(south.latitude, -FRAC_PI_2);
        assert_relative_eq!(south.height, -20.0, epsilon = 1e-9);

        let pole = GeodeticLocation::from_degrees(90.0, 0.0, 100.0).to_ecef_position();
        assert_relative_eq!(pole.z, POLAR_RADIUS + 100.0, epsilon = 1e-4);
    }

    #[test]
    fn test_out_of_range_angles_are_normalized() {
        let wrapped = GeodeticLocation::from_degrees(10.0, 370.0, 0.0).to_ecef_position();
        let plain = GeodeticLocation::from_degrees(10.0, 10.0, 0.0).to_ecef_position();
        assert_relative_eq!(wrapped, plain, epsilon = 1e-6);
    }

    #[test]
    fn test_ned_axes_match_ellipsoid_offsets() {
        let loc = GeodeticLocation::from_degrees(41.38, 2.17, 30.0);
        let origin = ECEF::from(WGS84::from_degrees_and_meters(41.38, 2.17, 30.0));
        let c_ne = ned_to_ecef_matrix(loc.latitude, loc.longitude);
        let offsets = [
            (nav_types::NED::new(1.0, 0.0, 0.0), Vector3r::x()),
            (nav_types::NED::new(0.0, 1.0, 0.0), Vector3r::y()),
            (nav_types::NED::new(0.0, 0.0, 1.0), Vector3r::z()),
        ];
        for (ned, axis) in offsets {
            let moved = origin + ned;
            let expected = Vector3r::new(moved.x() - origin.x(), moved.y() - origin.y(), moved.z() - origin.z());
            assert_relative_eq!(c_ne * axis, expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_ned_ecef_frame_round_trip() {
        let attitude = UnitQuaternion::from_euler_angles(0.1, -0.2, 1.3);
        let c = CoordinateTransformation::from_rotation(
            &attitude,
            FrameType::Body,
            FrameType::LocalNavigation,
        );
        let ned = NedFrame::new(
            GeodeticLocation::from_degrees(41.0, 2.0, 50.0),
            Vector3r::new(1.0, -2.0, 0.5),
            c,
        )
        .unwrap();

        let ecef = ned.to_ecef();
        assert!(ecef.check_transformation().is_ok());
        assert_relative_eq!(ecef.velocity.norm(), ned.velocity.norm(), epsilon = 1e-12);

        let back = NedFrame::from_ecef(&ecef).unwrap();
        assert_relative_eq!(back.velocity, ned.velocity, epsilon = 1e-9);
        assert_relative_eq!(
            back.coordinate_transformation().matrix(),
            ned.coordinate_transformation().matrix(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_ned_frame_requires_body_to_ned() {
        let c = CoordinateTransformation::identity(FrameType::Body, FrameType::EarthCenteredEarthFixed);
        assert!(NedFrame::new(GeodeticLocation::default(), Vector3r::zeros(), c).is_err());
    }
}
