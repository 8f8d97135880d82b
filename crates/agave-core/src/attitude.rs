//! Attitude outputs shared by every attitude estimator.
//!
//! # Conventions
//!
//! Estimators work with body -> NED rotations. The published
//! [`AttitudeEstimate::attitude`] is the inverse (NED -> body). Euler angles
//! and the `Body -> LocalNavigation` transformation are always derived from
//! the body -> NED form, so roll/pitch/yaw read as usual aircraft angles.
//!
//! The screen rotation is applied as a rotation about body z by minus the
//! display angle, post-multiplied onto the body -> NED attitude.

use crate::error::Result;
use crate::frames::{CoordinateTransformation, FrameType};
use nalgebra::UnitQuaternion;
use tracing::warn;

// ---------------------------------------------------------------------------
// Display orientation
// ---------------------------------------------------------------------------

/// Screen rotation relative to the device's natural orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DisplayOrientation {
    #[default]
    Rotation0,
    Rotation90,
    Rotation180,
    Rotation270,
}

impl DisplayOrientation {
    /// Nearest quarter turn; angles are wrapped into [0, 360).
    pub fn from_degrees(degrees: i32) -> Self {
        match ((degrees.rem_euclid(360) + 45) / 90) % 4 {
            1 => Self::Rotation90,
            2 => Self::Rotation180,
            3 => Self::Rotation270,
            _ => Self::Rotation0,
        }
    }

    pub fn degrees(self) -> i32 {
        match self {
            Self::Rotation0 => 0,
            Self::Rotation90 => 90,
            Self::Rotation180 => 180,
            Self::Rotation270 => 270,
        }
    }

    pub fn radians(self) -> f64 {
        f64::from(self.degrees()).to_radians()
    }

    /// Correction post-multiplied onto a body -> NED attitude.
    pub fn correction(self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_euler_angles(0.0, 0.0, -self.radians())
    }
}

/// Supplies the current screen rotation on every sample.
pub trait DisplayOrientationProvider {
    fn display_orientation(&self) -> DisplayOrientation;
}

impl DisplayOrientationProvider for DisplayOrientation {
    fn display_orientation(&self) -> DisplayOrientation {
        *self
    }
}

impl<F: Fn() -> DisplayOrientation> DisplayOrientationProvider for F {
    fn display_orientation(&self) -> DisplayOrientation {
        self()
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// Which optional outputs an estimator derives for each sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttitudeOutputConfig {
    pub estimate_euler_angles: bool,
    pub estimate_coordinate_transformation: bool,
    pub ignore_display_orientation: bool,
}

impl Default for AttitudeOutputConfig {
    fn default() -> Self {
        Self {
            estimate_euler_angles: true,
            estimate_coordinate_transformation: true,
            ignore_display_orientation: false,
        }
    }
}

/// One attitude sample as delivered to listeners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttitudeEstimate {
    /// NED -> body rotation.
    pub attitude: UnitQuaternion<f64>,
    pub roll: Option<f64>,
    pub pitch: Option<f64>,
    /// `None` for tilt-only estimators.
    pub yaw: Option<f64>,
    /// Body -> NED transformation, `None` when not requested or invalid.
    pub coordinate_transformation: Option<CoordinateTransformation>,
    pub timestamp_nanos: i64,
}

impl AttitudeEstimate {
    /// Body -> NED form of [`attitude`](Self::attitude).
    pub fn body_to_ned(&self) -> UnitQuaternion<f64> {
        self.attitude.inverse()
    }
}

/// Builds an [`AttitudeEstimate`] from a published (NED -> body) attitude.
pub(crate) fn build_estimate(
    attitude: UnitQuaternion<f64>,
    timestamp_nanos: i64,
    outputs: &AttitudeOutputConfig,
    has_yaw: bool,
) -> AttitudeEstimate {
    let body_to_ned = attitude.inverse();

    let (roll, pitch, yaw) = if outputs.estimate_euler_angles {
        let (roll, pitch, yaw) = body_to_ned.euler_angles();
        (Some(roll), Some(pitch), has_yaw.then_some(yaw))
    } else {
        (None, None, None)
    };

    let coordinate_transformation = if outputs.estimate_coordinate_transformation {
        let matrix = body_to_ned.to_rotation_matrix().into_inner();
        match CoordinateTransformation::new(matrix, FrameType::Body, FrameType::LocalNavigation) {
            Ok(transformation) => Some(transformation),
            Err(err) => {
                warn!(timestamp_nanos, %err, "dropping attitude transformation");
                None
            }
        }
    } else {
        None
    };

    AttitudeEstimate {
        attitude,
        roll,
        pitch,
        yaw,
        coordinate_transformation,
        timestamp_nanos,
    }
}

// ---------------------------------------------------------------------------
// Estimator seam
// ---------------------------------------------------------------------------

/// Single-slot attitude callback.
pub type AttitudeListener = Box<dyn FnMut(&AttitudeEstimate)>;

/// Lifecycle shared by all attitude estimators.
pub trait AttitudeEstimator {
    /// Starts the underlying sources.
    ///
    /// `Err(IllegalState)` when already running, `Ok(false)` when a source
    /// is unavailable (already started siblings are stopped again).
    fn start(&mut self) -> Result<bool>;

    /// Stops every source. Safe to call when not running.
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    fn set_listener(&mut self, listener: Option<AttitudeListener>);
}
