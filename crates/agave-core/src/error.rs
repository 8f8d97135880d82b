//! Error types for Agave Core

use crate::frames::FrameType;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Agave Core error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Operation not allowed in the estimator's current state
    #[error("Illegal state: {0}")]
    IllegalState(&'static str),

    /// Construction or configuration argument out of range
    #[error("Illegal argument: {0}")]
    IllegalArgument(&'static str),

    /// Frame carries a transformation between the wrong frame types
    #[error("Invalid frame transformation: expected {expected_from:?} -> {expected_to:?}, got {from:?} -> {to:?}")]
    InvalidFrameTransformation {
        /// Required source frame
        expected_from: FrameType,
        /// Required destination frame
        expected_to: FrameType,
        /// Actual source frame
        from: FrameType,
        /// Actual destination frame
        to: FrameType,
    },

    /// Matrix is not orthonormal with positive determinant
    #[error("Invalid rotation matrix")]
    InvalidRotationMatrix,

    /// Integration step is not a positive finite number of seconds
    #[error("Invalid time interval: {0} s")]
    InvalidTimeInterval(f64),
}
