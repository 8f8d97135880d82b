//! # Agave Core
//!
//! Attitude and pose estimation from smartphone-class inertial sensors:
//! - WGS-84 Earth model and NED/ECEF frames
//! - Strapdown ECEF inertial navigation
//! - Leveling, gyroscope, geomagnetic and fused attitude estimators
//! - Gravity and gravity-norm estimation
//! - Pose estimation chaining fused attitude with the navigator
//!
//! Estimators are driven synchronously: the host starts them, pushes
//! [`TriadMeasurement`]s into their `on_*_measurement` methods from a single
//! thread and receives results through return values or listeners.

pub mod attitude;
pub mod averaging;
pub mod earth;
pub mod error;
pub mod frames;
pub mod geomagnetic;
pub mod gravity;
pub mod gyroscope;
pub mod leveling;
pub mod magnetic;
pub mod navigator;
pub mod pose;
pub mod sensor;
pub mod statistics;

// Re-export core types
pub use attitude::{
    AttitudeEstimate, AttitudeEstimator, AttitudeOutputConfig, DisplayOrientation,
    DisplayOrientationProvider,
};
pub use error::{Error, Result};
pub use frames::{BodyKinematics, CoordinateTransformation, EcefFrame, FrameType, GeodeticLocation, NedFrame};
pub use geomagnetic::{FusedGeomagneticAttitudeEstimator, FusionConfig, GeomagneticAttitudeEstimator, GeomagneticConfig};
pub use gravity::{GravityEstimator, GravityEstimatorConfig, GravityNormConfig, GravityNormEstimator, GravityNormResult, StopMode};
pub use gyroscope::{GyroscopeConfig, RelativeGyroscopeAttitudeEstimator};
pub use leveling::{LevelingEstimator, LevelingModel};
pub use magnetic::{DipoleMagneticModel, WorldMagneticModel};
pub use navigator::{EcefInertialNavigator, InertialNavigator, QuaternionEcefNavigator};
pub use pose::{compute_transformation, PoseConfig, PoseEstimate, PoseEstimator};
pub use sensor::{SensorAccuracy, SensorDelay, SensorSource, SensorType, TriadMeasurement};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
