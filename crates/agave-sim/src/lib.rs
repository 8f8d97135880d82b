//! Agave Simulation Library
//!
//! Synthesises smartphone sensor streams for a scripted motion and replays
//! them through the `agave-core` estimators.

pub mod motion;
pub mod replay;
pub mod scenario;
pub mod sensor;

// Re-export main types
pub use motion::{simulate_motion, MotionParams, Trajectory};
pub use replay::{
    run_attitude, run_gravity_norm, run_pose, AttitudeReport, GravityNormReport, PoseReport, ReplayError,
    ScriptedSensors, ScriptedSource,
};
pub use scenario::{EstimatorSettings, GravityNormSettings, Scenario, StopModeSetting};
pub use sensor::{generate_sensor_data, SensorConfig, SensorData};
