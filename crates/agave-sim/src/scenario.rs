//! Scenario files: motion, sensor noise and estimator settings.

use crate::motion::MotionParams;
use crate::sensor::SensorConfig;
use agave_core::gravity::StopMode;
use agave_core::magnetic::{DipoleMagneticModel, WorldMagneticModel};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Serialisable mirror of [`StopMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopModeSetting {
    MaxSamplesOnly,
    MaxDurationOnly,
    #[default]
    MaxSamplesOrDuration,
}

impl From<StopModeSetting> for StopMode {
    fn from(s: StopModeSetting) -> Self {
        match s {
            StopModeSetting::MaxSamplesOnly => StopMode::MaxSamplesOnly,
            StopModeSetting::MaxDurationOnly => StopMode::MaxDurationOnly,
            StopModeSetting::MaxSamplesOrDuration => StopMode::MaxSamplesOrDuration,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorSettings {
    pub use_accelerometer: bool,
    pub use_accurate_leveling: bool,
    pub use_world_magnetic_model: bool,
    pub outlier_threshold: f64,
    pub outlier_panic_threshold: f64,
    pub panic_counter_threshold: usize,
    pub interpolation_value: f64,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            use_accelerometer: false,
            use_accurate_leveling: true,
            use_world_magnetic_model: true,
            outlier_threshold: 0.85,
            outlier_panic_threshold: 0.65,
            panic_counter_threshold: 60,
            interpolation_value: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GravityNormSettings {
    pub max_samples: usize,
    pub max_duration_ms: i64,
    pub stop_mode: StopModeSetting,
}

impl Default for GravityNormSettings {
    fn default() -> Self {
        Self {
            max_samples: 250,
            max_duration_ms: 5000,
            stop_mode: StopModeSetting::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub name: String,
    /// Decimal year used for the magnetic field
    pub year: f64,
    pub motion: MotionParams,
    pub sensors: SensorConfig,
    pub estimator: EstimatorSettings,
    pub gravity_norm: GravityNormSettings,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            name: "slow-turn".to_string(),
            year: 2024.5,
            motion: MotionParams::default(),
            sensors: SensorConfig::default(),
            estimator: EstimatorSettings::default(),
            gravity_norm: GravityNormSettings::default(),
        }
    }
}

impl Scenario {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Earth field at the start location (NED, T).
    pub fn magnetic_field(&self) -> Vector3<f64> {
        DipoleMagneticModel::default().magnetic_flux_density(&self.motion.location(), self.year)
    }

    pub fn declination(&self) -> f64 {
        DipoleMagneticModel::default().declination(&self.motion.location(), self.year)
    }
}
