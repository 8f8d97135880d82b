//! Raw sensor samples and the sensor source seam.
//!
//! Hosts own the platform sensor plumbing. An estimator only sees:
//! - a [`SensorSource`] it can start and stop,
//! - [`TriadMeasurement`]s pushed into its `on_*_measurement` methods,
//! - accuracy-changed notifications.
//!
//! # Axis Convention
//!
//! Samples arrive in device axes: x to the right of the screen, y up the
//! screen, z out of the screen. The navigation math works in body NED axes,
//! so every estimator converts with [`enu_to_ned`]:
//!
//! ```text
//! (x, y, z)_device -> (y, x, -z)_body
//! ```

use nalgebra::Vector3;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Reported sensor accuracy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum SensorAccuracy {
    Unreliable,
    Low,
    Medium,
    #[default]
    High,
}

/// Requested delivery rate hint passed to [`SensorSource::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SensorDelay {
    Fastest,
    #[default]
    Game,
    Ui,
    Normal,
}

impl SensorDelay {
    /// Nominal sampling period in microseconds (0 = as fast as possible).
    pub fn nominal_period_micros(self) -> u32 {
        match self {
            Self::Fastest => 0,
            Self::Game => 20_000,
            Self::Ui => 66_667,
            Self::Normal => 200_000,
        }
    }
}

/// Physical sensor kinds consumed by the estimators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorType {
    Accelerometer,
    Gyroscope,
    Magnetometer,
    Gravity,
}

// ---------------------------------------------------------------------------
// Measurements
// ---------------------------------------------------------------------------

/// Three-axis sample as delivered by a sensor source (device axes).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriadMeasurement {
    pub value: Vector3<f64>,
    /// Estimated sensor bias (uncalibrated sensors only).
    pub bias: Option<Vector3<f64>>,
    pub timestamp_nanos: i64,
    pub accuracy: SensorAccuracy,
}

impl TriadMeasurement {
    pub fn new(x: f64, y: f64, z: f64, timestamp_nanos: i64, accuracy: SensorAccuracy) -> Self {
        Self {
            value: Vector3::new(x, y, z),
            bias: None,
            timestamp_nanos,
            accuracy,
        }
    }

    pub fn with_bias(mut self, bx: f64, by: f64, bz: f64) -> Self {
        self.bias = Some(Vector3::new(bx, by, bz));
        self
    }

    /// Bias-corrected value in device axes.
    pub fn corrected(&self) -> Vector3<f64> {
        match self.bias {
            Some(bias) => self.value - bias,
            None => self.value,
        }
    }

    /// Bias-corrected value in body NED axes.
    pub fn corrected_ned(&self) -> Vector3<f64> {
        enu_to_ned(&self.corrected())
    }
}

/// Device (ENU-style) axes to body NED axes.
#[inline]
pub fn enu_to_ned(v: &Vector3<f64>) -> Vector3<f64> {
    Vector3::new(v.y, v.x, -v.z)
}

/// Body NED axes to device axes. The swap is its own inverse.
#[inline]
pub fn ned_to_enu(v: &Vector3<f64>) -> Vector3<f64> {
    enu_to_ned(v)
}

// ---------------------------------------------------------------------------
// Source seam
// ---------------------------------------------------------------------------

/// Start/stop control over one platform sensor.
///
/// `start` returns `false` when the sensor is unavailable; that is a normal
/// failure signal, not an error.
pub trait SensorSource {
    fn start(&mut self, delay: SensorDelay) -> bool;
    fn stop(&mut self);
}

impl<S: SensorSource + ?Sized> SensorSource for Box<S> {
    fn start(&mut self, delay: SensorDelay) -> bool {
        (**self).start(delay)
    }

    fn stop(&mut self) {
        (**self).stop()
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::{SensorDelay, SensorSource};
    use std::cell::Cell;
    use std::rc::Rc;

    /// Call counters shared between a [`MockSource`] and the test body.
    #[derive(Debug, Default)]
    pub struct Calls {
        pub starts: Cell<usize>,
        pub stops: Cell<usize>,
    }

    pub struct MockSource {
        pub available: bool,
        pub calls: Rc<Calls>,
    }

    impl MockSource {
        pub fn new(available: bool) -> (Box<Self>, Rc<Calls>) {
            let calls = Rc::new(Calls::default());
            (
                Box::new(Self {
                    available,
                    calls: Rc::clone(&calls),
                }),
                calls,
            )
        }
    }

    impl SensorSource for MockSource {
        fn start(&mut self, _delay: SensorDelay) -> bool {
            self.calls.starts.set(self.calls.starts.get() + 1);
            self.available
        }

        fn stop(&mut self) {
            self.calls.stops.set(self.calls.stops.get() + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bias_correction() {
        let m = TriadMeasurement::new(1.0, 2.0, 3.0, 0, SensorAccuracy::High);
        assert_eq!(m.corrected(), Vector3::new(1.0, 2.0, 3.0));

        let m = m.with_bias(0.5, 0.5, 0.5);
        assert_eq!(m.corrected(), Vector3::new(0.5, 1.5, 2.5));
    }

    #[test]
    fn test_enu_to_ned() {
        // Flat, screen up: accelerometer reads +g out of the screen
        let m = TriadMeasurement::new(0.0, 0.0, 9.81, 0, SensorAccuracy::High);
        assert_eq!(m.corrected_ned(), Vector3::new(0.0, 0.0, -9.81));

        let v = Vector3::new(1.0, -2.0, 3.0);
        assert_eq!(ned_to_enu(&enu_to_ned(&v)), v);
    }

    #[test]
    fn test_delay_periods() {
        assert_eq!(SensorDelay::Fastest.nominal_period_micros(), 0);
        assert_eq!(SensorDelay::default(), SensorDelay::Game);
        assert!(SensorDelay::Normal.nominal_period_micros() > SensorDelay::Ui.nominal_period_micros());
    }
}
