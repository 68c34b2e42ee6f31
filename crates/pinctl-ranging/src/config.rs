use std::fmt;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::RangingError;

/// Longest echo accepted, relative to the round trip at rated range.
const OUT_OF_RANGE_MARGIN: f64 = 1.05;

/// Sensor and timing parameters for a ranger.
///
/// The defaults describe an HC-SR04 style sensor in air at room temperature.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangerConfig {
    /// Speed of sound (cm/s).
    pub speed_of_sound_cm_per_s: f64,
    /// Furthest distance the sensor is rated for (cm).
    pub rated_range_cm: f64,
    /// How long to wait for a complete echo after triggering.
    pub echo_timeout: Duration,
    /// Width of the trigger pulse.
    pub trigger_pulse: Duration,
    /// How long a polled measurement may take in total.
    pub poll_deadline: Duration,
    /// Pause between echo samples when polling.
    pub poll_interval: Duration,
}

impl Default for RangerConfig {
    fn default() -> Self {
        RangerConfig {
            speed_of_sound_cm_per_s: 34_300.0,
            rated_range_cm: 250.0,
            echo_timeout: Duration::from_millis(20),
            trigger_pulse: Duration::from_micros(10),
            poll_deadline: Duration::from_millis(100),
            poll_interval: Duration::from_micros(5),
        }
    }
}

impl RangerConfig {
    /// Round-trip echo time for an object at the rated range.
    pub fn max_echo_time(&self) -> Duration {
        Duration::from_secs_f64(2.0 * self.rated_range_cm / self.speed_of_sound_cm_per_s)
    }

    /// Converts an echo pulse width into a distance.
    ///
    /// # Errors
    ///
    /// Returns `Err(RangingError::OutOfRange)` if the pulse is more than 5%
    /// longer than [`RangerConfig::max_echo_time`].
    pub fn distance_for(&self, echo: Duration) -> Result<Distance, RangingError> {
        if echo.as_secs_f64() > OUT_OF_RANGE_MARGIN * self.max_echo_time().as_secs_f64() {
            return Err(RangingError::OutOfRange(echo));
        }
        // The pulse covers the way out and back.
        Ok(Distance::from_cm(0.5 * echo.as_secs_f64() * self.speed_of_sound_cm_per_s))
    }
}

/// A measured distance.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Distance(f64);

impl Distance {
    /// Construct a distance from centimetres.
    pub const fn from_cm(cm: f64) -> Self {
        Distance(cm)
    }

    /// Distance in centimetres.
    pub fn as_cm(self) -> f64 {
        self.0
    }

    /// Distance in metres.
    pub fn as_m(self) -> f64 {
        self.0 / 100.0
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} cm", self.0)
    }
}
