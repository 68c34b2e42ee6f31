//! Error types for the PWM synthesizer.

use pinctl_gpio::GpioError;

/// Errors that can occur while configuring the PWM output.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PwmError {
    /// The requested duty cycle is not within `[0, 1]`.
    #[error("duty cycle {0} is outside [0, 1]")]
    DutyCycleOutOfRange(f64),
    /// The requested range is zero or above the controller maximum.
    #[error("range {range} is outside [1, {max}]")]
    RangeOutOfBounds {
        /// Requested range.
        range: u32,
        /// Largest range the controller accepts.
        max: u32,
    },
    /// Frequency synthesis was requested while in balanced mode.
    #[error("frequency cannot be set in balanced mode")]
    BalancedModeFrequency,
    /// No divisor/range pair satisfies the request.
    #[error("no divisor/range pair reaches {requested} Hz with a resolution of at least {min_resolution}")]
    FrequencyUnreachable {
        /// Requested frequency (Hz).
        requested: f64,
        /// Smallest acceptable range.
        min_resolution: u32,
    },
    /// The pin or register access failed.
    #[error(transparent)]
    Gpio(#[from] GpioError),
}
