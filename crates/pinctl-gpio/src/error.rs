//! This module defines the error type used by the `pinctl-gpio` crate.

use crate::hal::Direction;

/// Error type for pin operations.
///
/// Backends map their own failures onto [`GpioError::Backend`]; the other
/// variants are raised by the pin wrappers when an operation does not fit the
/// pin's current configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GpioError {
    /// The pin number is outside the header range.
    #[error("pin {0} is outside the valid range 0..=40")]
    InvalidPin(u8),
    /// `PwmOutput` was requested on a pin without a hardware PWM channel.
    #[error("pin {0} is not hardware PWM capable")]
    NotPwmCapable(u8),
    /// The operation requires a different data direction.
    #[error("pin {pin} is configured as {actual:?}, operation requires {required:?}")]
    WrongDirection {
        /// Pin the operation was attempted on.
        pin: u8,
        /// Direction the pin currently has.
        actual: Direction,
        /// Direction the operation needs.
        required: Direction,
    },
    /// The pin cannot be reconfigured while an edge callback is installed.
    #[error("pin {0} has an edge callback installed")]
    CallbackInstalled(u8),
    /// The backend does not implement this capability.
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),
    /// The underlying hardware layer reported a failure.
    #[error("backend failure: {0}")]
    Backend(String),
}
