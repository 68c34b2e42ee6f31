//! Error types for the ranging crate.

use std::time::Duration;

use pinctl_gpio::GpioError;

/// Errors that can occur during a distance measurement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangingError {
    /// Another measurement on the same ranger has not finished.
    #[error("a measurement is already in progress")]
    MeasurementInProgress,
    /// The echo line was high before the trigger pulse was sent.
    #[error("echo line is high before triggering")]
    EchoHigh,
    /// No complete echo pulse arrived before the timeout.
    #[error("no echo received")]
    NoEcho,
    /// The echo pulse is longer than the sensor's rated range allows.
    #[error("echo pulse of {0:?} is beyond the rated range")]
    OutOfRange(Duration),
    /// Pin access failed.
    #[error(transparent)]
    Gpio(#[from] GpioError),
}
