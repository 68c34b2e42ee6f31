#![warn(missing_docs)]
#![doc = "Ultrasonic distance ranging over GPIO."]
#![doc = ""]
#![doc = "[`UltrasonicRanger`] times the echo of an HC-SR04 style sensor from edge"]
#![doc = "interrupts; [`PolledRanger`] does the same by sampling the echo line, for"]
#![doc = "backends without edge detection. Both share the [`EchoCapture`] state"]
#![doc = "machine and convert pulse widths with [`RangerConfig`]."]

pub mod capture;
mod config;
pub mod error;
mod polled;
mod ranger;

pub use capture::{EchoCapture, EchoState};
pub use config::{Distance, RangerConfig};
pub use error::RangingError;
pub use polled::PolledRanger;
pub use ranger::UltrasonicRanger;
