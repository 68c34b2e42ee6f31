#![warn(missing_docs)]
#![doc = "Digital pins, edge interrupts and PWM register access for single-board computers."]
#![doc = ""]
#![doc = "Pins talk to hardware through the capability traits in [`hal`]. The"]
#![doc = "[`sim`] backend implements all of them in memory; the `rppal` feature adds"]
#![doc = "a Raspberry Pi backend."]

pub mod error;
pub mod hal;
mod interrupt;
mod pin;
#[cfg(feature = "rppal")]
pub mod rpi;
pub mod sim;

pub use error::GpioError;
pub use hal::{
    Direction, Edge, EdgeCallback, EdgeDetect, EdgeEvent, GpioBackend, HARDWARE_PWM_PIN,
    InitGuard, Level, MAX_PIN, Pull, PwmController, PwmMode,
};
pub use interrupt::EdgeInterrupt;
pub use pin::DigitalPin;
