#![warn(missing_docs)]
#![doc = "Hardware PWM output with frequency synthesis."]
#![doc = ""]
#![doc = "The PWM controller divides a fixed oscillator by an integer clock divisor"]
#![doc = "and counts up to an integer range, so the output frequency is"]
#![doc = "`clock / divisor / range` and the duty cycle has `range` steps."]
#![doc = "[`synthesize`] picks the pair for a requested frequency and"]
#![doc = "[`PwmSynthesizer`] applies it to a pin."]

pub mod error;
pub mod search;
mod synthesizer;

pub use error::PwmError;
pub use pinctl_gpio::PwmMode;
pub use search::{ClockSettings, PwmLimits, synthesize};
pub use synthesizer::{DEFAULT_MIN_RESOLUTION, DEFAULT_RANGE, PwmSynthesizer};
