//! Hardware capability traits and the value types they exchange.
//!
//! The pin wrappers in this crate never talk to hardware directly. They go
//! through [`GpioBackend`] and, where needed, the extended capabilities
//! [`EdgeDetect`] and [`PwmController`]. Anything that implements these
//! traits can drive a [`DigitalPin`](crate::DigitalPin), including the
//! simulated backend in [`sim`](crate::sim).

use std::time::Instant;

use parking_lot::Mutex;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::GpioError;

/// Highest pin number accepted by [`DigitalPin`](crate::DigitalPin).
pub const MAX_PIN: u8 = 40;

/// Pin carrying the hardware PWM channel on the default board layout
/// (BCM numbering).
pub const HARDWARE_PWM_PIN: u8 = 18;

/// Logic level of a pin.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Level {
    /// Logic 0.
    #[default]
    Low,
    /// Logic 1.
    High,
}

impl Level {
    /// Returns `true` for [`Level::High`].
    pub fn is_high(self) -> bool {
        self == Level::High
    }

    /// Returns `true` for [`Level::Low`].
    pub fn is_low(self) -> bool {
        self == Level::Low
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high { Level::High } else { Level::Low }
    }
}

/// Data direction of a pin.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// High impedance input.
    Input,
    /// Push-pull output.
    Output,
    /// Output routed to the hardware PWM channel.
    PwmOutput,
}

/// State of the internal pull resistor.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pull {
    /// No pull resistor.
    #[default]
    Off,
    /// Pull towards the supply rail.
    Up,
    /// Pull towards ground.
    Down,
}

/// Which transitions an edge callback fires on.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Low to high transitions.
    Rising,
    /// High to low transitions.
    Falling,
    /// Every transition.
    Both,
    /// Whatever edge selection the platform was configured with beforehand.
    Preconfigured,
}

impl Edge {
    /// Returns whether a transition ending at `level` matches this selection.
    ///
    /// `Preconfigured` matches everything: the platform has already filtered
    /// the edges before they reach the callback.
    pub fn matches(self, level: Level) -> bool {
        match self {
            Edge::Rising => level.is_high(),
            Edge::Falling => level.is_low(),
            Edge::Both | Edge::Preconfigured => true,
        }
    }
}

/// A single detected transition, delivered to edge callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEvent {
    /// Level the pin settled at after the transition.
    pub level: Level,
    /// When the transition was observed.
    pub timestamp: Instant,
}

impl EdgeEvent {
    /// Construct a new edge event.
    pub const fn new(level: Level, timestamp: Instant) -> Self {
        EdgeEvent { level, timestamp }
    }
}

/// Pulse distribution mode of the PWM controller.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PwmMode {
    /// Pulses are spread across the period to balance the output over time.
    /// The effective frequency then depends on the duty cycle.
    Balanced,
    /// Classical PWM: the pulse occupies the first `duty * range` ticks of
    /// each period.
    #[default]
    MarkSpace,
}

/// Callback invoked for every matching edge.
pub type EdgeCallback = Box<dyn FnMut(EdgeEvent) + Send + 'static>;

/// Base capability: configure pins and move levels in and out.
///
/// Implementations are shared between pins through an `Arc`, so every method
/// takes `&self`. Direction checks are done by the pin wrappers; a backend
/// simply applies what it is told.
pub trait GpioBackend: Send + Sync {
    /// Brings up the hardware layer.
    ///
    /// Called on every pin construction. Implementations must make this
    /// idempotent, see [`InitGuard`].
    fn initialize(&self) -> Result<(), GpioError>;

    /// Returns whether `pin` carries a hardware PWM channel.
    fn is_pwm_capable(&self, pin: u8) -> bool {
        pin == HARDWARE_PWM_PIN
    }

    /// Sets the data direction of `pin`.
    fn set_direction(&self, pin: u8, direction: Direction) -> Result<(), GpioError>;

    /// Sets the internal pull resistor of `pin`.
    fn set_pull(&self, pin: u8, pull: Pull) -> Result<(), GpioError>;

    /// Drives `pin` to `level`.
    fn write(&self, pin: u8, level: Level) -> Result<(), GpioError>;

    /// Samples the level of `pin`.
    fn read(&self, pin: u8) -> Result<Level, GpioError>;
}

/// Extended capability for backends that can report edges asynchronously.
///
/// The callback must run on a context owned by the backend (an interrupt
/// thread, a watcher thread), never on the thread that subscribed. Events for
/// one pin are delivered in the order the edges occurred.
pub trait EdgeDetect: GpioBackend {
    /// Installs `callback` for `pin`, replacing any previous one.
    fn subscribe(&self, pin: u8, edge: Edge, callback: EdgeCallback) -> Result<(), GpioError>;

    /// Removes the callback for `pin`. Removing a missing callback is not an
    /// error.
    fn unsubscribe(&self, pin: u8) -> Result<(), GpioError>;
}

/// Extended capability for backends exposing the PWM controller registers.
pub trait PwmController: GpioBackend {
    /// Writes the PWM clock divisor register.
    fn set_clock_divisor(&self, divisor: u32) -> Result<(), GpioError>;

    /// Writes the PWM range register.
    fn set_range(&self, range: u32) -> Result<(), GpioError>;

    /// Writes the duty register of the channel on `pin`.
    fn write_duty(&self, pin: u8, value: u32) -> Result<(), GpioError>;

    /// Selects balanced or mark-space pulse distribution.
    fn set_mode(&self, mode: PwmMode) -> Result<(), GpioError>;
}

/// Runs a fallible initialisation at most once.
///
/// A failed attempt leaves the guard open so the next caller retries.
#[derive(Debug, Default)]
pub struct InitGuard {
    done: Mutex<bool>,
}

impl InitGuard {
    /// Construct an unused guard.
    pub const fn new() -> Self {
        InitGuard {
            done: Mutex::new(false),
        }
    }

    /// Runs `init` unless a previous call already succeeded.
    pub fn call_once<F>(&self, init: F) -> Result<(), GpioError>
    where
        F: FnOnce() -> Result<(), GpioError>,
    {
        let mut done = self.done.lock();
        if !*done {
            init()?;
            *done = true;
        }
        Ok(())
    }

    /// Returns whether initialisation has completed.
    pub fn is_done(&self) -> bool {
        *self.done.lock()
    }
}
