use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::GpioError;
use crate::hal::{Direction, GpioBackend, Level, MAX_PIN, Pull};

/// A single claimed pin.
///
/// The pin tracks its own direction and pull state and rejects operations
/// that do not fit them. When dropped it is returned to a safe state: driven
/// low with the pull resistor disabled.
pub struct DigitalPin<B: GpioBackend> {
    backend: Arc<B>,
    pin: u8,
    direction: Direction,
    pull: Pull,
}

impl<B: GpioBackend> DigitalPin<B> {
    /// Claims `pin` and configures it for `direction`.
    ///
    /// The backend is initialised on first use; later constructions reuse it.
    ///
    /// # Errors
    ///
    /// Returns `Err(GpioError::InvalidPin)` if `pin` is above [`MAX_PIN`],
    /// `Err(GpioError::NotPwmCapable)` if `PwmOutput` is requested on a pin
    /// without a PWM channel, or any backend failure.
    pub fn new(backend: Arc<B>, pin: u8, direction: Direction) -> Result<Self, GpioError> {
        if pin > MAX_PIN {
            return Err(GpioError::InvalidPin(pin));
        }
        backend.initialize()?;

        let mut claimed = DigitalPin {
            backend,
            pin,
            direction,
            pull: Pull::Off,
        };
        claimed.configure(direction)?;
        Ok(claimed)
    }

    /// Returns the pin number.
    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// Returns the current data direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Returns the current pull resistor state.
    pub fn pull(&self) -> Pull {
        self.pull
    }

    /// Returns the backend this pin is bound to.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Changes the data direction.
    ///
    /// Switching to an output disables the pull resistor first.
    pub fn configure(&mut self, direction: Direction) -> Result<(), GpioError> {
        if direction == Direction::PwmOutput && !self.backend.is_pwm_capable(self.pin) {
            return Err(GpioError::NotPwmCapable(self.pin));
        }

        if direction == Direction::Output {
            self.backend.set_pull(self.pin, Pull::Off)?;
            self.pull = Pull::Off;
        }

        self.backend.set_direction(self.pin, direction)?;
        self.direction = direction;
        debug!(pin = self.pin, ?direction, "pin configured");
        Ok(())
    }

    /// Sets the internal pull resistor.
    ///
    /// Only `Pull::Off` is accepted unless the pin is an input.
    pub fn set_pull(&mut self, pull: Pull) -> Result<(), GpioError> {
        if pull != Pull::Off {
            self.require(Direction::Input)?;
        }
        self.backend.set_pull(self.pin, pull)?;
        self.pull = pull;
        Ok(())
    }

    /// Drives the pin. Only valid for outputs.
    pub fn write(&mut self, level: Level) -> Result<(), GpioError> {
        self.require(Direction::Output)?;
        self.backend.write(self.pin, level)
    }

    /// Drives the pin high.
    pub fn set_high(&mut self) -> Result<(), GpioError> {
        self.write(Level::High)
    }

    /// Drives the pin low.
    pub fn set_low(&mut self) -> Result<(), GpioError> {
        self.write(Level::Low)
    }

    /// Samples the pin. Only valid for inputs.
    pub fn read(&self) -> Result<Level, GpioError> {
        self.require(Direction::Input)?;
        self.backend.read(self.pin)
    }

    fn require(&self, required: Direction) -> Result<(), GpioError> {
        if self.direction == required {
            Ok(())
        } else {
            Err(GpioError::WrongDirection {
                pin: self.pin,
                actual: self.direction,
                required,
            })
        }
    }
}

impl<B: GpioBackend> Drop for DigitalPin<B> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.write(self.pin, Level::Low) {
            warn!(pin = self.pin, error = %e, "failed to drive pin low on release");
        }
        if let Err(e) = self.backend.set_pull(self.pin, Pull::Off) {
            warn!(pin = self.pin, error = %e, "failed to disable pull resistor on release");
        }
    }
}

impl<B: GpioBackend> core::fmt::Debug for DigitalPin<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DigitalPin")
            .field("pin", &self.pin)
            .field("direction", &self.direction)
            .field("pull", &self.pull)
            .finish()
    }
}
