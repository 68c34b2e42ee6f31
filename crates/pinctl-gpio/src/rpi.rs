//! Raspberry Pi backend built on `rppal`.
//!
//! Digital I/O and edge interrupts map directly onto `rppal::gpio`. The PWM
//! controller registers are emulated on top of the kernel PWM driver: the
//! divisor and range are turned into a period, the duty register into a
//! pulse width. Balanced mode has no kernel equivalent and is rejected.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rppal::gpio::{self, Gpio, InputPin, IoPin, Mode, OutputPin, PullUpDown, Trigger};
use rppal::pwm::{Channel, Polarity, Pwm};
use tracing::{debug, trace};

use crate::error::GpioError;
use crate::hal::{
    Direction, Edge, EdgeCallback, EdgeDetect, EdgeEvent, GpioBackend, InitGuard, Level, Pull,
    PwmController, PwmMode,
};

/// Base clock feeding the PWM divisor.
const PWM_CLOCK_HZ: f64 = 19.2e6;

enum Slot {
    Input(InputPin),
    Output(OutputPin),
    Alt(IoPin),
}

#[derive(Debug, Default)]
struct PwmShadow {
    divisor: Option<u32>,
    range: Option<u32>,
    duty: u32,
}

impl PwmShadow {
    fn timing(&self) -> Option<(Duration, Duration)> {
        let (divisor, range) = (self.divisor?, self.range?);
        let tick = divisor as f64 / PWM_CLOCK_HZ;
        let period = Duration::from_secs_f64(tick * range as f64);
        let pulse = Duration::from_secs_f64(tick * self.duty.min(range) as f64);
        Some((period, pulse))
    }
}

/// Backend for the Raspberry Pi header, BCM pin numbering.
pub struct RppalBackend {
    init: InitGuard,
    gpio: OnceLock<Gpio>,
    pins: Mutex<HashMap<u8, Slot>>,
    // Inputs with an async interrupt. Reclaiming one would drop it.
    listening: Mutex<HashSet<u8>>,
    pwm: Mutex<Option<Pwm>>,
    shadow: Mutex<PwmShadow>,
}

impl Default for RppalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RppalBackend {
    /// Construct the backend. The GPIO device is opened lazily on first pin
    /// construction.
    pub fn new() -> Self {
        RppalBackend {
            init: InitGuard::new(),
            gpio: OnceLock::new(),
            pins: Mutex::new(HashMap::new()),
            listening: Mutex::new(HashSet::new()),
            pwm: Mutex::new(None),
            shadow: Mutex::new(PwmShadow::default()),
        }
    }

    fn check_not_listening(&self, pin: u8) -> Result<(), GpioError> {
        if self.listening.lock().contains(&pin) {
            return Err(GpioError::CallbackInstalled(pin));
        }
        Ok(())
    }

    fn gpio(&self) -> Result<&Gpio, GpioError> {
        self.gpio
            .get()
            .ok_or(GpioError::Backend("gpio not initialised".into()))
    }

    fn claim(&self, pin: u8) -> Result<gpio::Pin, GpioError> {
        self.gpio()?.get(pin).map_err(backend_err)
    }

    fn apply_pwm(&self) -> Result<(), GpioError> {
        let Some((period, pulse)) = self.shadow.lock().timing() else {
            return Ok(());
        };

        let mut guard = self.pwm.lock();
        match guard.as_mut() {
            Some(pwm) => {
                pwm.set_pulse_width(Duration::ZERO).map_err(backend_err)?;
                pwm.set_period(period).map_err(backend_err)?;
                pwm.set_pulse_width(pulse).map_err(backend_err)?;
            }
            None => {
                let pwm = Pwm::with_period(Channel::Pwm0, period, pulse, Polarity::Normal, true)
                    .map_err(backend_err)?;
                *guard = Some(pwm);
            }
        }
        debug!(?period, ?pulse, "pwm timing applied");
        Ok(())
    }
}

fn backend_err(e: impl std::fmt::Display) -> GpioError {
    GpioError::Backend(e.to_string())
}

fn to_rppal(level: Level) -> gpio::Level {
    match level {
        Level::Low => gpio::Level::Low,
        Level::High => gpio::Level::High,
    }
}

fn from_rppal(level: gpio::Level) -> Level {
    match level {
        gpio::Level::Low => Level::Low,
        gpio::Level::High => Level::High,
    }
}

impl GpioBackend for RppalBackend {
    fn initialize(&self) -> Result<(), GpioError> {
        self.init.call_once(|| {
            let gpio = Gpio::new().map_err(backend_err)?;
            let _ = self.gpio.set(gpio);
            debug!("rppal gpio opened");
            Ok(())
        })
    }

    fn set_direction(&self, pin: u8, direction: Direction) -> Result<(), GpioError> {
        self.check_not_listening(pin)?;
        let mut pins = self.pins.lock();
        pins.remove(&pin);

        let raw = self.claim(pin)?;
        let slot = match direction {
            Direction::Input => {
                let mut p = raw.into_input();
                p.set_reset_on_drop(false);
                Slot::Input(p)
            }
            Direction::Output => {
                let mut p = raw.into_output();
                p.set_reset_on_drop(false);
                Slot::Output(p)
            }
            Direction::PwmOutput => {
                let mut p = raw.into_io(Mode::Alt5);
                p.set_reset_on_drop(false);
                Slot::Alt(p)
            }
        };
        pins.insert(pin, slot);
        Ok(())
    }

    fn set_pull(&self, pin: u8, pull: Pull) -> Result<(), GpioError> {
        self.check_not_listening(pin)?;
        let mut pins = self.pins.lock();
        if matches!(pins.get(&pin), Some(Slot::Input(_))) {
            // InputPin has no pull setter; reclaim the pin with the new pull.
            pins.remove(&pin);
            let raw = self.claim(pin)?;
            let mut p = match pull {
                Pull::Off => raw.into_input(),
                Pull::Up => raw.into_input_pullup(),
                Pull::Down => raw.into_input_pulldown(),
            };
            p.set_reset_on_drop(false);
            pins.insert(pin, Slot::Input(p));
        } else if let Some(Slot::Alt(p)) = pins.get_mut(&pin) {
            p.set_pullupdown(match pull {
                Pull::Off => PullUpDown::Off,
                Pull::Up => PullUpDown::PullUp,
                Pull::Down => PullUpDown::PullDown,
            });
        } else {
            // Output drivers are push-pull, the pull resistor has no effect.
            trace!(pin, ?pull, "pull ignored");
        }
        Ok(())
    }

    fn write(&self, pin: u8, level: Level) -> Result<(), GpioError> {
        match self.pins.lock().get_mut(&pin) {
            Some(Slot::Output(p)) => p.write(to_rppal(level)),
            Some(Slot::Alt(p)) => p.write(to_rppal(level)),
            _ => trace!(pin, ?level, "write to non-output pin ignored"),
        }
        Ok(())
    }

    fn read(&self, pin: u8) -> Result<Level, GpioError> {
        match self.pins.lock().get(&pin) {
            Some(Slot::Input(p)) => Ok(from_rppal(p.read())),
            Some(Slot::Output(p)) => Ok(Level::from(p.is_set_high())),
            Some(Slot::Alt(p)) => Ok(from_rppal(p.read())),
            None => Err(GpioError::Backend(format!("pin {pin} is not claimed"))),
        }
    }
}

impl EdgeDetect for RppalBackend {
    fn subscribe(&self, pin: u8, edge: Edge, mut callback: EdgeCallback) -> Result<(), GpioError> {
        let trigger = match edge {
            Edge::Rising => Trigger::RisingEdge,
            Edge::Falling => Trigger::FallingEdge,
            Edge::Both | Edge::Preconfigured => Trigger::Both,
        };

        match self.pins.lock().get_mut(&pin) {
            Some(Slot::Input(p)) => p
                .set_async_interrupt(trigger, move |level| {
                    callback(EdgeEvent::new(from_rppal(level), Instant::now()));
                })
                .map_err(backend_err)?,
            _ => return Err(GpioError::Backend(format!("pin {pin} is not an input"))),
        }
        self.listening.lock().insert(pin);
        Ok(())
    }

    fn unsubscribe(&self, pin: u8) -> Result<(), GpioError> {
        if let Some(Slot::Input(p)) = self.pins.lock().get_mut(&pin) {
            p.clear_async_interrupt().map_err(backend_err)?;
        }
        self.listening.lock().remove(&pin);
        Ok(())
    }
}

impl PwmController for RppalBackend {
    fn set_clock_divisor(&self, divisor: u32) -> Result<(), GpioError> {
        self.shadow.lock().divisor = Some(divisor);
        self.apply_pwm()
    }

    fn set_range(&self, range: u32) -> Result<(), GpioError> {
        self.shadow.lock().range = Some(range);
        self.apply_pwm()
    }

    fn write_duty(&self, _pin: u8, value: u32) -> Result<(), GpioError> {
        self.shadow.lock().duty = value;
        self.apply_pwm()
    }

    fn set_mode(&self, mode: PwmMode) -> Result<(), GpioError> {
        match mode {
            PwmMode::MarkSpace => Ok(()),
            PwmMode::Balanced => Err(GpioError::Unsupported("balanced PWM mode")),
        }
    }
}
