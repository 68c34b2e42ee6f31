use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use pinctl_gpio::{
    DigitalPin, Direction, Edge, EdgeDetect, EdgeInterrupt, GpioBackend, GpioError, Level, Pull,
};
use spin_sleep::SpinSleeper;
use tracing::{debug, info, trace};

use crate::capture::{EchoCapture, EchoState};
use crate::config::{Distance, RangerConfig};
use crate::error::RangingError;

/// Capture shared between the measuring thread and the edge callback.
#[derive(Default)]
struct Shared {
    capture: Mutex<EchoCapture>,
    done: Condvar,
}

/// Interrupt-driven ultrasonic ranger.
///
/// The echo pin's edge callback timestamps the pulse; the measuring thread
/// sleeps on a condition variable until both edges are in or the echo
/// timeout passes. Each ranger owns its own capture, so several rangers can
/// measure at the same time.
pub struct UltrasonicRanger<B: EdgeDetect> {
    trigger: Mutex<DigitalPin<B>>,
    echo: EdgeInterrupt<B>,
    shared: Arc<Shared>,
    busy: AtomicBool,
    config: RangerConfig,
}

impl<B: EdgeDetect> UltrasonicRanger<B> {
    /// Claims the trigger pin as an output driven low and the echo pin as an
    /// input without pull, and installs the echo callback.
    ///
    /// # Errors
    ///
    /// Fails with `RangingError::Gpio` if either pin cannot be claimed or the
    /// backend has no edge detection.
    pub fn new(
        backend: Arc<B>,
        trigger_pin: u8,
        echo_pin: u8,
        config: RangerConfig,
    ) -> Result<Self, RangingError> {
        let mut trigger = DigitalPin::new(Arc::clone(&backend), trigger_pin, Direction::Output)?;
        trigger.set_low()?;

        let mut echo = EdgeInterrupt::new(backend, echo_pin)?;
        echo.set_pull(Pull::Off)?;

        let shared = Arc::new(Shared::default());
        let sink = Arc::clone(&shared);
        echo.register_callback(Edge::Both, move |event| {
            let mut capture = sink.capture.lock();
            if capture.on_edge(event) {
                sink.done.notify_all();
            }
        })?;

        info!(trigger_pin, echo_pin, "ultrasonic ranger ready");
        Ok(UltrasonicRanger {
            trigger: Mutex::new(trigger),
            echo,
            shared,
            busy: AtomicBool::new(false),
            config,
        })
    }

    /// Sends a trigger pulse and times the echo.
    ///
    /// Blocks for at most the configured echo timeout after the trigger.
    ///
    /// # Errors
    ///
    /// * `MeasurementInProgress` if another call on this ranger is still
    ///   running, and `EchoHigh` if the echo line is already high. Debug
    ///   builds panic on both.
    /// * `NoEcho` if no complete pulse arrives in time.
    /// * `OutOfRange` if the pulse is longer than the rated range allows.
    ///
    /// The ranger is idle again whenever this returns.
    pub fn measure_distance(&self) -> Result<Distance, RangingError> {
        let _in_flight = InFlight::claim(&self.busy)?;
        check_echo_low(self.echo.read()?)?;
        self.shared.capture.lock().arm(Instant::now());

        if let Err(e) = self.send_trigger() {
            self.shared.capture.lock().reset();
            return Err(e.into());
        }

        let deadline = Instant::now() + self.config.echo_timeout;
        let width = {
            let mut capture = self.shared.capture.lock();
            while capture.state() != EchoState::Done {
                if self.shared.done.wait_until(&mut capture, deadline).timed_out() {
                    break;
                }
            }
            let width = capture.pulse_width();
            if width.is_none() {
                debug!(echo_pin = self.echo.pin(), state = ?capture.state(), "echo timed out");
            }
            capture.reset();
            width
        };

        let width = width.ok_or(RangingError::NoEcho)?;
        let distance = self.config.distance_for(width)?;
        trace!(?width, %distance, "echo captured");
        Ok(distance)
    }

    /// Current phase of the echo capture.
    pub fn state(&self) -> EchoState {
        self.shared.capture.lock().state()
    }

    /// Sensor and timing parameters.
    pub fn config(&self) -> &RangerConfig {
        &self.config
    }

    fn send_trigger(&self) -> Result<(), GpioError> {
        send_trigger(&mut self.trigger.lock(), self.config.trigger_pulse)
    }
}

/// Marks a measurement as running for as long as it is held.
///
/// The capture alone cannot tell: stray echo edges may return it to `Idle`
/// while the measuring thread is still waiting.
pub(crate) struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    pub(crate) fn claim(busy: &'a AtomicBool) -> Result<Self, RangingError> {
        let claimed = busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok();
        debug_assert!(claimed, "measurement already in progress");
        if !claimed {
            return Err(RangingError::MeasurementInProgress);
        }
        Ok(InFlight(busy))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A new measurement needs the echo line low.
pub(crate) fn check_echo_low(echo: Level) -> Result<(), RangingError> {
    let echo_low = echo.is_low();
    debug_assert!(echo_low, "echo line is high before triggering");
    if !echo_low {
        return Err(RangingError::EchoHigh);
    }
    Ok(())
}

/// Drives `trigger` high for `width`, then low.
pub(crate) fn send_trigger<B: GpioBackend>(
    trigger: &mut DigitalPin<B>,
    width: Duration,
) -> Result<(), GpioError> {
    trigger.set_high()?;
    SpinSleeper::default().sleep(width);
    trigger.set_low()
}
