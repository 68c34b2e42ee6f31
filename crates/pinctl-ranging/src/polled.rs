use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use parking_lot::Mutex;
use pinctl_gpio::{DigitalPin, Direction, EdgeEvent, GpioBackend, Level, Pull};
use spin_sleep::SpinSleeper;
use tracing::{debug, info, trace};

use crate::capture::{EchoCapture, EchoState};
use crate::config::{Distance, RangerConfig};
use crate::error::RangingError;
use crate::ranger::{InFlight, check_echo_low, send_trigger};

/// Ultrasonic ranger for backends without edge detection.
///
/// Samples the echo line in a tight loop after the trigger and feeds level
/// changes into the same capture the interrupt-driven ranger uses. The whole
/// measurement is bounded by `poll_deadline`.
pub struct PolledRanger<B: GpioBackend> {
    trigger: Mutex<DigitalPin<B>>,
    echo: DigitalPin<B>,
    capture: Mutex<EchoCapture>,
    busy: AtomicBool,
    config: RangerConfig,
}

impl<B: GpioBackend> PolledRanger<B> {
    /// Claims the trigger pin as an output driven low and the echo pin as an
    /// input without pull.
    pub fn new(
        backend: Arc<B>,
        trigger_pin: u8,
        echo_pin: u8,
        config: RangerConfig,
    ) -> Result<Self, RangingError> {
        let mut trigger = DigitalPin::new(Arc::clone(&backend), trigger_pin, Direction::Output)?;
        trigger.set_low()?;

        let mut echo = DigitalPin::new(backend, echo_pin, Direction::Input)?;
        echo.set_pull(Pull::Off)?;

        info!(trigger_pin, echo_pin, "polled ultrasonic ranger ready");
        Ok(PolledRanger {
            trigger: Mutex::new(trigger),
            echo,
            capture: Mutex::new(EchoCapture::new()),
            busy: AtomicBool::new(false),
            config,
        })
    }

    /// Sends a trigger pulse and times the echo by polling.
    ///
    /// Errors match
    /// [`UltrasonicRanger::measure_distance`](crate::UltrasonicRanger::measure_distance).
    pub fn measure_distance(&self) -> Result<Distance, RangingError> {
        let _in_flight = InFlight::claim(&self.busy)?;
        check_echo_low(self.echo.read()?)?;
        let started = Instant::now();
        self.capture.lock().arm(started);

        let result = self.poll_echo(started);
        let width = {
            let mut capture = self.capture.lock();
            let width = capture.pulse_width();
            if result.is_ok() && width.is_none() {
                debug!(
                    echo_pin = self.echo.pin(),
                    state = ?capture.state(),
                    "polled echo timed out"
                );
            }
            capture.reset();
            width
        };
        result?;

        let width = width.ok_or(RangingError::NoEcho)?;
        let distance = self.config.distance_for(width)?;
        trace!(?width, %distance, "echo captured");
        Ok(distance)
    }

    /// Current phase of the echo capture.
    pub fn state(&self) -> EchoState {
        self.capture.lock().state()
    }

    /// Sensor and timing parameters.
    pub fn config(&self) -> &RangerConfig {
        &self.config
    }

    // Runs until the capture is done or the deadline passes.
    fn poll_echo(&self, started: Instant) -> Result<(), RangingError> {
        send_trigger(&mut self.trigger.lock(), self.config.trigger_pulse)?;

        let deadline = started + self.config.poll_deadline;
        let sleeper = SpinSleeper::default();
        let mut previous = Level::Low;
        loop {
            let level = self.echo.read()?;
            let now = Instant::now();
            if level != previous {
                previous = level;
                if self.capture.lock().on_edge(EdgeEvent::new(level, now)) {
                    return Ok(());
                }
            }
            if now >= deadline {
                return Ok(());
            }
            sleeper.sleep(self.config.poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinctl_gpio::GpioError;
    use pinctl_gpio::sim::{EchoResponse, SimBackend};
    use std::sync::atomic::Ordering;
    use std::thread;
    use std::time::Duration;

    const TRIGGER: u8 = 5;
    const ECHO: u8 = 6;

    fn ranger(sim: &Arc<SimBackend>) -> PolledRanger<SimBackend> {
        PolledRanger::new(sim.clone(), TRIGGER, ECHO, RangerConfig::default()).unwrap()
    }

    #[test]
    fn test_polled_pulse_measures_distance() {
        let sim = Arc::new(SimBackend::without_edge_detection());
        let ranger = ranger(&sim);
        sim.attach_echo(
            TRIGGER,
            ECHO,
            EchoResponse::pulse(Duration::from_micros(500), Duration::from_millis(2)),
        );

        let distance = ranger.measure_distance().unwrap();
        // Polling adds a few microseconds of jitter on each edge.
        assert!((distance.as_cm() - 34.3).abs() < 3.0, "measured {distance}");
        assert_eq!(ranger.state(), EchoState::Idle);
    }

    #[test]
    fn test_polled_no_echo_hits_deadline() {
        let sim = Arc::new(SimBackend::without_edge_detection());
        let ranger = ranger(&sim);

        let started = Instant::now();
        assert_eq!(ranger.measure_distance(), Err(RangingError::NoEcho));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(ranger.state(), EchoState::Idle);
    }

    #[test]
    fn test_echo_fault_surfaces_before_trigger() {
        let sim = Arc::new(SimBackend::without_edge_detection());
        let ranger = ranger(&sim);
        sim.attach_echo(
            TRIGGER,
            ECHO,
            EchoResponse::pulse(Duration::from_micros(500), Duration::from_millis(2)),
        );
        sim.set_fault(ECHO, Some("open circuit"));

        assert!(matches!(
            ranger.measure_distance(),
            Err(RangingError::Gpio(GpioError::Backend(_)))
        ));
        assert_eq!(ranger.state(), EchoState::Idle);

        sim.set_fault(ECHO, None);
        assert!(ranger.measure_distance().is_ok());
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "already in progress"))]
    fn test_polled_overlap_rejected() {
        let sim = Arc::new(SimBackend::without_edge_detection());
        let ranger = Arc::new(ranger(&sim));
        sim.attach_echo(TRIGGER, ECHO, EchoResponse::rise_only(Duration::from_micros(100)));

        let background = Arc::clone(&ranger);
        let first = thread::spawn(move || background.measure_distance());
        while !ranger.busy.load(Ordering::Acquire) {
            thread::yield_now();
        }

        assert_eq!(ranger.measure_distance(), Err(RangingError::MeasurementInProgress));
        assert_eq!(first.join().unwrap(), Err(RangingError::NoEcho));
    }
}
