//! Simulated backend for tests and hardware-free runs.
//!
//! [`SimBackend`] implements every capability trait in memory. Edge callbacks
//! run on one dispatcher thread per subscribed pin, fed through a channel, so
//! they are asynchronous to the caller and keep their order.
//!
//! Ultrasonic sensors are modelled with [`EchoResponse`]: once attached to a
//! trigger/echo pin pair, every high-to-low transition on the trigger produces
//! an echo pulse. With edge detection enabled the pulse is delivered as two
//! edge events carrying exact timestamps, and the trigger write returns only
//! after the echo pin's callback has seen them. Without edge detection the
//! echo level follows the pulse in real time, for pollers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::GpioError;
use crate::hal::{
    Direction, Edge, EdgeCallback, EdgeDetect, EdgeEvent, GpioBackend, HARDWARE_PWM_PIN,
    InitGuard, Level, Pull, PwmController, PwmMode,
};

/// Echo pulse produced in answer to a trigger pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoResponse {
    /// Time from the trigger falling edge to the echo rising edge.
    pub delay: Duration,
    /// Echo pulse width. `None` leaves the echo stuck high.
    pub width: Option<Duration>,
    /// Gap before a second pulse of the same width, as a reflection off a
    /// second surface would produce. Only delivered as edge events.
    pub repeat_after: Option<Duration>,
}

impl EchoResponse {
    /// A complete echo pulse.
    pub const fn pulse(delay: Duration, width: Duration) -> Self {
        EchoResponse {
            delay,
            width: Some(width),
            repeat_after: None,
        }
    }

    /// Two identical pulses, the second starting `gap` after the first ends.
    pub const fn doubled(delay: Duration, width: Duration, gap: Duration) -> Self {
        EchoResponse {
            delay,
            width: Some(width),
            repeat_after: Some(gap),
        }
    }

    /// A rising edge that is never followed by a falling edge.
    pub const fn rise_only(delay: Duration) -> Self {
        EchoResponse {
            delay,
            width: None,
            repeat_after: None,
        }
    }
}

#[derive(Debug, Default)]
struct SimPin {
    direction: Option<Direction>,
    pull: Pull,
    level: Level,
    // Real-time echo window used when edge detection is off.
    window: Option<(Instant, Option<Instant>)>,
    fault: Option<String>,
}

impl SimPin {
    fn sample(&mut self, now: Instant) -> Level {
        if let Some((rise, fall)) = self.window {
            if now < rise {
                return Level::Low;
            }
            match fall {
                Some(fall) if now >= fall => {
                    self.window = None;
                    self.level = Level::Low;
                }
                _ => return Level::High,
            }
        }
        self.level
    }

    fn check_fault(&self) -> Result<(), GpioError> {
        match &self.fault {
            Some(msg) => Err(GpioError::Backend(msg.clone())),
            None => Ok(()),
        }
    }
}

enum Delivery {
    Edge(EdgeEvent),
    // Acknowledged once every edge queued before it has been handled.
    Flush(mpsc::Sender<()>),
}

struct Dispatcher {
    edge: Edge,
    tx: mpsc::Sender<Delivery>,
    handle: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct PwmRegisters {
    divisor: Option<u32>,
    range: Option<u32>,
    mode: Option<PwmMode>,
    duty: HashMap<u8, u32>,
    writes: usize,
}

/// In-memory implementation of [`GpioBackend`], [`EdgeDetect`] and
/// [`PwmController`].
pub struct SimBackend {
    init: InitGuard,
    init_count: AtomicUsize,
    edges_supported: bool,
    pwm_pin: u8,
    pins: Mutex<HashMap<u8, SimPin>>,
    subscribers: Mutex<HashMap<u8, Dispatcher>>,
    echoes: Mutex<HashMap<u8, (u8, EchoResponse)>>,
    pwm: Mutex<PwmRegisters>,
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBackend {
    /// A backend with edge detection and the hardware PWM channel on
    /// [`HARDWARE_PWM_PIN`].
    pub fn new() -> Self {
        SimBackend {
            init: InitGuard::new(),
            init_count: AtomicUsize::new(0),
            edges_supported: true,
            pwm_pin: HARDWARE_PWM_PIN,
            pins: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            echoes: Mutex::new(HashMap::new()),
            pwm: Mutex::new(PwmRegisters::default()),
        }
    }

    /// A backend whose [`EdgeDetect::subscribe`] reports `Unsupported`.
    pub fn without_edge_detection() -> Self {
        SimBackend {
            edges_supported: false,
            ..Self::new()
        }
    }

    /// Moves the hardware PWM channel to `pin`.
    pub fn with_pwm_pin(mut self, pin: u8) -> Self {
        self.pwm_pin = pin;
        self
    }

    /// Number of times the hardware layer was actually brought up.
    pub fn init_count(&self) -> usize {
        self.init_count.load(Ordering::SeqCst)
    }

    /// Current direction of `pin`, if it was ever configured.
    pub fn direction(&self, pin: u8) -> Option<Direction> {
        self.pins.lock().get(&pin).and_then(|p| p.direction)
    }

    /// Current pull state of `pin`.
    pub fn pull(&self, pin: u8) -> Pull {
        self.pins.lock().get(&pin).map(|p| p.pull).unwrap_or_default()
    }

    /// Current level of `pin`.
    pub fn level(&self, pin: u8) -> Level {
        self.pins
            .lock()
            .entry(pin)
            .or_default()
            .sample(Instant::now())
    }

    /// Forces the level of `pin` without generating an edge event.
    pub fn set_level(&self, pin: u8, level: Level) {
        let mut pins = self.pins.lock();
        let state = pins.entry(pin).or_default();
        state.window = None;
        state.level = level;
    }

    /// Makes every read and write on `pin` fail with `message`, or clears the
    /// fault when `None`.
    pub fn set_fault(&self, pin: u8, message: Option<&str>) {
        self.pins.lock().entry(pin).or_default().fault = message.map(str::to_owned);
    }

    /// Returns whether an edge callback is installed on `pin`.
    pub fn has_subscriber(&self, pin: u8) -> bool {
        self.subscribers.lock().contains_key(&pin)
    }

    /// Sets the level of `pin` and delivers the matching edge event, as if
    /// the transition happened at `timestamp`.
    pub fn inject_edge(&self, pin: u8, level: Level, timestamp: Instant) {
        {
            let mut pins = self.pins.lock();
            let state = pins.entry(pin).or_default();
            state.window = None;
            state.level = level;
        }

        let subscribers = self.subscribers.lock();
        if let Some(dispatcher) = subscribers.get(&pin) {
            if dispatcher.edge.matches(level) {
                trace!(pin, ?level, "dispatching simulated edge");
                let _ = dispatcher.tx.send(Delivery::Edge(EdgeEvent::new(level, timestamp)));
            }
        }
    }

    /// Blocks until the callback on `pin` has handled every edge injected so
    /// far. Returns at once if `pin` has no callback or when called from
    /// inside that callback.
    pub fn flush_edges(&self, pin: u8) {
        let (ack_tx, ack_rx) = mpsc::channel();
        {
            let subscribers = self.subscribers.lock();
            let Some(dispatcher) = subscribers.get(&pin) else {
                return;
            };
            if dispatcher.handle.thread().id() == thread::current().id() {
                return;
            }
            if dispatcher.tx.send(Delivery::Flush(ack_tx)).is_err() {
                return;
            }
        }
        let _ = ack_rx.recv();
    }

    /// Answers every trigger pulse on `trigger` with `response` on `echo`.
    pub fn attach_echo(&self, trigger: u8, echo: u8, response: EchoResponse) {
        self.echoes.lock().insert(trigger, (echo, response));
    }

    /// Stops answering trigger pulses on `trigger`.
    pub fn detach_echo(&self, trigger: u8) {
        self.echoes.lock().remove(&trigger);
    }

    /// Last committed PWM clock divisor.
    pub fn pwm_divisor(&self) -> Option<u32> {
        self.pwm.lock().divisor
    }

    /// Last committed PWM range.
    pub fn pwm_range(&self) -> Option<u32> {
        self.pwm.lock().range
    }

    /// Last committed PWM mode.
    pub fn pwm_mode(&self) -> Option<PwmMode> {
        self.pwm.lock().mode
    }

    /// Last committed duty register value for `pin`.
    pub fn pwm_duty(&self, pin: u8) -> Option<u32> {
        self.pwm.lock().duty.get(&pin).copied()
    }

    /// Total number of PWM register writes.
    pub fn pwm_writes(&self) -> usize {
        self.pwm.lock().writes
    }

    fn respond_to_trigger(&self, trigger: u8, released_at: Instant) {
        let Some((echo, response)) = self.echoes.lock().get(&trigger).copied() else {
            return;
        };

        let rise = released_at + response.delay;
        let fall = response.width.map(|width| rise + width);
        debug!(trigger, echo, ?response, "simulated echo");

        if self.edges_supported {
            self.inject_edge(echo, Level::High, rise);
            if let Some(fall) = fall {
                self.inject_edge(echo, Level::Low, fall);
                if let (Some(gap), Some(width)) = (response.repeat_after, response.width) {
                    self.inject_edge(echo, Level::High, fall + gap);
                    self.inject_edge(echo, Level::Low, fall + gap + width);
                }
            }
            self.flush_edges(echo);
        } else {
            self.pins.lock().entry(echo).or_default().window = Some((rise, fall));
        }
    }

    fn with_pin<T>(&self, pin: u8, f: impl FnOnce(&mut SimPin) -> T) -> Result<T, GpioError> {
        let mut pins = self.pins.lock();
        let state = pins.entry(pin).or_default();
        state.check_fault()?;
        Ok(f(state))
    }

    fn record_pwm(&self, f: impl FnOnce(&mut PwmRegisters)) {
        let mut pwm = self.pwm.lock();
        f(&mut pwm);
        pwm.writes += 1;
    }
}

impl GpioBackend for SimBackend {
    fn initialize(&self) -> Result<(), GpioError> {
        self.init.call_once(|| {
            self.init_count.fetch_add(1, Ordering::SeqCst);
            debug!("simulated GPIO initialised");
            Ok(())
        })
    }

    fn is_pwm_capable(&self, pin: u8) -> bool {
        pin == self.pwm_pin
    }

    fn set_direction(&self, pin: u8, direction: Direction) -> Result<(), GpioError> {
        self.with_pin(pin, |p| p.direction = Some(direction))
    }

    fn set_pull(&self, pin: u8, pull: Pull) -> Result<(), GpioError> {
        self.with_pin(pin, |p| p.pull = pull)
    }

    fn write(&self, pin: u8, level: Level) -> Result<(), GpioError> {
        let now = Instant::now();
        let previous = self.with_pin(pin, |p| {
            let previous = p.sample(now);
            p.window = None;
            p.level = level;
            previous
        })?;

        if previous.is_high() && level.is_low() {
            self.respond_to_trigger(pin, now);
        }
        Ok(())
    }

    fn read(&self, pin: u8) -> Result<Level, GpioError> {
        let now = Instant::now();
        let mut pins = self.pins.lock();
        let state = pins.entry(pin).or_default();
        state.check_fault()?;
        Ok(state.sample(now))
    }
}

impl EdgeDetect for SimBackend {
    fn subscribe(&self, pin: u8, edge: Edge, mut callback: EdgeCallback) -> Result<(), GpioError> {
        if !self.edges_supported {
            return Err(GpioError::Unsupported("edge detection"));
        }

        let (tx, rx) = mpsc::channel::<Delivery>();
        let handle = thread::Builder::new()
            .name(format!("sim-edge-{pin}"))
            .spawn(move || {
                for delivery in rx {
                    match delivery {
                        Delivery::Edge(event) => callback(event),
                        Delivery::Flush(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
            })
            .map_err(|e| GpioError::Backend(e.to_string()))?;

        let previous = self
            .subscribers
            .lock()
            .insert(pin, Dispatcher { edge, tx, handle });
        if let Some(previous) = previous {
            retire(previous);
        }
        Ok(())
    }

    fn unsubscribe(&self, pin: u8) -> Result<(), GpioError> {
        let removed = self.subscribers.lock().remove(&pin);
        if let Some(dispatcher) = removed {
            retire(dispatcher);
        }
        Ok(())
    }
}

// Closes the channel and waits for queued events to drain, unless called
// from the dispatcher thread itself.
fn retire(dispatcher: Dispatcher) {
    let Dispatcher { tx, handle, .. } = dispatcher;
    drop(tx);
    if handle.thread().id() != thread::current().id() {
        let _ = handle.join();
    }
}

impl PwmController for SimBackend {
    fn set_clock_divisor(&self, divisor: u32) -> Result<(), GpioError> {
        self.record_pwm(|pwm| pwm.divisor = Some(divisor));
        Ok(())
    }

    fn set_range(&self, range: u32) -> Result<(), GpioError> {
        self.record_pwm(|pwm| pwm.range = Some(range));
        Ok(())
    }

    fn write_duty(&self, pin: u8, value: u32) -> Result<(), GpioError> {
        self.with_pin(pin, |_| ())?;
        self.record_pwm(|pwm| {
            pwm.duty.insert(pin, value);
        });
        Ok(())
    }

    fn set_mode(&self, mode: PwmMode) -> Result<(), GpioError> {
        self.record_pwm(|pwm| pwm.mode = Some(mode));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_trigger_release_injects_echo_edges() {
        let sim = Arc::new(SimBackend::new());
        let (tx, rx) = mpsc::channel();
        sim.subscribe(
            3,
            Edge::Both,
            Box::new(move |event| {
                let _ = tx.send(event);
            }),
        )
        .unwrap();
        sim.attach_echo(
            2,
            3,
            EchoResponse::pulse(Duration::from_micros(200), Duration::from_millis(2)),
        );

        sim.write(2, Level::High).unwrap();
        sim.write(2, Level::Low).unwrap();

        let rise = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        let fall = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(rise.level, Level::High);
        assert_eq!(fall.level, Level::Low);
        assert_eq!(fall.timestamp - rise.timestamp, Duration::from_millis(2));
        assert_eq!(sim.level(3), Level::Low);
    }

    #[test]
    fn test_doubled_echo_is_handled_before_trigger_write_returns() {
        let sim = SimBackend::new();
        let (tx, rx) = mpsc::channel();
        sim.subscribe(
            3,
            Edge::Both,
            Box::new(move |event| {
                let _ = tx.send(event);
            }),
        )
        .unwrap();
        let width = Duration::from_millis(1);
        let gap = Duration::from_millis(3);
        sim.attach_echo(2, 3, EchoResponse::doubled(Duration::from_micros(200), width, gap));

        sim.write(2, Level::High).unwrap();
        sim.write(2, Level::Low).unwrap();

        let events: Vec<EdgeEvent> = rx.try_iter().collect();
        let levels: Vec<Level> = events.iter().map(|e| e.level).collect();
        assert_eq!(levels, [Level::High, Level::Low, Level::High, Level::Low]);
        assert_eq!(events[2].timestamp - events[1].timestamp, gap);
        assert_eq!(events[3].timestamp - events[2].timestamp, width);
    }

    #[test]
    fn test_flush_without_subscriber_returns() {
        let sim = SimBackend::new();
        sim.flush_edges(9);
        assert!(!sim.has_subscriber(9));
    }

    #[test]
    fn test_low_write_without_prior_high_does_not_trigger() {
        let sim = SimBackend::new();
        sim.attach_echo(2, 3, EchoResponse::rise_only(Duration::ZERO));
        sim.write(2, Level::Low).unwrap();
        assert_eq!(sim.level(3), Level::Low);
    }

    #[test]
    fn test_echo_window_without_edge_detection() {
        let sim = SimBackend::without_edge_detection();
        sim.attach_echo(2, 3, EchoResponse::pulse(Duration::ZERO, Duration::from_millis(5)));
        sim.write(2, Level::High).unwrap();
        sim.write(2, Level::Low).unwrap();

        assert_eq!(sim.read(3).unwrap(), Level::High);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(sim.read(3).unwrap(), Level::Low);
    }

    #[test]
    fn test_fault_fails_reads_and_writes() {
        let sim = SimBackend::new();
        sim.set_fault(4, Some("bus contention"));
        assert!(matches!(sim.write(4, Level::High), Err(GpioError::Backend(_))));
        assert!(sim.read(4).is_err());

        sim.set_fault(4, None);
        assert!(sim.write(4, Level::High).is_ok());
    }

    #[test]
    fn test_pwm_registers_are_recorded() {
        let sim = SimBackend::new();
        sim.set_clock_divisor(2).unwrap();
        sim.set_range(1024).unwrap();
        sim.write_duty(18, 512).unwrap();
        sim.set_mode(PwmMode::MarkSpace).unwrap();

        assert_eq!(sim.pwm_divisor(), Some(2));
        assert_eq!(sim.pwm_range(), Some(1024));
        assert_eq!(sim.pwm_duty(18), Some(512));
        assert_eq!(sim.pwm_mode(), Some(PwmMode::MarkSpace));
        assert_eq!(sim.pwm_writes(), 4);
    }

    #[test]
    fn test_resubscribe_replaces_callback() {
        let sim = SimBackend::new();
        let (tx_a, rx_a) = mpsc::channel();
        let (tx_b, rx_b) = mpsc::channel();
        sim.subscribe(
            5,
            Edge::Both,
            Box::new(move |e| {
                let _ = tx_a.send(e);
            }),
        )
        .unwrap();
        sim.subscribe(
            5,
            Edge::Both,
            Box::new(move |e| {
                let _ = tx_b.send(e);
            }),
        )
        .unwrap();

        sim.inject_edge(5, Level::High, Instant::now());
        assert!(rx_b.recv_timeout(Duration::from_secs(1)).is_ok());
        assert!(rx_a.recv_timeout(Duration::from_millis(20)).is_err());
    }
}
