//! Echo capture state machine.
//!
//! A measurement moves through `Idle -> WaitingForRisingEdge ->
//! WaitingForFallingEdge -> Done` and back to `Idle` once the caller has
//! taken the result. The capture only records timestamps; waiting and
//! conversion belong to the rangers.

use std::time::{Duration, Instant};

use pinctl_gpio::{EdgeEvent, Level};

/// Phase of an echo measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EchoState {
    /// No measurement running.
    #[default]
    Idle,
    /// Trigger sent, echo not started yet.
    WaitingForRisingEdge,
    /// Echo started at the recorded rise time.
    WaitingForFallingEdge,
    /// Both edges recorded.
    Done,
}

/// Edge timestamps of one echo pulse.
#[derive(Debug, Clone, Default)]
pub struct EchoCapture {
    state: EchoState,
    armed_at: Option<Instant>,
    rise: Option<Instant>,
    fall: Option<Instant>,
}

impl EchoCapture {
    /// A capture in the `Idle` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    pub fn state(&self) -> EchoState {
        self.state
    }

    /// Starts waiting for an echo. Edges stamped before `now` are ignored.
    ///
    /// Returns `false` and changes nothing unless the capture is `Idle`.
    pub fn arm(&mut self, now: Instant) -> bool {
        if self.state != EchoState::Idle {
            return false;
        }
        self.state = EchoState::WaitingForRisingEdge;
        self.armed_at = Some(now);
        self.rise = None;
        self.fall = None;
        true
    }

    /// Feeds one edge. Returns `true` when this edge completes the pulse.
    ///
    /// A level repeated while waiting is not a transition and is skipped. Any
    /// edge arriving in `Idle` or `Done` returns the capture to `Idle`, so a
    /// pulse followed by further echo activity yields no width.
    pub fn on_edge(&mut self, event: EdgeEvent) -> bool {
        // Leftovers from an earlier, timed out measurement.
        if self.armed_at.is_some_and(|armed| event.timestamp < armed) {
            return false;
        }

        match (self.state, event.level) {
            (EchoState::WaitingForRisingEdge, Level::High) => {
                self.rise = Some(event.timestamp);
                self.state = EchoState::WaitingForFallingEdge;
                false
            }
            (EchoState::WaitingForFallingEdge, Level::Low) => {
                self.fall = Some(event.timestamp);
                self.state = EchoState::Done;
                true
            }
            (EchoState::WaitingForRisingEdge | EchoState::WaitingForFallingEdge, _) => false,
            (EchoState::Idle | EchoState::Done, _) => {
                self.reset();
                false
            }
        }
    }

    /// Echo pulse width. Only available in the `Done` state.
    pub fn pulse_width(&self) -> Option<Duration> {
        match (self.state, self.rise, self.fall) {
            (EchoState::Done, Some(rise), Some(fall)) => Some(fall.saturating_duration_since(rise)),
            _ => None,
        }
    }

    /// Returns to `Idle`, discarding any timestamps.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
