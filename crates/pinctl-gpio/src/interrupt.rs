use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::GpioError;
use crate::hal::{Direction, Edge, EdgeDetect, EdgeEvent, Level, Pull};
use crate::pin::DigitalPin;

/// An input pin with an asynchronous edge callback.
///
/// At most one callback is installed at a time. It runs on the backend's own
/// context, so it must be short and must not block.
pub struct EdgeInterrupt<B: EdgeDetect> {
    pin: DigitalPin<B>,
    edge: Option<Edge>,
}

impl<B: EdgeDetect> EdgeInterrupt<B> {
    /// Claims `pin` as an input. No callback is installed yet.
    pub fn new(backend: Arc<B>, pin: u8) -> Result<Self, GpioError> {
        Ok(EdgeInterrupt {
            pin: DigitalPin::new(backend, pin, Direction::Input)?,
            edge: None,
        })
    }

    /// Installs `callback` for the selected `edge`, replacing any previous
    /// callback.
    pub fn register_callback<F>(&mut self, edge: Edge, callback: F) -> Result<(), GpioError>
    where
        F: FnMut(EdgeEvent) + Send + 'static,
    {
        let pin = self.pin.pin();
        self.pin.backend().subscribe(pin, edge, Box::new(callback))?;
        self.edge = Some(edge);
        debug!(pin, ?edge, "edge callback registered");
        Ok(())
    }

    /// Removes the installed callback, if any.
    pub fn clear_callback(&mut self) -> Result<(), GpioError> {
        if self.edge.take().is_some() {
            self.pin.backend().unsubscribe(self.pin.pin())?;
        }
        Ok(())
    }

    /// Returns the edge selection of the installed callback.
    pub fn edge(&self) -> Option<Edge> {
        self.edge
    }

    /// Returns the pin number.
    pub fn pin(&self) -> u8 {
        self.pin.pin()
    }

    /// Samples the pin.
    pub fn read(&self) -> Result<Level, GpioError> {
        self.pin.read()
    }

    /// Sets the internal pull resistor.
    ///
    /// Fails with [`GpioError::CallbackInstalled`] while a callback is
    /// installed: some backends must reclaim the pin to change its pull,
    /// which would silently drop the interrupt. Set the pull first, or clear
    /// the callback and register it again.
    pub fn set_pull(&mut self, pull: Pull) -> Result<(), GpioError> {
        if self.edge.is_some() {
            return Err(GpioError::CallbackInstalled(self.pin.pin()));
        }
        self.pin.set_pull(pull)
    }
}

impl<B: EdgeDetect> Drop for EdgeInterrupt<B> {
    fn drop(&mut self) {
        if let Err(e) = self.clear_callback() {
            warn!(pin = self.pin.pin(), error = %e, "failed to remove edge callback");
        }
    }
}
