use std::sync::Arc;
use std::time::Instant;

use pinctl_gpio::EdgeDetect;
use pinctl_ranging::{Distance, PolledRanger, RangingError, UltrasonicRanger};

use crate::config::RangerSection;

/// One measurement as published on the readings topic.
#[derive(Debug, Clone)]
pub struct Reading {
    pub result: Result<Distance, RangingError>,
    pub taken_at: Instant,
}

/// Interrupt-driven or polled ranger, chosen by configuration.
pub enum Ranger<B: EdgeDetect> {
    Interrupt(UltrasonicRanger<B>),
    Polled(PolledRanger<B>),
}

impl<B: EdgeDetect> Ranger<B> {
    pub fn new(backend: Arc<B>, section: &RangerSection) -> Result<Self, RangingError> {
        let config = section.to_ranger_config();
        if section.polled {
            PolledRanger::new(backend, section.trigger_pin, section.echo_pin, config)
                .map(Ranger::Polled)
        } else {
            UltrasonicRanger::new(backend, section.trigger_pin, section.echo_pin, config)
                .map(Ranger::Interrupt)
        }
    }

    pub fn measure(&self) -> Reading {
        let result = match self {
            Ranger::Interrupt(r) => r.measure_distance(),
            Ranger::Polled(r) => r.measure_distance(),
        };
        Reading {
            result,
            taken_at: Instant::now(),
        }
    }
}
