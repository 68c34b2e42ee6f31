use std::sync::Arc;

use pinctl_gpio::{PwmController, PwmMode};
use pinctl_pwm::{PwmError, PwmSynthesizer};
use pinctl_ranging::Distance;
use tracing::{info, warn};

use crate::config::PwmSection;

/// Duty cycle for a distance: 1 at or inside `near_cm`, 0 at or beyond
/// `far_cm`, linear in between. No reading means off.
pub fn duty_for(distance: Option<Distance>, near_cm: f64, far_cm: f64) -> f64 {
    let Some(distance) = distance else {
        return 0.0;
    };
    if far_cm <= near_cm {
        return if distance.as_cm() <= near_cm { 1.0 } else { 0.0 };
    }
    ((far_cm - distance.as_cm()) / (far_cm - near_cm)).clamp(0.0, 1.0)
}

/// PWM output whose brightness follows the measured distance.
pub struct Indicator<B: PwmController> {
    pwm: PwmSynthesizer<B>,
    near_cm: f64,
    far_cm: f64,
}

impl<B: PwmController> Indicator<B> {
    pub fn new(backend: Arc<B>, section: &PwmSection) -> Result<Self, PwmError> {
        let mut pwm = PwmSynthesizer::new(backend, section.pin, section.mode)?;
        if section.mode == PwmMode::MarkSpace {
            let achieved = pwm.set_frequency(section.frequency_hz)?;
            info!(requested = section.frequency_hz, achieved, "indicator frequency set");
        } else {
            warn!("balanced mode: indicator runs at the default frequency");
        }

        Ok(Indicator {
            pwm,
            near_cm: section.near_cm,
            far_cm: section.far_cm,
        })
    }

    /// Updates the output and returns the duty cycle applied.
    pub fn show(&mut self, distance: Option<Distance>) -> Result<f64, PwmError> {
        let duty = duty_for(distance, self.near_cm, self.far_cm);
        self.pwm.set_duty_cycle(duty)?;
        Ok(duty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinctl_gpio::sim::SimBackend;

    const EPSILON: f64 = 1e-9;

    #[test]
    fn test_duty_mapping() {
        let at = |cm| duty_for(Some(Distance::from_cm(cm)), 10.0, 150.0);
        assert_eq!(at(5.0), 1.0);
        assert_eq!(at(10.0), 1.0);
        assert!((at(80.0) - 0.5).abs() < EPSILON);
        assert_eq!(at(150.0), 0.0);
        assert_eq!(at(400.0), 0.0);
        assert_eq!(duty_for(None, 10.0, 150.0), 0.0);
    }

    #[test]
    fn test_degenerate_band_is_a_threshold() {
        assert_eq!(duty_for(Some(Distance::from_cm(20.0)), 30.0, 30.0), 1.0);
        assert_eq!(duty_for(Some(Distance::from_cm(40.0)), 30.0, 30.0), 0.0);
    }

    #[test]
    fn test_indicator_drives_duty_register() {
        let sim = Arc::new(SimBackend::new());
        let mut indicator = Indicator::new(sim.clone(), &PwmSection::default()).unwrap();
        // 1 kHz: divisor 5, range 3840.
        assert_eq!(sim.pwm_range(), Some(3840));

        let duty = indicator.show(Some(Distance::from_cm(80.0))).unwrap();
        assert!((duty - 0.5).abs() < EPSILON);
        assert_eq!(sim.pwm_duty(pinctl_gpio::HARDWARE_PWM_PIN), Some(1920));
    }
}
