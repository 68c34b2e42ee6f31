use std::sync::Arc;

use pinctl_gpio::{DigitalPin, Direction, PwmController, PwmMode};
use tracing::{debug, info, warn};

use crate::error::PwmError;
use crate::search::{PwmLimits, synthesize};

/// Range committed on construction.
pub const DEFAULT_RANGE: u32 = 1024;

/// Minimum range accepted by [`PwmSynthesizer::set_frequency`].
pub const DEFAULT_MIN_RESOLUTION: u32 = 100;

/// Hardware PWM output with frequency synthesis.
///
/// Owns the PWM pin plus the controller state: clock divisor, range, duty
/// cycle and mode. The output frequency is always
/// `clock / divisor / range`, and the duty register is always
/// `round(duty * range)`.
pub struct PwmSynthesizer<B: PwmController> {
    pin: DigitalPin<B>,
    limits: PwmLimits,
    mode: PwmMode,
    divisor: u32,
    range: u32,
    duty: f64,
    duty_register: u32,
}

impl<B: PwmController> PwmSynthesizer<B> {
    /// Claims `pin` as a PWM output on a BCM283x-style controller.
    ///
    /// The output starts at zero duty with the smallest divisor and a range
    /// of [`DEFAULT_RANGE`].
    pub fn new(backend: Arc<B>, pin: u8, mode: PwmMode) -> Result<Self, PwmError> {
        Self::with_limits(backend, pin, mode, PwmLimits::default())
    }

    /// Like [`PwmSynthesizer::new`] with explicit controller limits.
    pub fn with_limits(
        backend: Arc<B>,
        pin: u8,
        mode: PwmMode,
        limits: PwmLimits,
    ) -> Result<Self, PwmError> {
        let pin = DigitalPin::new(backend, pin, Direction::PwmOutput)?;
        let range = DEFAULT_RANGE.min(limits.max_range);
        let mut pwm = PwmSynthesizer {
            pin,
            limits,
            mode,
            divisor: limits.min_divisor,
            range,
            duty: 0.0,
            duty_register: 0,
        };

        pwm.set_mode(mode)?;
        pwm.commit_divisor(limits.min_divisor)?;
        pwm.set_range(range)?;

        info!(pin = pwm.pin.pin(), ?mode, frequency = pwm.frequency(), "pwm output ready");
        Ok(pwm)
    }

    /// Sets the duty cycle.
    ///
    /// # Errors
    ///
    /// Returns `Err(PwmError::DutyCycleOutOfRange)` if `duty` is not within
    /// `[0, 1]`. Debug builds treat that as a programming error and panic.
    pub fn set_duty_cycle(&mut self, duty: f64) -> Result<(), PwmError> {
        let valid = (0.0..=1.0).contains(&duty);
        debug_assert!(valid, "duty cycle {duty} outside [0, 1]");
        if !valid {
            return Err(PwmError::DutyCycleOutOfRange(duty));
        }

        self.write_duty(duty)
    }

    /// Selects balanced or mark-space pulse distribution.
    pub fn set_mode(&mut self, mode: PwmMode) -> Result<(), PwmError> {
        self.pin.backend().set_mode(mode)?;
        self.mode = mode;
        debug!(?mode, "pwm mode set");
        Ok(())
    }

    /// Sets the range and re-applies the current duty cycle on the new scale.
    ///
    /// # Errors
    ///
    /// Returns `Err(PwmError::RangeOutOfBounds)` if `range` is zero or above
    /// the controller maximum. Debug builds panic instead.
    pub fn set_range(&mut self, range: u32) -> Result<(), PwmError> {
        let max = self.limits.max_range;
        let valid = (1..=max).contains(&range);
        debug_assert!(valid, "range {range} outside [1, {max}]");
        if !valid {
            return Err(PwmError::RangeOutOfBounds { range, max });
        }

        self.pin.backend().set_range(range)?;
        self.range = range;
        self.write_duty(self.duty)
    }

    /// Sets the output frequency with at least [`DEFAULT_MIN_RESOLUTION`]
    /// duty-cycle steps. Returns the achieved frequency.
    pub fn set_frequency(&mut self, frequency: f64) -> Result<f64, PwmError> {
        self.set_frequency_with_resolution(frequency, DEFAULT_MIN_RESOLUTION)
    }

    /// Sets the output frequency with at least `min_resolution` duty-cycle
    /// steps. Returns the achieved frequency, which may differ slightly from
    /// the request because divisor and range are integers.
    ///
    /// Only available in mark-space mode: in balanced mode the controller
    /// spreads pulses over time and the frequency depends on the duty cycle.
    ///
    /// # Errors
    ///
    /// Returns `Err(PwmError::BalancedModeFrequency)` in balanced mode and
    /// `Err(PwmError::FrequencyUnreachable)` when no pair fits. In both cases
    /// the previous configuration is left untouched. A backend failure part
    /// way through rolls divisor and range back to their previous values
    /// before the error is returned.
    pub fn set_frequency_with_resolution(
        &mut self,
        frequency: f64,
        min_resolution: u32,
    ) -> Result<f64, PwmError> {
        if self.mode == PwmMode::Balanced {
            warn!(frequency, "frequency request ignored in balanced mode");
            return Err(PwmError::BalancedModeFrequency);
        }

        let Some(settings) = synthesize(frequency, min_resolution, &self.limits) else {
            warn!(frequency, min_resolution, "no divisor/range pair for requested frequency");
            return Err(PwmError::FrequencyUnreachable {
                requested: frequency,
                min_resolution,
            });
        };

        let (divisor, range) = (self.divisor, self.range);
        if let Err(e) = self
            .commit_divisor(settings.divisor)
            .and_then(|()| self.set_range(settings.range))
        {
            self.restore_clock(divisor, range);
            return Err(e);
        }

        let achieved = self.frequency();
        debug!(
            requested = frequency,
            achieved,
            divisor = settings.divisor,
            range = settings.range,
            "pwm frequency set"
        );
        Ok(achieved)
    }

    /// Last accepted duty cycle.
    pub fn duty_cycle(&self) -> f64 {
        self.duty
    }

    /// Value last written to the duty register.
    pub fn duty_register(&self) -> u32 {
        self.duty_register
    }

    /// Current output frequency (Hz).
    pub fn frequency(&self) -> f64 {
        self.limits.clock_hz / self.divisor as f64 / self.range as f64
    }

    /// Current clock divisor.
    pub fn divisor(&self) -> u32 {
        self.divisor
    }

    /// Current range.
    pub fn range(&self) -> u32 {
        self.range
    }

    /// Current mode.
    pub fn mode(&self) -> PwmMode {
        self.mode
    }

    /// Controller limits in use.
    pub fn limits(&self) -> &PwmLimits {
        &self.limits
    }

    /// PWM pin number.
    pub fn pin(&self) -> u8 {
        self.pin.pin()
    }

    fn commit_divisor(&mut self, divisor: u32) -> Result<(), PwmError> {
        self.pin.backend().set_clock_divisor(divisor)?;
        self.divisor = divisor;
        Ok(())
    }

    // Best effort; the caller reports the original failure.
    fn restore_clock(&mut self, divisor: u32, range: u32) {
        let backend = self.pin.backend();
        if let Err(e) = backend
            .set_clock_divisor(divisor)
            .and_then(|()| backend.set_range(range))
        {
            warn!(pin = self.pin.pin(), error = %e, "failed to restore pwm clock");
        }
        self.divisor = divisor;
        self.range = range;
    }

    fn write_duty(&mut self, duty: f64) -> Result<(), PwmError> {
        let register = (duty * self.range as f64).round() as u32;
        self.pin.backend().write_duty(self.pin.pin(), register)?;
        self.duty = duty;
        self.duty_register = register;
        Ok(())
    }
}

impl<B: PwmController> Drop for PwmSynthesizer<B> {
    fn drop(&mut self) {
        if let Err(e) = self.pin.backend().write_duty(self.pin.pin(), 0) {
            warn!(pin = self.pin.pin(), error = %e, "failed to zero duty on release");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinctl_gpio::sim::SimBackend;
    use pinctl_gpio::{GpioError, HARDWARE_PWM_PIN, Level};

    const EPSILON: f64 = 1e-9;

    fn mark_space() -> (Arc<SimBackend>, PwmSynthesizer<SimBackend>) {
        let sim = Arc::new(SimBackend::new());
        let pwm = PwmSynthesizer::new(sim.clone(), HARDWARE_PWM_PIN, PwmMode::MarkSpace).unwrap();
        (sim, pwm)
    }

    #[test]
    fn test_new_commits_defaults() {
        let (sim, pwm) = mark_space();
        assert_eq!(sim.pwm_mode(), Some(PwmMode::MarkSpace));
        assert_eq!(sim.pwm_divisor(), Some(2));
        assert_eq!(sim.pwm_range(), Some(1024));
        assert_eq!(sim.pwm_duty(HARDWARE_PWM_PIN), Some(0));
        assert!((pwm.frequency() - 9375.0).abs() < EPSILON);
    }

    #[test]
    fn test_new_rejects_non_pwm_pin() {
        let sim = Arc::new(SimBackend::new());
        let result = PwmSynthesizer::new(sim, 4, PwmMode::MarkSpace);
        assert!(matches!(result, Err(PwmError::Gpio(GpioError::NotPwmCapable(4)))));
    }

    #[test]
    fn test_duty_register_is_rounded_product() {
        let (sim, mut pwm) = mark_space();
        for step in 0..=40 {
            let duty = step as f64 / 40.0;
            pwm.set_duty_cycle(duty).unwrap();
            let expected = (duty * pwm.range() as f64).round() as u32;
            assert_eq!(pwm.duty_register(), expected);
            assert_eq!(sim.pwm_duty(HARDWARE_PWM_PIN), Some(expected));
            assert_eq!(pwm.duty_cycle(), duty);
        }
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "outside [0, 1]"))]
    fn test_duty_cycle_above_one_rejected() {
        let (sim, mut pwm) = mark_space();
        pwm.set_duty_cycle(0.25).unwrap();
        let result = pwm.set_duty_cycle(1.5);
        assert!(matches!(result, Err(PwmError::DutyCycleOutOfRange(_))));
        assert_eq!(pwm.duty_cycle(), 0.25);
        assert_eq!(sim.pwm_duty(HARDWARE_PWM_PIN), Some(256));
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "outside [0, 1]"))]
    fn test_duty_cycle_nan_rejected() {
        let (_sim, mut pwm) = mark_space();
        assert!(pwm.set_duty_cycle(f64::NAN).is_err());
    }

    #[test]
    fn test_set_range_reapplies_duty() {
        let (sim, mut pwm) = mark_space();
        pwm.set_duty_cycle(0.5).unwrap();
        assert_eq!(sim.pwm_duty(HARDWARE_PWM_PIN), Some(512));

        pwm.set_range(200).unwrap();
        assert_eq!(sim.pwm_range(), Some(200));
        assert_eq!(sim.pwm_duty(HARDWARE_PWM_PIN), Some(100));
        assert_eq!(pwm.duty_cycle(), 0.5);
    }

    #[test]
    fn test_set_range_is_idempotent() {
        let (sim, mut pwm) = mark_space();
        pwm.set_duty_cycle(0.3).unwrap();
        pwm.set_range(333).unwrap();
        let first = sim.pwm_duty(HARDWARE_PWM_PIN);
        pwm.set_range(333).unwrap();
        assert_eq!(sim.pwm_duty(HARDWARE_PWM_PIN), first);
        assert_eq!(first, Some(100));
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "outside [1, 4096]"))]
    fn test_range_above_max_rejected() {
        let (sim, mut pwm) = mark_space();
        let result = pwm.set_range(5000);
        assert!(matches!(result, Err(PwmError::RangeOutOfBounds { range: 5000, max: 4096 })));
        assert_eq!(sim.pwm_range(), Some(1024));
    }

    #[test]
    fn test_set_frequency_commits_pair() {
        let (sim, mut pwm) = mark_space();
        pwm.set_duty_cycle(0.5).unwrap();

        let achieved = pwm.set_frequency(50.0).unwrap();
        assert!((achieved - 50.0).abs() < EPSILON);
        assert_eq!(pwm.divisor(), 96);
        assert_eq!(pwm.range(), 4000);
        assert_eq!(sim.pwm_divisor(), Some(96));
        assert_eq!(sim.pwm_range(), Some(4000));
        assert_eq!(sim.pwm_duty(HARDWARE_PWM_PIN), Some(2000));
    }

    #[test]
    fn test_set_frequency_reports_rounded_frequency() {
        let (_sim, mut pwm) = mark_space();
        // P = 19.2e6 / 7777 rounds to 2469, which is 3 * 823; 823 is prime,
        // so the pair is (3, 823).
        let achieved = pwm.set_frequency(7777.0).unwrap();
        assert_eq!((pwm.divisor(), pwm.range()), (3, 823));
        let expected = 19.2e6 / 3.0 / 823.0;
        assert!((achieved - expected).abs() < EPSILON);
        assert!((achieved - 7777.0).abs() < 5.0);
    }

    #[test]
    fn test_balanced_mode_rejects_frequency() {
        let sim = Arc::new(SimBackend::new());
        let mut pwm =
            PwmSynthesizer::new(sim.clone(), HARDWARE_PWM_PIN, PwmMode::Balanced).unwrap();
        let writes = sim.pwm_writes();

        let result = pwm.set_frequency(1000.0);
        assert!(matches!(result, Err(PwmError::BalancedModeFrequency)));
        assert_eq!((pwm.divisor(), pwm.range()), (2, 1024));
        assert_eq!(sim.pwm_writes(), writes);
    }

    #[test]
    fn test_unreachable_frequency_leaves_configuration() {
        let (sim, mut pwm) = mark_space();
        pwm.set_frequency(50.0).unwrap();
        let writes = sim.pwm_writes();

        let result = pwm.set_frequency(1.0e6);
        assert!(matches!(result, Err(PwmError::FrequencyUnreachable { .. })));
        assert_eq!((pwm.divisor(), pwm.range()), (96, 4000));
        assert_eq!(sim.pwm_writes(), writes);
    }

    #[test]
    fn test_failed_frequency_change_restores_clock() {
        let (sim, mut pwm) = mark_space();
        pwm.set_duty_cycle(0.5).unwrap();
        pwm.set_frequency(50.0).unwrap();

        // Register writes still land; the duty write on the pin fails.
        sim.set_fault(HARDWARE_PWM_PIN, Some("clock glitch"));
        let result = pwm.set_frequency(1000.0);
        assert!(matches!(result, Err(PwmError::Gpio(GpioError::Backend(_)))));

        assert_eq!((pwm.divisor(), pwm.range()), (96, 4000));
        assert_eq!(sim.pwm_divisor(), Some(96));
        assert_eq!(sim.pwm_range(), Some(4000));
        assert_eq!(sim.pwm_duty(HARDWARE_PWM_PIN), Some(2000));
        assert!((pwm.frequency() - 50.0).abs() < EPSILON);

        sim.set_fault(HARDWARE_PWM_PIN, None);
        assert!((pwm.set_frequency(1000.0).unwrap() - 1000.0).abs() < 1.0);
    }

    #[test]
    fn test_switching_mode_enables_frequency() {
        let sim = Arc::new(SimBackend::new());
        let mut pwm =
            PwmSynthesizer::new(sim.clone(), HARDWARE_PWM_PIN, PwmMode::Balanced).unwrap();
        pwm.set_mode(PwmMode::MarkSpace).unwrap();
        assert_eq!(sim.pwm_mode(), Some(PwmMode::MarkSpace));
        assert!(pwm.set_frequency(1000.0).is_ok());
    }

    #[test]
    fn test_drop_zeroes_duty_and_resets_pin() {
        let sim = Arc::new(SimBackend::new());
        {
            let mut pwm =
                PwmSynthesizer::new(sim.clone(), HARDWARE_PWM_PIN, PwmMode::MarkSpace).unwrap();
            pwm.set_duty_cycle(1.0).unwrap();
            assert_eq!(sim.pwm_duty(HARDWARE_PWM_PIN), Some(1024));
        }
        assert_eq!(sim.pwm_duty(HARDWARE_PWM_PIN), Some(0));
        assert_eq!(sim.level(HARDWARE_PWM_PIN), Level::Low);
    }
}
