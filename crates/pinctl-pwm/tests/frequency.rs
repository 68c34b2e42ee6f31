use std::sync::Arc;

use pinctl_gpio::HARDWARE_PWM_PIN;
use pinctl_gpio::sim::SimBackend;
use pinctl_pwm::{PwmError, PwmLimits, PwmMode, PwmSynthesizer};

const EPSILON: f64 = 1e-9;

#[test]
fn servo_setup_keeps_pulse_width_across_frequency_change() {
    let sim = Arc::new(SimBackend::new());
    let mut pwm = PwmSynthesizer::new(sim.clone(), HARDWARE_PWM_PIN, PwmMode::MarkSpace).unwrap();

    // 1.5 ms at 50 Hz.
    pwm.set_duty_cycle(0.075).unwrap();
    let achieved = pwm.set_frequency(50.0).unwrap();

    assert!((achieved - 50.0).abs() < EPSILON);
    assert_eq!(sim.pwm_duty(HARDWARE_PWM_PIN), Some(300));
    assert!((pwm.frequency() - achieved).abs() < EPSILON);
}

#[test]
fn resolution_request_trades_off_against_frequency() {
    let sim = Arc::new(SimBackend::new());
    let mut pwm = PwmSynthesizer::new(sim.clone(), HARDWARE_PWM_PIN, PwmMode::MarkSpace).unwrap();

    pwm.set_frequency_with_resolution(1000.0, 4096).unwrap();
    assert_eq!((pwm.divisor(), pwm.range()), (5, 4096));
    assert!((pwm.frequency() - 937.5).abs() < EPSILON);

    let err = pwm.set_frequency_with_resolution(20_000.0, 1000).unwrap_err();
    assert_eq!(
        err,
        PwmError::FrequencyUnreachable {
            requested: 20_000.0,
            min_resolution: 1000
        }
    );
    assert_eq!((pwm.divisor(), pwm.range()), (5, 4096));
}

#[test]
fn custom_limits_bound_the_search() {
    let sim = Arc::new(SimBackend::new());
    let limits = PwmLimits {
        clock_hz: 1.0e6,
        min_divisor: 1,
        max_divisor: 16,
        max_range: 1000,
    };
    let mut pwm =
        PwmSynthesizer::with_limits(sim.clone(), HARDWARE_PWM_PIN, PwmMode::MarkSpace, limits)
            .unwrap();
    assert_eq!(pwm.range(), 1000);
    assert_eq!(sim.pwm_divisor(), Some(1));

    let achieved = pwm.set_frequency(2000.0).unwrap();
    assert_eq!((pwm.divisor(), pwm.range()), (1, 500));
    assert!((achieved - 2000.0).abs() < EPSILON);

    assert!(pwm.set_frequency(10.0).is_err());
}
