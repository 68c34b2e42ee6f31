use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pinctl_gpio::GpioError;
use pinctl_gpio::sim::{EchoResponse, SimBackend};
use pinctl_ranging::{EchoState, PolledRanger, RangerConfig, RangingError, UltrasonicRanger};

const EPSILON: f64 = 1e-9;

#[test]
fn independent_rangers_measure_concurrently() {
    let sim = Arc::new(SimBackend::new());
    let front = UltrasonicRanger::new(sim.clone(), 20, 21, RangerConfig::default()).unwrap();
    let rear = UltrasonicRanger::new(sim.clone(), 23, 24, RangerConfig::default()).unwrap();
    sim.attach_echo(
        20,
        21,
        EchoResponse::pulse(Duration::from_micros(400), Duration::from_millis(2)),
    );
    sim.attach_echo(
        23,
        24,
        EchoResponse::pulse(Duration::from_micros(400), Duration::from_millis(5)),
    );

    let (front_cm, rear_cm) = thread::scope(|s| {
        let front_job = s.spawn(|| front.measure_distance());
        let rear_job = s.spawn(|| rear.measure_distance());
        (front_job.join().unwrap().unwrap(), rear_job.join().unwrap().unwrap())
    });

    assert!((front_cm.as_cm() - 34.3).abs() < EPSILON);
    assert!((rear_cm.as_cm() - 85.75).abs() < EPSILON);
    assert_eq!(front.state(), EchoState::Idle);
    assert_eq!(rear.state(), EchoState::Idle);
}

#[test]
fn one_ranger_timing_out_does_not_disturb_another() {
    let sim = Arc::new(SimBackend::new());
    let silent = UltrasonicRanger::new(sim.clone(), 20, 21, RangerConfig::default()).unwrap();
    let active = UltrasonicRanger::new(sim.clone(), 23, 24, RangerConfig::default()).unwrap();
    sim.attach_echo(
        23,
        24,
        EchoResponse::pulse(Duration::from_micros(400), Duration::from_millis(1)),
    );

    assert_eq!(silent.measure_distance(), Err(RangingError::NoEcho));
    let distance = active.measure_distance().unwrap();
    assert!((distance.as_cm() - 17.15).abs() < EPSILON);
}

#[test]
fn interrupt_ranger_needs_edge_detection() {
    let sim = Arc::new(SimBackend::without_edge_detection());
    let result = UltrasonicRanger::new(sim.clone(), 20, 21, RangerConfig::default());
    assert!(matches!(result, Err(RangingError::Gpio(GpioError::Unsupported(_)))));

    let polled = PolledRanger::new(sim.clone(), 20, 21, RangerConfig::default()).unwrap();
    sim.attach_echo(
        20,
        21,
        EchoResponse::pulse(Duration::from_micros(400), Duration::from_millis(2)),
    );
    let distance = polled.measure_distance().unwrap();
    assert!((distance.as_cm() - 34.3).abs() < 3.0);
}

#[test]
fn custom_speed_of_sound_scales_distance() {
    let sim = Arc::new(SimBackend::new());
    let config = RangerConfig {
        speed_of_sound_cm_per_s: 33_100.0,
        ..RangerConfig::default()
    };
    let ranger = UltrasonicRanger::new(sim.clone(), 20, 21, config).unwrap();
    sim.attach_echo(
        20,
        21,
        EchoResponse::pulse(Duration::from_micros(400), Duration::from_millis(2)),
    );

    let distance = ranger.measure_distance().unwrap();
    assert!((distance.as_cm() - 33.1).abs() < EPSILON);
}
