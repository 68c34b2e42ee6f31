mod blackboard; // latest distance, duty and faults shared between tasks
mod bus; // broadcast topic for readings
mod config; // config/default.toml plus PINCTL_* overrides
mod indicator; // distance -> PWM duty
mod ranging; // interrupt or polled ranger behind one type

use blackboard::{Blackboard, raise_fault, record_distance, record_miss, set_duty, snapshot};
use bus::Topic;
use config::{AppConfig, BackendKind};
use indicator::Indicator;
use ranging::{Ranger, Reading};

use pinctl_gpio::sim::{EchoResponse, SimBackend};
use pinctl_gpio::{EdgeDetect, PwmController};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};
use tracing_subscriber::{self, EnvFilter};

/// Failed measurements in a row before the indicator goes dark.
const MAX_MISSES: u32 = 3;
/// Reading age, in ranging periods, that counts as a stalled ranger.
const STALL_PERIODS: u32 = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    info!("pinctl proximity indicator starting.");
    let cfg = config::load_config()?;

    match cfg.backend.kind {
        BackendKind::Sim => run(simulated_backend(&cfg), cfg).await,
        BackendKind::Rppal => run_rppal(cfg).await,
    }
}

/// Simulated pins with a sensor that always answers with the configured
/// echo width.
fn simulated_backend(cfg: &AppConfig) -> Arc<SimBackend> {
    // A polled ranger needs real-time echo levels rather than edge events.
    let sim = if cfg.ranger.polled {
        SimBackend::without_edge_detection()
    } else {
        SimBackend::new()
    };
    let sim = Arc::new(sim.with_pwm_pin(cfg.pwm.pin));
    sim.attach_echo(
        cfg.ranger.trigger_pin,
        cfg.ranger.echo_pin,
        EchoResponse::pulse(
            Duration::from_micros(450),
            Duration::from_micros(cfg.backend.sim_echo_us),
        ),
    );
    info!(echo_us = cfg.backend.sim_echo_us, "Using simulated GPIO backend.");
    sim
}

#[cfg(feature = "rppal")]
async fn run_rppal(cfg: AppConfig) -> anyhow::Result<()> {
    info!("Using Raspberry Pi GPIO backend.");
    run(Arc::new(pinctl_gpio::rpi::RppalBackend::new()), cfg).await
}

#[cfg(not(feature = "rppal"))]
async fn run_rppal(_cfg: AppConfig) -> anyhow::Result<()> {
    anyhow::bail!("backend \"rppal\" requires building with `--features rppal`")
}

async fn run<B>(backend: Arc<B>, cfg: AppConfig) -> anyhow::Result<()>
where
    B: EdgeDetect + PwmController + 'static,
{
    let bb: Blackboard = Arc::default();
    let readings: Topic<Reading> = Topic::new(16);
    let readings_rx = readings.subscribe();
    let period = cfg.ranger.period();

    let ranger = Arc::new(Ranger::new(Arc::clone(&backend), &cfg.ranger)?);
    let indicator = Indicator::new(backend, &cfg.pwm)?;

    tokio::select! {
        res = async {
            tokio::try_join!(
                ranging_task(ranger, readings, period),
                indicator_task(indicator, bb.clone(), readings_rx),
                watchdog(bb.clone(), period),
            )
        } => {
            res?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested, releasing pins.");
        }
    }

    let state = snapshot(&bb);
    info!(distance = ?state.distance, faults = ?state.faults, "pinctl stopped.");
    Ok(())
}

async fn ranging_task<B: EdgeDetect + 'static>(
    ranger: Arc<Ranger<B>>,
    readings: Topic<Reading>,
    period: Duration,
) -> anyhow::Result<()> {
    info!(?period, "Ranging task started.");
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        // The measurement blocks on a condvar or a spin loop.
        let ranger = Arc::clone(&ranger);
        let reading = tokio::task::spawn_blocking(move || ranger.measure()).await?;
        readings.publish(reading);
    }
}

async fn indicator_task<B: PwmController>(
    mut indicator: Indicator<B>,
    bb: Blackboard,
    mut readings: broadcast::Receiver<Arc<Reading>>,
) -> anyhow::Result<()> {
    info!("Indicator task started.");
    loop {
        let reading = match readings.recv().await {
            Ok(reading) => reading,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Indicator fell behind the ranger.");
                continue;
            }
            Err(RecvError::Closed) => return Ok(()),
        };

        let distance = match &reading.result {
            Ok(distance) => {
                debug!(%distance, "Distance measured.");
                record_distance(&bb, *distance);
                Some(*distance)
            }
            Err(e) => {
                let misses = record_miss(&bb);
                warn!(error = %e, misses, "Measurement failed.");
                // Hold the last distance through short dropouts.
                if misses < MAX_MISSES {
                    snapshot(&bb).distance
                } else {
                    None
                }
            }
        };

        let duty = indicator.show(distance)?;
        set_duty(&bb, duty);
        trace!(duty, latency = ?reading.taken_at.elapsed(), "Indicator updated.");
    }
}

async fn watchdog(bb: Blackboard, period: Duration) -> anyhow::Result<()> {
    info!("Watchdog task started.");
    let stall = period * STALL_PERIODS;
    let mut tick = tokio::time::interval(period);
    loop {
        tick.tick().await;
        let age = Instant::now() - snapshot(&bb).last_reading_ts;
        if age > stall {
            warn!(?age, "No readings from the ranger.");
            raise_fault(&bb, "ranger stalled");
        }
    }
}
