use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use pinctl_gpio::PwmMode;
use pinctl_ranging::RangerConfig;
use serde::Deserialize;
use tracing::{error, info};

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
const ENV_PREFIX: &str = "PINCTL";

/// Which GPIO backend drives the pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Sim,
    Rppal,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackendSection {
    pub kind: BackendKind,
    /// Echo width the simulated sensor answers with.
    pub sim_echo_us: u64,
}

impl Default for BackendSection {
    fn default() -> Self {
        BackendSection {
            kind: BackendKind::Sim,
            sim_echo_us: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RangerSection {
    pub trigger_pin: u8,
    pub echo_pin: u8,
    pub polled: bool,
    pub period_ms: u64,
    pub echo_timeout_ms: u64,
    pub trigger_pulse_us: u64,
    pub poll_deadline_ms: u64,
    pub poll_interval_us: u64,
    pub speed_of_sound_cm_per_s: f64,
    pub rated_range_cm: f64,
}

impl Default for RangerSection {
    fn default() -> Self {
        let defaults = RangerConfig::default();
        RangerSection {
            trigger_pin: 23,
            echo_pin: 24,
            polled: false,
            period_ms: 100,
            echo_timeout_ms: defaults.echo_timeout.as_millis() as u64,
            trigger_pulse_us: defaults.trigger_pulse.as_micros() as u64,
            poll_deadline_ms: defaults.poll_deadline.as_millis() as u64,
            poll_interval_us: defaults.poll_interval.as_micros() as u64,
            speed_of_sound_cm_per_s: defaults.speed_of_sound_cm_per_s,
            rated_range_cm: defaults.rated_range_cm,
        }
    }
}

impl RangerSection {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn to_ranger_config(&self) -> RangerConfig {
        RangerConfig {
            speed_of_sound_cm_per_s: self.speed_of_sound_cm_per_s,
            rated_range_cm: self.rated_range_cm,
            echo_timeout: Duration::from_millis(self.echo_timeout_ms),
            trigger_pulse: Duration::from_micros(self.trigger_pulse_us),
            poll_deadline: Duration::from_millis(self.poll_deadline_ms),
            poll_interval: Duration::from_micros(self.poll_interval_us),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PwmSection {
    pub pin: u8,
    pub mode: PwmMode,
    pub frequency_hz: f64,
    pub near_cm: f64,
    pub far_cm: f64,
}

impl Default for PwmSection {
    fn default() -> Self {
        PwmSection {
            pin: pinctl_gpio::HARDWARE_PWM_PIN,
            mode: PwmMode::MarkSpace,
            frequency_hz: 1_000.0,
            near_cm: 10.0,
            far_cm: 150.0,
        }
    }
}

/// Application settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendSection,
    pub ranger: RangerSection,
    pub pwm: PwmSection,
}

/// Loads `config/default.toml` and applies `PINCTL_*` environment overrides
/// (sections separated by `__`, e.g. `PINCTL_RANGER__PERIOD_MS`).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    info!("Attempting to load configuration from {}", DEFAULT_CONFIG_PATH);

    let settings = Config::builder()
        .add_source(File::new(DEFAULT_CONFIG_PATH, FileFormat::Toml).required(true))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .and_then(|config| config.try_deserialize::<AppConfig>());

    match settings {
        Ok(config) => {
            info!("Successfully loaded configuration: {:?}", config);
            Ok(config)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            Err(e)
        }
    }
}
