//! Pipeline configuration from environment variables

use super::ads1115::Gain;
use super::edge::Band;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Configuration for the flow pipeline runtime
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Path to SQLite database file
    pub db_path: String,

    /// JSON Lines live feed output
    pub feed_path: String,
    pub feed_max_size_mb: u64,
    pub feed_max_rotations: u32,

    /// Sampler polling period in microseconds
    pub sample_interval_us: u64,

    /// Snapshot tick period in milliseconds
    pub tick_interval_ms: u64,

    /// Queue capacities (samples, pulses, interval records, live snapshots)
    pub sample_queue: usize,
    pub pulse_queue: usize,
    pub persist_queue: usize,
    pub broadcast_capacity: usize,

    pub low_band: Band,
    pub high_band: Band,

    /// Sensor K-factor
    pub pulses_per_gallon: f64,

    pub adc_gain: Gain,

    /// Overrides the gain-derived scale when set
    pub scale_mv_per_lsb: Option<f64>,

    /// Simulated source parameters
    pub sim_pulse_hz: f64,
    pub sim_noise_mv: f64,
    pub sim_failure_rate: f64,

    pub calibration_samples: usize,
    pub calibration_threshold_mv: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            db_path: "flow.db".to_string(),
            feed_path: "feed/snapshots.jsonl".to_string(),
            feed_max_size_mb: 50,
            feed_max_rotations: 5,
            sample_interval_us: 500,
            tick_interval_ms: 1_000,
            sample_queue: 1_024,
            pulse_queue: 1_024,
            persist_queue: 1_024,
            broadcast_capacity: 64,
            low_band: Band::new(0.0, 1_000.0),
            high_band: Band::new(5_000.0, 1_000.0),
            pulses_per_gallon: 68_000.0,
            adc_gain: Gain::Fsr6_144,
            scale_mv_per_lsb: None,
            sim_pulse_hz: 20.0,
            sim_noise_mv: 300.0,
            sim_failure_rate: 0.0,
            calibration_samples: 2_000,
            calibration_threshold_mv: 50.0,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables (all `FLOW_*`, the common ones being):
    /// - `FLOW_DB_PATH` (default: flow.db)
    /// - `FLOW_FEED_PATH` (default: feed/snapshots.jsonl)
    /// - `FLOW_SAMPLE_INTERVAL_US` (default: 500)
    /// - `FLOW_TICK_INTERVAL_MS` (default: 1000)
    /// - `FLOW_PULSES_PER_GALLON` (default: 68000)
    /// - `FLOW_ADC_GAIN` (default: 6.144)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let adc_gain = match env::var("FLOW_ADC_GAIN") {
            Ok(raw) => raw.parse::<Gain>()?,
            Err(_) => defaults.adc_gain,
        };

        let scale_mv_per_lsb = match env::var("FLOW_SCALE_MV_PER_LSB") {
            Ok(raw) => Some(raw.trim().parse::<f64>().map_err(|_| {
                ConfigError::InvalidValue(format!("FLOW_SCALE_MV_PER_LSB must be a number, got '{}'", raw))
            })?),
            Err(_) => None,
        };

        let config = Self {
            db_path: env::var("FLOW_DB_PATH").unwrap_or(defaults.db_path),
            feed_path: env::var("FLOW_FEED_PATH").unwrap_or(defaults.feed_path),
            feed_max_size_mb: parse_or("FLOW_FEED_MAX_SIZE_MB", defaults.feed_max_size_mb),
            feed_max_rotations: parse_or("FLOW_FEED_MAX_ROTATIONS", defaults.feed_max_rotations),
            sample_interval_us: parse_or("FLOW_SAMPLE_INTERVAL_US", defaults.sample_interval_us),
            tick_interval_ms: parse_or("FLOW_TICK_INTERVAL_MS", defaults.tick_interval_ms),
            sample_queue: parse_or("FLOW_SAMPLE_QUEUE", defaults.sample_queue),
            pulse_queue: parse_or("FLOW_PULSE_QUEUE", defaults.pulse_queue),
            persist_queue: parse_or("FLOW_PERSIST_QUEUE", defaults.persist_queue),
            broadcast_capacity: parse_or("FLOW_BROADCAST_CAPACITY", defaults.broadcast_capacity),
            low_band: Band::new(
                parse_or("FLOW_LOW_BAND_CENTER_MV", defaults.low_band.center),
                parse_or("FLOW_LOW_BAND_TOLERANCE_MV", defaults.low_band.tolerance),
            ),
            high_band: Band::new(
                parse_or("FLOW_HIGH_BAND_CENTER_MV", defaults.high_band.center),
                parse_or("FLOW_HIGH_BAND_TOLERANCE_MV", defaults.high_band.tolerance),
            ),
            pulses_per_gallon: parse_or("FLOW_PULSES_PER_GALLON", defaults.pulses_per_gallon),
            adc_gain,
            scale_mv_per_lsb,
            sim_pulse_hz: parse_or("FLOW_SIM_PULSE_HZ", defaults.sim_pulse_hz),
            sim_noise_mv: parse_or("FLOW_SIM_NOISE_MV", defaults.sim_noise_mv),
            sim_failure_rate: parse_or("FLOW_SIM_FAILURE_RATE", defaults.sim_failure_rate),
            calibration_samples: parse_or("FLOW_CALIBRATION_SAMPLES", defaults.calibration_samples),
            calibration_threshold_mv: parse_or(
                "FLOW_CALIBRATION_THRESHOLD_MV",
                defaults.calibration_threshold_mv,
            ),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.pulses_per_gallon.is_finite() && self.pulses_per_gallon > 0.0) {
            return Err(ConfigError::InvalidValue(format!(
                "pulses_per_gallon must be positive, got {}",
                self.pulses_per_gallon
            )));
        }

        if self.sample_interval_us == 0 || self.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "sample and tick intervals must be non-zero".to_string(),
            ));
        }

        if self.sample_queue == 0
            || self.pulse_queue == 0
            || self.persist_queue == 0
            || self.broadcast_capacity == 0
        {
            return Err(ConfigError::InvalidValue(
                "queue capacities must be non-zero".to_string(),
            ));
        }

        if self.low_band.tolerance < 0.0 || self.high_band.tolerance < 0.0 {
            return Err(ConfigError::InvalidValue(
                "band tolerances cannot be negative".to_string(),
            ));
        }

        if self.low_band.upper() >= self.high_band.lower() {
            return Err(ConfigError::InvalidValue(format!(
                "low band [{}, {}] mV must sit entirely below high band [{}, {}] mV",
                self.low_band.lower(),
                self.low_band.upper(),
                self.high_band.lower(),
                self.high_band.upper()
            )));
        }

        if let Some(scale) = self.scale_mv_per_lsb {
            if !(scale.is_finite() && scale > 0.0) {
                return Err(ConfigError::InvalidValue(format!(
                    "scale_mv_per_lsb must be positive, got {}",
                    scale
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.sim_failure_rate) {
            return Err(ConfigError::InvalidValue(format!(
                "sim_failure_rate must be within [0, 1], got {}",
                self.sim_failure_rate
            )));
        }

        Ok(())
    }

    /// Gallons represented by one detected pulse
    pub fn volume_per_pulse(&self) -> f64 {
        1.0 / self.pulses_per_gallon
    }

    pub fn scale_per_lsb(&self) -> f64 {
        self.scale_mv_per_lsb
            .unwrap_or_else(|| self.adc_gain.millivolts_per_lsb())
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_micros(self.sample_interval_us)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("Invalid {} '{}', defaulting to {}", key, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}
