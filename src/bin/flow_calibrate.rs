//! Flow Calibrate
//!
//! Collects a batch of readings from the converter and reports their trimmed
//! mean and spread, so band centers can be set from what the line actually
//! reads at rest.
//!
//! Usage:
//!   cargo run --release --bin flow_calibrate
//!
//! Environment variables:
//!   FLOW_CALIBRATION_SAMPLES - Readings to collect (default: 2000)
//!   FLOW_CALIBRATION_THRESHOLD_MV - Maximum accepted std dev (default: 50)

use dotenv::dotenv;
use log::{error, info, warn};
use pulseflow::outlier::{remove_outliers, OutlierError};
use pulseflow::pipeline::{
    ads1115::{AdcSettings, Ads1115},
    config::PipelineConfig,
    sampler::AnalogSource,
    simulated::{SimulatedBus, SimulationSettings},
};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = PipelineConfig::from_env()?;

    info!("🎯 Flow Calibrate");
    info!("   ├─ Samples: {}", config.calibration_samples);
    info!("   ├─ Threshold: {} mV", config.calibration_threshold_mv);
    info!("   └─ Scale: {} mV/LSB", config.scale_per_lsb());

    // Line at rest: no pulses
    let bus = SimulatedBus::new(
        AdcSettings::default().address,
        SimulationSettings {
            pulse_hz: 0.0,
            low_mv: config.low_band.center,
            high_mv: config.high_band.center,
            noise_mv: config.sim_noise_mv,
            failure_rate: config.sim_failure_rate,
        },
    );
    let mut adc = Ads1115::open(
        bus,
        AdcSettings {
            gain: config.adc_gain,
            ..Default::default()
        },
    )?;

    let scale = config.scale_per_lsb();
    let mut ticker = tokio::time::interval(config.sample_interval());
    let mut readings = Vec::with_capacity(config.calibration_samples);
    let mut failures = 0u64;

    while readings.len() < config.calibration_samples {
        ticker.tick().await;
        match adc.read_code() {
            Ok(code) => readings.push(code as f64 * scale),
            Err(e) => {
                failures += 1;
                if failures == 1 {
                    warn!("⚠️  Read failed, skipping: {}", e);
                }
                if failures > config.calibration_samples as u64 {
                    error!("❌ Too many read failures ({}), giving up", failures);
                    return Err(e.into());
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }
    }

    info!("✅ Collected {} readings ({} read failures)", readings.len(), failures);

    match remove_outliers(&readings, config.calibration_threshold_mv) {
        Ok(stats) => {
            info!("📊 Calibration result:");
            info!("   ├─ Mean: {:.2} mV", stats.mean);
            info!("   ├─ Std dev: {:.2} mV", stats.std_dev);
            info!("   ├─ Retained: {}", stats.retained);
            info!("   └─ Removed: {}", stats.removed.len());
            Ok(())
        }
        Err(OutlierError::Exhausted { removed }) => {
            error!(
                "❌ Spread never fell below {} mV; all {} readings were trimmed",
                config.calibration_threshold_mv,
                removed.len()
            );
            Err(OutlierError::Exhausted { removed }.into())
        }
        Err(e) => {
            error!("❌ Calibration failed: {}", e);
            Err(e.into())
        }
    }
}
