//! Flow Runtime
//!
//! Runs the full flow pipeline against the converter:
//! - Programs the converter (simulated bus until a hardware bus is wired in)
//! - Opens the SQLite interval store
//! - Spawns sampler, edge detector, aggregator, persistence and live feed
//! - Emits a final snapshot on CTRL+C
//!
//! Usage:
//!   cargo run --release --bin flow_runtime
//!
//! Environment variables:
//!   FLOW_DB_PATH - SQLite database path (default: flow.db)
//!   FLOW_FEED_PATH - JSON Lines snapshot feed (default: feed/snapshots.jsonl)
//!   FLOW_TICK_INTERVAL_MS - Snapshot period (default: 1000)
//!   FLOW_PULSES_PER_GALLON - Sensor K-factor (default: 68000)

use dotenv::dotenv;
use log::{error, info};
use pulseflow::pipeline::{
    ads1115::{AdcSettings, Ads1115},
    broadcast::BroadcastHub,
    clock::SystemClock,
    config::PipelineConfig,
    db::{IntervalWriter, SqliteIntervalWriter},
    feed::SnapshotFeedWriter,
    runtime::FlowPipeline,
    simulated::{SimulatedBus, SimulationSettings},
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 Flow Runtime");
    info!("   └─ Version: {}", env!("CARGO_PKG_VERSION"));

    let config = PipelineConfig::from_env()?;

    info!("✅ Configuration loaded");
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Live feed: {}", config.feed_path);
    info!("   ├─ Sample interval: {}µs", config.sample_interval_us);
    info!("   ├─ Tick interval: {}ms", config.tick_interval_ms);
    info!(
        "   ├─ Bands: low {}±{} mV, high {}±{} mV",
        config.low_band.center, config.low_band.tolerance, config.high_band.center, config.high_band.tolerance
    );
    info!("   ├─ Pulses per gallon: {}", config.pulses_per_gallon);
    info!("   └─ Scale: {} mV/LSB", config.scale_per_lsb());

    info!("🔧 Initializing converter...");
    let bus = SimulatedBus::new(
        AdcSettings::default().address,
        SimulationSettings {
            pulse_hz: config.sim_pulse_hz,
            low_mv: config.low_band.center,
            high_mv: config.high_band.center,
            noise_mv: config.sim_noise_mv,
            failure_rate: config.sim_failure_rate,
        },
    );
    let adc = match Ads1115::open(
        bus,
        AdcSettings {
            gain: config.adc_gain,
            ..Default::default()
        },
    ) {
        Ok(adc) => adc,
        Err(e) => {
            error!("❌ Converter initialization failed: {}", e);
            return Err(e.into());
        }
    };

    info!("🔧 Initializing database...");
    let writer: Arc<dyn IntervalWriter> = match SqliteIntervalWriter::new(&config.db_path) {
        Ok(writer) => Arc::new(writer),
        Err(e) => {
            error!("❌ Failed to open database {}: {}", config.db_path, e);
            return Err(e.into());
        }
    };

    let feed = match SnapshotFeedWriter::new(&config.feed_path, config.feed_max_size_mb, config.feed_max_rotations) {
        Ok(feed) => Some(feed),
        Err(e) => {
            error!("❌ Failed to open live feed {}, continuing without it: {}", config.feed_path, e);
            None
        }
    };

    let hub = Arc::new(BroadcastHub::new(config.broadcast_capacity));
    let pipeline = FlowPipeline::spawn(&config, adc, Arc::new(SystemClock), hub, writer, feed);

    info!("🔄 Press CTRL+C to shutdown gracefully");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("");
            info!("⚠️  Received CTRL+C, shutting down...");
        }
        Err(err) => {
            error!("❌ Failed to listen for CTRL+C: {}", err);
        }
    }

    let report = pipeline.shutdown().await?;

    info!("📊 Final totals:");
    info!(
        "   ├─ Samples: {} ({} read failures)",
        report.sampler.samples, report.sampler.read_failures
    );
    info!(
        "   ├─ Pulses: {} ({} dead-zone samples)",
        report.pulses_detected, report.dead_zone_samples
    );
    if let Some(snapshot) = report.aggregator.last_snapshot {
        info!("   ├─ Volume: {:.6} gal", snapshot.total_volume);
        info!("   ├─ Max rate: {:.2} GPH", snapshot.max_rate_gph);
    }
    info!(
        "   └─ Intervals: {} written, {} dropped",
        report.persistence.written, report.persistence.dropped
    );
    info!("✅ Flow runtime stopped");
    Ok(())
}
