//! Task wiring for the flow pipeline
//!
//! ```text
//! Sampler ──[samples]──► EdgeDetector ──[pulses]──► FlowAggregator ──► SnapshotSink
//!                                                                        │      │
//!                                              BroadcastHub ◄────────────┘      │
//!                                                   └──► live feed              │
//!                                           persistence_task ◄──[records]──────┘
//! ```
//!
//! Shutdown cascades downstream: the sampler stops first and every later stage
//! drains its queue until the stage before it closes it, so the final snapshot
//! includes every pulse that was detected.

use super::aggregator::{AggregatorSummary, FlowAggregator};
use super::broadcast::BroadcastHub;
use super::clock::Clock;
use super::config::PipelineConfig;
use super::db::IntervalWriter;
use super::edge::EdgeDetector;
use super::feed::{live_feed_task, SnapshotFeedWriter};
use super::persistence::{persistence_task, PersistenceStats, DEFAULT_BATCH_LIMIT};
use super::sampler::{AnalogSource, Sampler, SamplerStats};
use super::shutdown::{self, ShutdownTrigger};
use super::sink::SnapshotSink;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline task failed: {0}")]
    Task(#[from] JoinError),
}

/// What each stage reported when it stopped
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineReport {
    pub sampler: SamplerStats,
    pub pulses_detected: u64,
    pub dead_zone_samples: u64,
    pub aggregator: AggregatorSummary,
    pub persistence: PersistenceStats,
    pub feed_snapshots: Option<u64>,
}

pub struct FlowPipeline {
    trigger: ShutdownTrigger,
    feed_trigger: ShutdownTrigger,
    sampler: JoinHandle<SamplerStats>,
    edge: JoinHandle<EdgeDetector>,
    aggregator: JoinHandle<AggregatorSummary>,
    persistence: JoinHandle<PersistenceStats>,
    feed: Option<JoinHandle<u64>>,
}

impl FlowPipeline {
    /// Spawn every stage onto the current runtime
    pub fn spawn<S>(
        config: &PipelineConfig,
        source: S,
        clock: Arc<dyn Clock>,
        hub: Arc<BroadcastHub>,
        writer: Arc<dyn IntervalWriter>,
        feed: Option<SnapshotFeedWriter>,
    ) -> Self
    where
        S: AnalogSource + 'static,
    {
        let (trigger, shutdown) = shutdown::channel();
        // The feed outlives the aggregator so it can record the final snapshot
        let (feed_trigger, feed_shutdown) = shutdown::channel();

        let (sample_tx, sample_rx) = mpsc::channel(config.sample_queue);
        let (pulse_tx, pulse_rx) = mpsc::channel(config.pulse_queue);
        let (record_tx, record_rx) = mpsc::channel(config.persist_queue);

        let feed = feed.map(|writer| tokio::spawn(live_feed_task(hub.subscribe(), writer, feed_shutdown)));

        let persistence = tokio::spawn(persistence_task(
            record_rx,
            writer,
            DEFAULT_BATCH_LIMIT,
            shutdown.clone(),
        ));

        let live_subscribers = hub.subscriber_count();
        let sink = SnapshotSink::new(hub, record_tx);
        let aggregator = FlowAggregator::new(config.volume_per_pulse(), clock.clone(), sink);
        let aggregator = tokio::spawn(aggregator.run(pulse_rx, config.tick_interval(), shutdown.clone()));

        let detector = EdgeDetector::new(config.low_band, config.high_band);
        let edge = tokio::spawn(detector.run(sample_rx, pulse_tx, shutdown.clone()));

        let sampler = Sampler::new(source, config.scale_per_lsb(), clock);
        let sampler = tokio::spawn(sampler.run(sample_tx, config.sample_interval(), shutdown));

        log::info!("✅ Flow pipeline started");
        log::info!("   ├─ Queues: samples={}, pulses={}, records={}", config.sample_queue, config.pulse_queue, config.persist_queue);
        log::info!("   ├─ Live feed: {}", if feed.is_some() { "enabled" } else { "disabled" });

        log::info!("   └─ Live subscribers: {}", live_subscribers);

        Self {
            trigger,
            feed_trigger,
            sampler,
            edge,
            aggregator,
            persistence,
            feed,
        }
    }

    /// Signal every stage to stop and wait for the final snapshot
    pub async fn shutdown(self) -> Result<PipelineReport, PipelineError> {
        log::info!("🛑 Shutting down flow pipeline...");
        self.trigger.trigger();
        let sampler = self.sampler.await?;
        Self::finish(sampler, self.edge, self.aggregator, self.persistence, self.feed, self.feed_trigger).await
    }

    /// Wait for the source to run dry, then stop the remaining stages
    pub async fn run_to_completion(self) -> Result<PipelineReport, PipelineError> {
        let sampler = self.sampler.await?;
        self.trigger.trigger();
        Self::finish(sampler, self.edge, self.aggregator, self.persistence, self.feed, self.feed_trigger).await
    }

    async fn finish(
        sampler: SamplerStats,
        edge: JoinHandle<EdgeDetector>,
        aggregator: JoinHandle<AggregatorSummary>,
        persistence: JoinHandle<PersistenceStats>,
        feed: Option<JoinHandle<u64>>,
        feed_trigger: ShutdownTrigger,
    ) -> Result<PipelineReport, PipelineError> {
        let detector = edge.await?;
        let aggregator = aggregator.await?;
        let persistence = persistence.await?;

        feed_trigger.trigger();
        let feed_snapshots = match feed {
            Some(handle) => Some(handle.await?),
            None => None,
        };

        Ok(PipelineReport {
            sampler,
            pulses_detected: detector.pulses(),
            dead_zone_samples: detector.dead_zone_samples(),
            aggregator,
            persistence,
            feed_snapshots,
        })
    }
}
