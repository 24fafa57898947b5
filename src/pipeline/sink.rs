//! Snapshot sink - fan-out from the aggregator to live and storage consumers
//!
//! Nothing here awaits: the hub is a ring and the record queue is fed with
//! `try_send`, so a slow consumer can never delay a tick.

use super::broadcast::{PublishError, SnapshotPublisher};
use super::types::{FlowSnapshot, IntervalRecord};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SinkStats {
    pub snapshots: u64,
    /// Snapshots published while nobody was listening
    pub unheard: u64,
    pub records_queued: u64,
    pub records_dropped: u64,
}

pub struct SnapshotSink {
    publisher: Arc<dyn SnapshotPublisher>,
    records: mpsc::Sender<IntervalRecord>,
    stats: SinkStats,
}

impl SnapshotSink {
    pub fn new(publisher: Arc<dyn SnapshotPublisher>, records: mpsc::Sender<IntervalRecord>) -> Self {
        Self {
            publisher,
            records,
            stats: SinkStats::default(),
        }
    }

    pub fn deliver(&mut self, snapshot: &FlowSnapshot, record: IntervalRecord) {
        self.stats.snapshots += 1;

        match self.publisher.publish(snapshot) {
            Ok(_) => {}
            Err(PublishError::NoSubscribers) => {
                self.stats.unheard += 1;
            }
            Err(e) => {
                log::debug!("Snapshot not broadcast: {}", e);
            }
        }

        match self.records.try_send(record) {
            Ok(()) => self.stats.records_queued += 1,
            Err(TrySendError::Full(record)) => {
                self.stats.records_dropped += 1;
                log::warn!(
                    "⚠️  Persistence queue full, dropping interval {} → {} ({} dropped so far)",
                    record.start_time.timestamp(),
                    record.end_time.timestamp(),
                    self.stats.records_dropped
                );
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.records_dropped += 1;
                if self.stats.records_dropped == 1 {
                    log::error!("❌ Persistence queue closed, interval records are being dropped");
                }
            }
        }
    }

    pub fn stats(&self) -> SinkStats {
        self.stats
    }
}
