//! Publish/subscribe seam between the aggregator and live consumers

use super::types::FlowSnapshot;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("no live subscribers")]
    NoSubscribers,
    #[error("publisher closed")]
    Closed,
}

/// Delivers snapshots to live consumers without blocking the caller
pub trait SnapshotPublisher: Send + Sync {
    /// Returns the number of subscribers the snapshot reached
    fn publish(&self, snapshot: &FlowSnapshot) -> Result<usize, PublishError>;
}

/// In-process fan-out over a bounded ring
///
/// Slow subscribers lose their oldest snapshots instead of holding up the
/// publisher; they see a `Lagged` error on their next receive.
#[derive(Debug)]
pub struct BroadcastHub {
    tx: broadcast::Sender<FlowSnapshot>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowSnapshot> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl SnapshotPublisher for BroadcastHub {
    fn publish(&self, snapshot: &FlowSnapshot) -> Result<usize, PublishError> {
        self.tx
            .send(*snapshot)
            .map_err(|_| PublishError::NoSubscribers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(total_pulses: u64) -> FlowSnapshot {
        FlowSnapshot {
            evaluated_at: Utc::now(),
            total_pulses,
            total_volume: total_pulses as f64 / 68_000.0,
            last_second_volume: 0.0,
            last_minute_volume: 0.0,
            max_minute_volume: 0.0,
            last_second_rate_gph: 0.0,
            last_minute_rate_gph: 0.0,
            max_rate_gph: 0.0,
            last_hour_actual_rate_gph: 0.0,
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = BroadcastHub::new(4);
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.publish(&snapshot(1)), Err(PublishError::NoSubscribers));
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let hub = BroadcastHub::new(4);
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        assert_eq!(hub.subscriber_count(), 2);
        assert_eq!(hub.publish(&snapshot(7)), Ok(2));
        assert_eq!(a.recv().await.unwrap().total_pulses, 7);
        assert_eq!(b.recv().await.unwrap().total_pulses, 7);
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags_without_blocking() {
        let hub = BroadcastHub::new(2);
        let mut slow = hub.subscribe();

        for i in 0..5 {
            assert!(hub.publish(&snapshot(i)).is_ok());
        }

        assert!(matches!(
            slow.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert_eq!(slow.recv().await.unwrap().total_pulses, 3);
        assert_eq!(slow.recv().await.unwrap().total_pulses, 4);
    }
}
