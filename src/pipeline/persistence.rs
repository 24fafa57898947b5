//! Persistence consumer - drains interval records into the store

use super::db::IntervalWriter;
use super::shutdown::Shutdown;
use super::types::IntervalRecord;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Upper bound on records written per transaction
pub const DEFAULT_BATCH_LIMIT: usize = 256;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PersistenceStats {
    pub written: u64,
    pub dropped: u64,
    pub failed_batches: u64,
}

/// Background task that writes interval records as they arrive
///
/// A failed write is logged and its batch dropped; flow history is best-effort
/// and never holds up live counting. After shutdown the queue is drained until
/// the sink closes it.
pub async fn persistence_task(
    mut rx: mpsc::Receiver<IntervalRecord>,
    writer: Arc<dyn IntervalWriter>,
    batch_limit: usize,
    mut shutdown: Shutdown,
) -> PersistenceStats {
    log::info!(
        "💾 Starting persistence consumer (backend: {}, batch limit: {})",
        writer.backend_type(),
        batch_limit
    );

    let batch_limit = batch_limit.max(1);
    let mut stats = PersistenceStats::default();

    loop {
        let first = tokio::select! {
            biased;
            _ = shutdown.wait() => None,
            received = rx.recv() => match received {
                Some(record) => Some(record),
                None => break,
            },
        };

        let Some(first) = first else {
            log::info!("Persistence consumer received shutdown signal, draining queue");
            while let Some(record) = rx.recv().await {
                let mut batch = vec![record];
                fill_batch(&mut rx, &mut batch, batch_limit);
                write_batch(writer.as_ref(), batch, &mut stats).await;
            }
            break;
        };

        let mut batch = vec![first];
        fill_batch(&mut rx, &mut batch, batch_limit);
        write_batch(writer.as_ref(), batch, &mut stats).await;
    }

    log::info!(
        "✅ Persistence consumer stopped ({} written, {} dropped)",
        stats.written,
        stats.dropped
    );
    stats
}

fn fill_batch(rx: &mut mpsc::Receiver<IntervalRecord>, batch: &mut Vec<IntervalRecord>, limit: usize) {
    while batch.len() < limit {
        match rx.try_recv() {
            Ok(record) => batch.push(record),
            Err(_) => break,
        }
    }
}

async fn write_batch(writer: &dyn IntervalWriter, batch: Vec<IntervalRecord>, stats: &mut PersistenceStats) {
    let count = batch.len() as u64;
    match writer.write_intervals(batch).await {
        Ok(()) => stats.written += count,
        Err(e) => {
            stats.dropped += count;
            stats.failed_batches += 1;
            log::error!("❌ Failed to persist {} intervals, dropping: {}", count, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::db::PersistError;
    use crate::pipeline::shutdown;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingWriter {
        batches: Mutex<Vec<Vec<IntervalRecord>>>,
        fail_first: Mutex<bool>,
    }

    #[async_trait]
    impl IntervalWriter for RecordingWriter {
        async fn write_intervals(&self, records: Vec<IntervalRecord>) -> Result<(), PersistError> {
            let mut fail = self.fail_first.lock().unwrap();
            if *fail {
                *fail = false;
                return Err(PersistError::Poisoned);
            }
            self.batches.lock().unwrap().push(records);
            Ok(())
        }

        fn backend_type(&self) -> &'static str {
            "memory"
        }
    }

    fn record(i: i64) -> IntervalRecord {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(i);
        IntervalRecord {
            start_time: start,
            end_time: start + Duration::seconds(1),
            volume_in_interval: 0.01,
        }
    }

    #[tokio::test]
    async fn test_queued_records_are_batched() {
        let (tx, rx) = mpsc::channel(64);
        let writer = Arc::new(RecordingWriter::default());
        let (_trigger, shutdown) = shutdown::channel();

        for i in 0..10 {
            tx.send(record(i)).await.unwrap();
        }
        drop(tx);

        let stats = persistence_task(rx, writer.clone(), 4, shutdown).await;

        assert_eq!(stats.written, 10);
        let batches = writer.batches.lock().unwrap();
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        let flat: Vec<IntervalRecord> = batches.iter().flatten().copied().collect();
        assert_eq!(flat, (0..10).map(record).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_failed_batch_is_dropped_and_loop_continues() {
        let (tx, rx) = mpsc::channel(64);
        let writer = Arc::new(RecordingWriter::default());
        *writer.fail_first.lock().unwrap() = true;
        let (_trigger, shutdown) = shutdown::channel();

        tx.send(record(0)).await.unwrap();
        tx.send(record(1)).await.unwrap();
        let handle = tokio::spawn(persistence_task(rx, writer.clone(), 1, shutdown));
        drop(tx);

        let stats = handle.await.unwrap();
        assert_eq!(stats.failed_batches, 1);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.written, 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_until_closed() {
        let (tx, rx) = mpsc::channel(64);
        let writer = Arc::new(RecordingWriter::default());
        let (trigger, shutdown) = shutdown::channel();
        trigger.trigger();

        for i in 0..3 {
            tx.send(record(i)).await.unwrap();
        }
        drop(tx);

        let stats = persistence_task(rx, writer, 16, shutdown).await;
        assert_eq!(stats.written, 3);
    }
}
