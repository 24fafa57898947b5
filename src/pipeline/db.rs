//! Interval persistence
//!
//! Table written:
//! - `flow_intervals` - INSERT (append-only, one row per tick)

use super::types::IntervalRecord;
use crate::sqlite_pragma::apply_optimized_pragmas;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection lock poisoned")]
    Poisoned,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS flow_intervals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    interval_start INTEGER NOT NULL,
    interval_end INTEGER NOT NULL,
    volume REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_flow_intervals_start ON flow_intervals(interval_start);
"#;

/// A stored interval row: epoch seconds and gallons
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoredInterval {
    pub id: i64,
    pub interval_start: i64,
    pub interval_end: i64,
    pub volume: f64,
}

/// Storage collaborator for closed intervals
#[async_trait]
pub trait IntervalWriter: Send + Sync {
    /// Append records in order; either all land or none do
    async fn write_intervals(&self, records: Vec<IntervalRecord>) -> Result<(), PersistError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}

/// SQLite implementation of IntervalWriter
pub struct SqliteIntervalWriter {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteIntervalWriter {
    /// Open (or create) the database and ensure the schema exists
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;
        conn.execute_batch(SCHEMA)?;

        log::info!("✅ SQLite interval store ready at {} (WAL mode)", db_path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Most recent rows, oldest first
    pub fn recent_intervals(&self, limit: usize) -> Result<Vec<StoredInterval>, PersistError> {
        let conn = self.conn.lock().map_err(|_| PersistError::Poisoned)?;
        let mut stmt = conn.prepare(
            "SELECT id, interval_start, interval_end, volume FROM (
                 SELECT id, interval_start, interval_end, volume FROM flow_intervals
                 ORDER BY id DESC LIMIT ?1
             ) ORDER BY id ASC",
        )?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(StoredInterval {
                    id: row.get(0)?,
                    interval_start: row.get(1)?,
                    interval_end: row.get(2)?,
                    volume: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Total gallons over intervals starting within `[from, to)` (epoch seconds)
    pub fn volume_between(&self, from: i64, to: i64) -> Result<f64, PersistError> {
        let conn = self.conn.lock().map_err(|_| PersistError::Poisoned)?;
        let total: f64 = conn.query_row(
            "SELECT COALESCE(SUM(volume), 0.0) FROM flow_intervals
             WHERE interval_start >= ?1 AND interval_start < ?2",
            params![from, to],
            |row| row.get(0),
        )?;
        Ok(total)
    }
}

#[async_trait]
impl IntervalWriter for SqliteIntervalWriter {
    async fn write_intervals(&self, records: Vec<IntervalRecord>) -> Result<(), PersistError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().map_err(|_| PersistError::Poisoned)?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO flow_intervals (interval_start, interval_end, volume) VALUES (?1, ?2, ?3)",
            )?;
            for record in &records {
                let (start, end, volume) = record.as_row();
                stmt.execute(params![start, end, volume])?;
            }
        }
        tx.commit()?;

        log::debug!("✅ Wrote {} intervals to SQLite", records.len());
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::tempdir;

    fn contiguous_records(count: i64) -> Vec<IntervalRecord> {
        let start = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| IntervalRecord {
                start_time: start + Duration::seconds(i),
                end_time: start + Duration::seconds(i + 1),
                volume_in_interval: 0.25,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_write_and_read_back() {
        let dir = tempdir().unwrap();
        let writer = SqliteIntervalWriter::new(dir.path().join("flow.db")).unwrap();

        writer.write_intervals(contiguous_records(5)).await.unwrap();

        let rows = writer.recent_intervals(10).unwrap();
        assert_eq!(rows.len(), 5);
        for pair in rows.windows(2) {
            assert_eq!(pair[0].interval_end, pair[1].interval_start);
        }
        assert_eq!(rows[0].volume, 0.25);
    }

    #[tokio::test]
    async fn test_recent_intervals_returns_newest_in_order() {
        let dir = tempdir().unwrap();
        let writer = SqliteIntervalWriter::new(dir.path().join("flow.db")).unwrap();
        let records = contiguous_records(10);

        writer.write_intervals(records.clone()).await.unwrap();

        let rows = writer.recent_intervals(3).unwrap();
        let starts: Vec<i64> = rows.iter().map(|r| r.interval_start).collect();
        let expected: Vec<i64> = records[7..].iter().map(|r| r.start_time.timestamp()).collect();
        assert_eq!(starts, expected);
    }

    #[tokio::test]
    async fn test_volume_between() {
        let dir = tempdir().unwrap();
        let writer = SqliteIntervalWriter::new(dir.path().join("flow.db")).unwrap();
        let records = contiguous_records(8);
        let from = records[2].start_time.timestamp();
        let to = records[6].start_time.timestamp();

        writer.write_intervals(records).await.unwrap();

        assert_eq!(writer.volume_between(from, to).unwrap(), 1.0);
        assert_eq!(writer.volume_between(0, 1).unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_schema_is_idempotent_and_wal_enabled() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/flow.db");

        let writer = SqliteIntervalWriter::new(&path).unwrap();
        writer.write_intervals(contiguous_records(2)).await.unwrap();
        drop(writer);

        let reopened = SqliteIntervalWriter::new(&path).unwrap();
        assert_eq!(reopened.recent_intervals(10).unwrap().len(), 2);

        let conn = Connection::open(&path).unwrap();
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(journal_mode.to_lowercase(), "wal");
    }
}
