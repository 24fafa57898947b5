//! Live snapshot feed - one flat JSON object per line, size-rotated

use super::shutdown::Shutdown;
use super::types::FlowSnapshot;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub struct SnapshotFeedWriter {
    file: BufWriter<File>,
    current_size: u64,
    max_size: u64,
    base_path: PathBuf,
    rotation_count: u32,
    max_rotations: u32,
}

impl SnapshotFeedWriter {
    pub fn new(path: impl AsRef<Path>, max_size_mb: u64, max_rotations: u32) -> Result<Self, FeedError> {
        Self::with_max_bytes(path, max_size_mb * 1024 * 1024, max_rotations)
    }

    pub fn with_max_bytes(path: impl AsRef<Path>, max_size: u64, max_rotations: u32) -> Result<Self, FeedError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let current_size = file.metadata()?.len();

        Ok(Self {
            file: BufWriter::new(file),
            current_size,
            max_size,
            base_path: path.to_path_buf(),
            rotation_count: 0,
            max_rotations: max_rotations.max(1),
        })
    }

    pub fn write_snapshot(&mut self, snapshot: &FlowSnapshot) -> Result<(), FeedError> {
        let json = serde_json::to_string(snapshot)?;
        writeln!(self.file, "{}", json)?;
        self.file.flush()?;

        self.current_size += (json.len() + 1) as u64;

        if self.current_size >= self.max_size {
            self.rotate()?;
        }

        Ok(())
    }

    fn rotated_path(&self, index: u32) -> PathBuf {
        let mut name = self.base_path.as_os_str().to_owned();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> Result<(), FeedError> {
        self.file.flush()?;

        // Oldest falls off the end
        let oldest = self.rotated_path(self.max_rotations);
        if oldest.exists() {
            std::fs::remove_file(&oldest)?;
        }
        for i in (1..self.max_rotations).rev() {
            let old_path = self.rotated_path(i);
            if old_path.exists() {
                std::fs::rename(&old_path, self.rotated_path(i + 1))?;
            }
        }

        if self.base_path.exists() {
            std::fs::rename(&self.base_path, self.rotated_path(1))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.base_path)?;

        self.file = BufWriter::new(file);
        self.current_size = 0;
        self.rotation_count += 1;

        log::info!("📄 Rotated snapshot feed (rotation #{})", self.rotation_count);

        Ok(())
    }
}

/// Subscriber loop appending every snapshot to the feed
///
/// Lag and write errors are logged and skipped; they never reach the aggregator.
pub async fn live_feed_task(
    mut rx: broadcast::Receiver<FlowSnapshot>,
    mut writer: SnapshotFeedWriter,
    mut shutdown: Shutdown,
) -> u64 {
    log::info!("📡 Starting live snapshot feed → {}", writer.base_path.display());

    let mut written = 0u64;

    loop {
        let received = tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            received = rx.recv() => received,
        };

        match received {
            Ok(snapshot) => match writer.write_snapshot(&snapshot) {
                Ok(()) => written += 1,
                Err(e) => log::warn!("⚠️  Failed to write snapshot to feed: {}", e),
            },
            Err(RecvError::Lagged(skipped)) => {
                log::warn!("⚠️  Live feed lagged, skipped {} snapshots", skipped);
            }
            Err(RecvError::Closed) => {
                log::info!("Snapshot hub closed, stopping live feed");
                return written;
            }
        }
    }

    // Whatever the hub already holds, including the final snapshot if it has been published
    loop {
        match rx.try_recv() {
            Ok(snapshot) => {
                if writer.write_snapshot(&snapshot).is_ok() {
                    written += 1;
                }
            }
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }

    log::info!("✅ Live feed stopped ({} snapshots written)", written);
    written
}
