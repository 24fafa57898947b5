//! Core data types flowing between pipeline stages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One converted reading from the analog source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub millivolts: f64,
}

/// A single qualifying low→high transition on the sensor line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseEvent;

/// Point-in-time flow statistics, copied out of the aggregator once per tick
///
/// Volumes are in gallons, rates in gallons per hour. Serialized as the flat
/// object delivered to live subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowSnapshot {
    pub evaluated_at: DateTime<Utc>,
    pub total_pulses: u64,
    pub total_volume: f64,
    pub last_second_volume: f64,
    pub last_minute_volume: f64,
    pub max_minute_volume: f64,
    pub last_second_rate_gph: f64,
    pub last_minute_rate_gph: f64,
    pub max_rate_gph: f64,
    pub last_hour_actual_rate_gph: f64,
}

/// Volume measured between two consecutive ticks
///
/// Consecutive records share a boundary: `records[i].end_time == records[i + 1].start_time`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalRecord {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub volume_in_interval: f64,
}

impl IntervalRecord {
    /// Row shape written to storage: epoch seconds plus gallons
    pub fn as_row(&self) -> (i64, i64, f64) {
        (
            self.start_time.timestamp(),
            self.end_time.timestamp(),
            self.volume_in_interval,
        )
    }
}
