//! Rate aggregator - single owner of the running flow state
//!
//! The aggregator task is the only code that mutates `RateState`. Pulses
//! arrive over a bounded queue and are coalesced into the counters between
//! ticks; on every tick the state is read into an immutable `FlowSnapshot`,
//! the current interval is closed, and both go to the sink.
//!
//! ```text
//! PulseEvent ──► RateState::record_pulse()
//!                      │
//!         tick ──► RateState::snapshot() ──► FlowSnapshot ─┐
//!                  IntervalTracker::close() ──► IntervalRecord ─┴─► SnapshotSink
//! ```

use super::clock::Clock;
use super::shutdown::Shutdown;
use super::sink::SnapshotSink;
use super::types::{FlowSnapshot, IntervalRecord, PulseEvent};
use super::window::{MultiWindowCounter, WindowCounts};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Seconds per hour, for extrapolating the 1 s window
const SECOND_TO_HOUR: f64 = 3600.0;
/// Minutes per hour, for extrapolating the 1 min window
const MINUTE_TO_HOUR: f64 = 60.0;

/// Running pulse totals, trailing windows and maxima
#[derive(Debug, Clone)]
pub struct RateState {
    volume_per_pulse: f64,
    total_pulses: u64,
    windows: MultiWindowCounter,
    max_minute_volume: f64,
    max_rate_gph: f64,
}

impl RateState {
    pub fn new(volume_per_pulse: f64) -> Self {
        Self {
            volume_per_pulse,
            total_pulses: 0,
            windows: MultiWindowCounter::new(),
            max_minute_volume: 0.0,
            max_rate_gph: 0.0,
        }
    }

    pub fn record_pulse(&mut self, at: DateTime<Utc>) {
        self.total_pulses += 1;
        self.windows.record(at);
    }

    pub fn total_pulses(&self) -> u64 {
        self.total_pulses
    }

    pub fn volume_per_pulse(&self) -> f64 {
        self.volume_per_pulse
    }

    /// Evaluate every statistic at `now`
    ///
    /// Updates the running maximum; the volume and its extrapolated rate are
    /// always replaced together.
    pub fn snapshot(&mut self, now: DateTime<Utc>) -> FlowSnapshot {
        let WindowCounts {
            last_second,
            last_minute,
            last_hour,
        } = self.windows.counts(now);

        let total_volume = self.total_pulses as f64 * self.volume_per_pulse;
        let last_second_volume = last_second as f64 * self.volume_per_pulse;
        let last_minute_volume = last_minute as f64 * self.volume_per_pulse;
        let last_hour_actual_rate_gph = last_hour as f64 * self.volume_per_pulse;

        if last_minute_volume > self.max_minute_volume {
            self.max_minute_volume = last_minute_volume;
            self.max_rate_gph = last_minute_volume * MINUTE_TO_HOUR;
        }

        FlowSnapshot {
            evaluated_at: now,
            total_pulses: self.total_pulses,
            total_volume,
            last_second_volume,
            last_minute_volume,
            max_minute_volume: self.max_minute_volume,
            last_second_rate_gph: last_second_volume * SECOND_TO_HOUR,
            last_minute_rate_gph: last_minute_volume * MINUTE_TO_HOUR,
            max_rate_gph: self.max_rate_gph,
            last_hour_actual_rate_gph,
        }
    }
}

/// Hands out contiguous intervals: each one starts where the previous ended
#[derive(Debug, Clone)]
pub struct IntervalTracker {
    opened_at: DateTime<Utc>,
}

impl IntervalTracker {
    pub fn open(at: DateTime<Utc>) -> Self {
        Self { opened_at: at }
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Close the current interval at `now` and open the next one
    ///
    /// A clock that stepped backwards yields a zero-length interval rather than
    /// an overlapping one.
    pub fn close(&mut self, now: DateTime<Utc>, volume_in_interval: f64) -> IntervalRecord {
        let end_time = now.max(self.opened_at);
        let record = IntervalRecord {
            start_time: self.opened_at,
            end_time,
            volume_in_interval,
        };
        self.opened_at = end_time;
        record
    }
}

/// Totals reported when the aggregator task exits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregatorSummary {
    pub ticks: u64,
    pub total_pulses: u64,
    pub last_snapshot: Option<FlowSnapshot>,
}

pub struct FlowAggregator {
    state: RateState,
    intervals: IntervalTracker,
    clock: Arc<dyn Clock>,
    sink: SnapshotSink,
    ticks: u64,
    last_snapshot: Option<FlowSnapshot>,
}

impl FlowAggregator {
    pub fn new(volume_per_pulse: f64, clock: Arc<dyn Clock>, sink: SnapshotSink) -> Self {
        let intervals = IntervalTracker::open(clock.now());
        Self {
            state: RateState::new(volume_per_pulse),
            intervals,
            clock,
            sink,
            ticks: 0,
            last_snapshot: None,
        }
    }

    pub fn on_pulse(&mut self, _pulse: PulseEvent) {
        self.state.record_pulse(self.clock.now());
    }

    /// Produce one snapshot + interval record and hand both to the sink
    pub fn tick(&mut self) -> FlowSnapshot {
        let now = self.clock.now();
        let snapshot = self.state.snapshot(now);
        let record = self.intervals.close(now, snapshot.last_second_volume);

        self.sink.deliver(&snapshot, record);
        self.ticks += 1;
        self.last_snapshot = Some(snapshot);

        log::debug!(
            "Tick #{}: total={:.6} gal, 1s={:.2} GPH, 1m={:.2} GPH, 1h={:.4} GPH",
            self.ticks,
            snapshot.total_volume,
            snapshot.last_second_rate_gph,
            snapshot.last_minute_rate_gph,
            snapshot.last_hour_actual_rate_gph
        );

        snapshot
    }

    fn summary(&self) -> AggregatorSummary {
        AggregatorSummary {
            ticks: self.ticks,
            total_pulses: self.state.total_pulses(),
            last_snapshot: self.last_snapshot,
        }
    }

    /// Main loop: coalesce pulses, tick on a fixed period
    ///
    /// On shutdown or when the pulse queue closes, pending pulses are drained and
    /// one final tick closes the open interval.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<PulseEvent>,
        period: Duration,
        mut shutdown: Shutdown,
    ) -> AggregatorSummary {
        log::info!("🚀 Starting rate aggregator (tick: {}ms)", period.as_millis());
        log::info!("   ├─ Volume per pulse: {} gal", self.state.volume_per_pulse());
        log::info!("   └─ Windows: 1s / 1m / 1h");

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut stopped_by_signal = false;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.wait() => {
                    log::info!("Rate aggregator received shutdown signal");
                    stopped_by_signal = true;
                    break;
                }

                _ = ticker.tick() => {
                    self.tick();

                    if self.ticks % 60 == 0 {
                        if let Some(snapshot) = self.last_snapshot {
                            log::info!(
                                "📊 Flow: total {:.4} gal | 1m {:.2} GPH | max {:.2} GPH | pulse queue: {}",
                                snapshot.total_volume,
                                snapshot.last_minute_rate_gph,
                                snapshot.max_rate_gph,
                                rx.len()
                            );
                        }
                    }
                }

                received = rx.recv() => {
                    match received {
                        Some(pulse) => self.on_pulse(pulse),
                        None => {
                            log::warn!("⚠️  Pulse queue closed, stopping aggregator");
                            break;
                        }
                    }
                }
            }
        }

        if stopped_by_signal {
            // Upstream stages close the queue once they have flushed
            while let Some(pulse) = rx.recv().await {
                self.on_pulse(pulse);
            }
        }

        log::info!("🔄 Emitting final snapshot...");
        let snapshot = self.tick();
        let stats = self.sink.stats();

        log::info!(
            "✅ Rate aggregator stopped ({} ticks, {} pulses, {:.6} gal, {} records dropped)",
            self.ticks,
            snapshot.total_pulses,
            snapshot.total_volume,
            stats.records_dropped
        );

        self.summary()
    }
}
