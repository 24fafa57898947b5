//! Trailing-window event counters
//!
//! A window is split into a fixed number of slots. Events landing in the same
//! slot are coalesced into one counter, so memory stays bounded by the slot
//! count no matter how fast pulses arrive. A slot leaves the window once its
//! start falls at or before `now - span`, so an event is counted for between
//! `span - slot` and `span`. Counts lean low by up to one slot, never high.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Slots per window
pub const DEFAULT_RESOLUTION: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowSpan {
    Second,
    Minute,
    Hour,
}

impl WindowSpan {
    pub fn duration_ms(&self) -> i64 {
        match self {
            WindowSpan::Second => 1_000,
            WindowSpan::Minute => 60 * 1_000,
            WindowSpan::Hour => 60 * 60 * 1_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WindowCounter {
    span: WindowSpan,
    slot_ms: i64,
    /// (slot index, events in slot), oldest first
    slots: VecDeque<(i64, u64)>,
    count: u64,
}

impl WindowCounter {
    pub fn new(span: WindowSpan) -> Self {
        Self::with_resolution(span, DEFAULT_RESOLUTION)
    }

    pub fn with_resolution(span: WindowSpan, resolution: u32) -> Self {
        let slot_ms = (span.duration_ms() / resolution.max(1) as i64).max(1);
        Self {
            span,
            slot_ms,
            slots: VecDeque::with_capacity(resolution as usize + 1),
            count: 0,
        }
    }

    /// Register one event at `at`
    ///
    /// Timestamps earlier than the newest slot (clock stepped backwards) are
    /// folded into the newest slot.
    pub fn record(&mut self, at: DateTime<Utc>) {
        let slot = at.timestamp_millis().div_euclid(self.slot_ms);

        match self.slots.back_mut() {
            Some((newest, events)) if *newest >= slot => *events += 1,
            _ => self.slots.push_back((slot, 1)),
        }
        self.count += 1;
    }

    /// Events inside the trailing span ending at `now`
    pub fn rate(&mut self, now: DateTime<Utc>) -> u64 {
        self.evict(now);
        self.count
    }

    fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = now.timestamp_millis() - self.span.duration_ms();

        while let Some(&(slot, events)) = self.slots.front() {
            let slot_start = slot * self.slot_ms;
            if slot_start > cutoff {
                break;
            }
            self.count -= events;
            self.slots.pop_front();
        }
    }
}

/// The three trailing windows the aggregator tracks
#[derive(Debug, Clone)]
pub struct MultiWindowCounter {
    second: WindowCounter,
    minute: WindowCounter,
    hour: WindowCounter,
}

/// Event counts read from all windows at the same instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowCounts {
    pub last_second: u64,
    pub last_minute: u64,
    pub last_hour: u64,
}

impl MultiWindowCounter {
    pub fn new() -> Self {
        Self {
            second: WindowCounter::new(WindowSpan::Second),
            minute: WindowCounter::new(WindowSpan::Minute),
            hour: WindowCounter::new(WindowSpan::Hour),
        }
    }

    pub fn record(&mut self, at: DateTime<Utc>) {
        self.second.record(at);
        self.minute.record(at);
        self.hour.record(at);
    }

    pub fn counts(&mut self, now: DateTime<Utc>) -> WindowCounts {
        WindowCounts {
            last_second: self.second.rate(now),
            last_minute: self.minute.rate(now),
            last_hour: self.hour.rate(now),
        }
    }
}

impl Default for MultiWindowCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_event_expires_once_slot_start_leaves_span() {
        let mut window = WindowCounter::new(WindowSpan::Second);
        window.record(t0());
        window.record(t0() + Duration::milliseconds(49));

        assert_eq!(window.rate(t0() + Duration::milliseconds(999)), 2);
        // Both share the slot starting at t0; the later one goes early
        assert_eq!(window.rate(t0() + Duration::milliseconds(1000)), 0);
    }

    #[test]
    fn test_unaligned_ticks_never_count_an_event_twice() {
        let mut window = WindowCounter::new(WindowSpan::Second);
        let mut tick = t0() + Duration::milliseconds(530);
        let mut summed = 0;

        // One event every 10 ms for 10 s, read on 1 s ticks offset from slot edges
        for i in 0..1_000 {
            let at = t0() + Duration::milliseconds(i * 10);
            while at >= tick {
                summed += window.rate(tick);
                tick += Duration::seconds(1);
            }
            window.record(at);
        }
        summed += window.rate(tick);

        assert!(summed <= 1_000, "summed {} over 1000 events", summed);
    }

    #[test]
    fn test_same_slot_events_are_coalesced() {
        let mut window = WindowCounter::new(WindowSpan::Minute);
        for i in 0..10_000 {
            window.record(t0() + Duration::microseconds(i));
        }

        assert_eq!(window.slots.len(), 1);
        assert_eq!(window.rate(t0() + Duration::seconds(1)), 10_000);
    }

    #[test]
    fn test_slots_stay_bounded_under_sustained_traffic() {
        let mut window = WindowCounter::new(WindowSpan::Second);
        let mut now = t0();
        for _ in 0..5_000 {
            window.record(now);
            now += Duration::milliseconds(1);
            window.rate(now);
        }

        assert!(window.slots.len() <= DEFAULT_RESOLUTION as usize + 1);
        // 1 event/ms over a 1 s window, short by at most one slot
        let count = window.rate(now);
        assert!((950..=1_000).contains(&count), "count = {}", count);
    }

    #[test]
    fn test_backwards_timestamp_is_kept() {
        let mut window = WindowCounter::new(WindowSpan::Second);
        window.record(t0());
        window.record(t0() - Duration::milliseconds(500));

        assert_eq!(window.rate(t0()), 2);
    }

    #[test]
    fn test_multi_window_counts_diverge_with_age() {
        let mut windows = MultiWindowCounter::new();
        windows.record(t0());
        windows.record(t0() + Duration::seconds(30));
        windows.record(t0() + Duration::seconds(95));

        let counts = windows.counts(t0() + Duration::milliseconds(95_500));
        assert_eq!(
            counts,
            WindowCounts {
                last_second: 1,
                last_minute: 1,
                last_hour: 3,
            }
        );

        let counts = windows.counts(t0() + Duration::hours(2));
        assert_eq!(counts, WindowCounts::default());
    }
}
