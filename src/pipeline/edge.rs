//! Hysteresis edge detector turning voltage samples into pulse events

use super::shutdown::Shutdown;
use super::types::{PulseEvent, Sample};
use tokio::sync::mpsc;

/// Voltage range `center ± tolerance` (inclusive), in millivolts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub center: f64,
    pub tolerance: f64,
}

impl Band {
    pub const fn new(center: f64, tolerance: f64) -> Self {
        Self { center, tolerance }
    }

    pub fn contains(&self, millivolts: f64) -> bool {
        (millivolts - self.center).abs() <= self.tolerance
    }

    pub fn lower(&self) -> f64 {
        self.center - self.tolerance
    }

    pub fn upper(&self) -> f64 {
        self.center + self.tolerance
    }
}

/// Counts rising transitions from the low band into the high band
///
/// After a pulse, the line must return to the low band before the next pulse
/// can be counted. Samples between the bands never change state.
#[derive(Debug, Clone)]
pub struct EdgeDetector {
    low: Band,
    high: Band,
    line_is_high: bool,
    pulses: u64,
    dead_zone_samples: u64,
}

impl EdgeDetector {
    pub fn new(low: Band, high: Band) -> Self {
        Self {
            low,
            high,
            line_is_high: false,
            pulses: 0,
            dead_zone_samples: 0,
        }
    }

    pub fn observe(&mut self, millivolts: f64) -> Option<PulseEvent> {
        if self.low.contains(millivolts) {
            self.line_is_high = false;
            return None;
        }

        if self.high.contains(millivolts) {
            if !self.line_is_high {
                self.line_is_high = true;
                self.pulses += 1;
                return Some(PulseEvent);
            }
            return None;
        }

        self.dead_zone_samples += 1;
        None
    }

    pub fn line_is_high(&self) -> bool {
        self.line_is_high
    }

    pub fn pulses(&self) -> u64 {
        self.pulses
    }

    pub fn dead_zone_samples(&self) -> u64 {
        self.dead_zone_samples
    }

    /// Consume samples until shutdown or until either queue closes
    ///
    /// Pulse sends await queue capacity; a pulse is never dropped.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<Sample>,
        tx: mpsc::Sender<PulseEvent>,
        mut shutdown: Shutdown,
    ) -> Self {
        log::info!(
            "📈 Starting edge detector (low: {}±{} mV, high: {}±{} mV)",
            self.low.center,
            self.low.tolerance,
            self.high.center,
            self.high.tolerance
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.wait() => {
                    log::info!("Edge detector received shutdown signal");
                    break;
                }

                received = rx.recv() => {
                    let Some(sample) = received else {
                        log::info!("Sample queue closed, stopping edge detector");
                        break;
                    };

                    if let Some(pulse) = self.observe(sample.millivolts) {
                        if tx.send(pulse).await.is_err() {
                            log::warn!("⚠️  Pulse queue closed, stopping edge detector");
                            break;
                        }
                    }
                }
            }
        }

        // Samples already queued still count; the sampler closes the queue when it stops
        if shutdown.is_triggered() {
            while let Some(sample) = rx.recv().await {
                if let Some(pulse) = self.observe(sample.millivolts) {
                    if tx.send(pulse).await.is_err() {
                        break;
                    }
                }
            }
        }

        log::info!(
            "✅ Edge detector stopped ({} pulses, {} dead-zone samples)",
            self.pulses,
            self.dead_zone_samples
        );
        self
    }
}
