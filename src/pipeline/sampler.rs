//! Fixed-cadence polling of the analog source
//!
//! Each tick reads one raw code, scales it to millivolts and pushes a `Sample`
//! onto the bounded sample queue. A full queue blocks the sampler: dropping a
//! sample can hide an edge and the pulse count could never recover from that.

use super::ads1115::BusError;
use super::clock::Clock;
use super::shutdown::Shutdown;
use super::types::Sample;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
    #[error("source exhausted")]
    Exhausted,
}

/// Anything that yields raw converter codes
pub trait AnalogSource: Send {
    fn read_code(&mut self) -> Result<i16, SourceError>;
}

impl<S: AnalogSource + ?Sized> AnalogSource for Box<S> {
    fn read_code(&mut self) -> Result<i16, SourceError> {
        (**self).read_code()
    }
}

pub struct Sampler<S: AnalogSource> {
    source: S,
    scale_per_lsb: f64,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SamplerStats {
    pub samples: u64,
    pub read_failures: u64,
}

impl<S: AnalogSource> Sampler<S> {
    pub fn new(source: S, scale_per_lsb: f64, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            scale_per_lsb,
            clock,
        }
    }

    /// One read + conversion, without queueing
    pub fn read_sample(&mut self) -> Result<Sample, SourceError> {
        let code = self.source.read_code()?;
        Ok(Sample {
            timestamp: self.clock.now(),
            millivolts: code as f64 * self.scale_per_lsb,
        })
    }

    /// Poll until shutdown, the sample queue closes, or the source is exhausted
    pub async fn run(
        mut self,
        tx: mpsc::Sender<Sample>,
        period: Duration,
        mut shutdown: Shutdown,
    ) -> SamplerStats {
        log::info!(
            "🎚️  Starting sampler (interval: {}µs, scale: {} mV/LSB)",
            period.as_micros(),
            self.scale_per_lsb
        );

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut stats = SamplerStats::default();
        let mut failure_streak = 0u64;
        let mut window_samples = 0u64;
        let mut last_log_time = Instant::now();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.wait() => {
                    log::info!("Sampler received shutdown signal");
                    break;
                }

                _ = ticker.tick() => {
                    let sample = match self.read_sample() {
                        Ok(sample) => sample,
                        Err(SourceError::Exhausted) => {
                            log::info!("Analog source exhausted, stopping sampler");
                            break;
                        }
                        Err(e) => {
                            stats.read_failures += 1;
                            failure_streak += 1;
                            if failure_streak == 1 {
                                log::warn!("⚠️  Sample read failed, skipping tick: {}", e);
                            } else {
                                log::debug!("Sample read failed ({} in a row): {}", failure_streak, e);
                            }
                            continue;
                        }
                    };

                    if failure_streak > 1 {
                        log::warn!("Sampler recovered after {} failed reads", failure_streak);
                    }
                    failure_streak = 0;

                    // Blocking send: backpressure instead of sample loss
                    let sent = tokio::select! {
                        biased;
                        _ = shutdown.wait() => None,
                        result = tx.send(sample) => Some(result),
                    };

                    match sent {
                        Some(Ok(())) => {}
                        Some(Err(_)) => {
                            log::warn!("Sample queue closed, stopping sampler");
                            break;
                        }
                        None => {
                            log::info!("Sampler received shutdown signal while queue was full");
                            break;
                        }
                    }

                    stats.samples += 1;
                    window_samples += 1;

                    if last_log_time.elapsed() >= Duration::from_secs(10) {
                        let rate = window_samples as f64 / last_log_time.elapsed().as_secs_f64();
                        log::info!(
                            "📊 Sampling rate: {:.0} samples/sec | queue: {}/{} | read failures: {}",
                            rate,
                            tx.max_capacity() - tx.capacity(),
                            tx.max_capacity(),
                            stats.read_failures
                        );
                        last_log_time = Instant::now();
                        window_samples = 0;
                    }
                }
            }
        }

        log::info!(
            "✅ Sampler stopped ({} samples, {} read failures)",
            stats.samples,
            stats.read_failures
        );
        stats
    }
}

/// Replays a fixed list of codes, then reports exhaustion
///
/// `None` entries simulate a failed read.
pub struct ScriptedSource {
    codes: std::vec::IntoIter<Option<i16>>,
}

impl ScriptedSource {
    pub fn new(codes: Vec<Option<i16>>) -> Self {
        Self {
            codes: codes.into_iter(),
        }
    }

    pub fn from_codes(codes: &[i16]) -> Self {
        Self::new(codes.iter().copied().map(Some).collect())
    }
}

impl AnalogSource for ScriptedSource {
    fn read_code(&mut self) -> Result<i16, SourceError> {
        match self.codes.next() {
            Some(Some(code)) => Ok(code),
            Some(None) => Err(SourceError::Bus(BusError::Unavailable(
                "scripted read failure".to_string(),
            ))),
            None => Err(SourceError::Exhausted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::clock::SystemClock;
    use crate::pipeline::shutdown;

    #[test]
    fn test_read_sample_applies_scale() {
        let mut sampler = Sampler::new(
            ScriptedSource::from_codes(&[1667, -4]),
            3.0,
            Arc::new(SystemClock),
        );

        assert_eq!(sampler.read_sample().unwrap().millivolts, 5001.0);
        assert_eq!(sampler.read_sample().unwrap().millivolts, -12.0);
        assert!(matches!(sampler.read_sample(), Err(SourceError::Exhausted)));
    }

    #[tokio::test]
    async fn test_read_failures_are_skipped() {
        let source = ScriptedSource::new(vec![Some(0), None, None, Some(1667), Some(0)]);
        let sampler = Sampler::new(source, 3.0, Arc::new(SystemClock));
        let (tx, mut rx) = mpsc::channel(16);
        let (_trigger, shutdown) = shutdown::channel();

        let stats = sampler.run(tx, Duration::from_micros(100), shutdown).await;

        assert_eq!(stats.samples, 3);
        assert_eq!(stats.read_failures, 2);

        let mut received = Vec::new();
        while let Some(sample) = rx.recv().await {
            received.push(sample.millivolts);
        }
        assert_eq!(received, vec![0.0, 5001.0, 0.0]);
    }

    #[tokio::test]
    async fn test_full_queue_blocks_instead_of_dropping() {
        let codes: Vec<i16> = (0..20).collect();
        let sampler = Sampler::new(ScriptedSource::from_codes(&codes), 1.0, Arc::new(SystemClock));
        let (tx, mut rx) = mpsc::channel(2);
        let (_trigger, shutdown) = shutdown::channel();

        let handle = tokio::spawn(sampler.run(tx, Duration::from_micros(50), shutdown));

        // Slow consumer
        let mut received = Vec::new();
        while let Some(sample) = rx.recv().await {
            received.push(sample.millivolts as i16);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let stats = handle.await.unwrap();
        assert_eq!(stats.samples, 20);
        assert_eq!(received, codes);
    }

    #[tokio::test]
    async fn test_shutdown_stops_sampler_blocked_on_full_queue() {
        let codes: Vec<i16> = vec![0; 100];
        let sampler = Sampler::new(ScriptedSource::from_codes(&codes), 1.0, Arc::new(SystemClock));
        let (tx, _rx) = mpsc::channel(1);
        let (trigger, shutdown) = shutdown::channel();

        let handle = tokio::spawn(sampler.run(tx, Duration::from_micros(50), shutdown));
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.trigger();

        let stats = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.samples, 1);
    }
}
