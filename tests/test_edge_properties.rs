//! Property tests for edge detection under in-band noise

use proptest::prelude::*;
use pulseflow::pipeline::edge::{Band, EdgeDetector};

fn detector() -> EdgeDetector {
    EdgeDetector::new(Band::new(0.0, 1_000.0), Band::new(5_000.0, 1_000.0))
}

/// One pulse: a run of high readings, optional dead-zone chatter, then a run of low readings
fn cycle() -> impl Strategy<Value = Vec<f64>> {
    (
        prop::collection::vec(4_000.0..=6_000.0f64, 1..5),
        prop::collection::vec(1_000.5..3_999.5f64, 0..4),
        prop::collection::vec(-1_000.0..=1_000.0f64, 1..5),
    )
        .prop_map(|(high, dead, low)| {
            let mut samples = high;
            samples.extend(dead);
            samples.extend(low);
            samples
        })
}

proptest! {
    #[test]
    fn prop_noisy_cycles_count_exactly(cycles in prop::collection::vec(cycle(), 0..40)) {
        let mut detector = detector();
        let mut pulses = 0usize;

        for samples in &cycles {
            for &mv in samples {
                if detector.observe(mv).is_some() {
                    pulses += 1;
                }
            }
        }

        prop_assert_eq!(pulses, cycles.len());
        prop_assert_eq!(detector.pulses(), cycles.len() as u64);
    }

    #[test]
    fn prop_dead_zone_never_counts(samples in prop::collection::vec(1_000.5..3_999.5f64, 0..200)) {
        let mut detector = detector();
        for &mv in &samples {
            prop_assert!(detector.observe(mv).is_none());
        }
        prop_assert_eq!(detector.dead_zone_samples(), samples.len() as u64);
    }
}
