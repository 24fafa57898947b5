//! Spread-bounded trimming of sample batches
//!
//! Used for calibration averaging; never on the live pulse path.
//!
//! ## Algorithm
//! 1. Compute mean and Bessel-corrected standard deviation of the batch
//! 2. If the deviation is undefined (fewer than 2 values) or above the
//!    threshold, remove the current maximum and repeat
//! 3. Stop once the threshold holds, or report exhaustion when nothing is left
//!
//! Only the maximum is ever removed. Low readings are kept.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum OutlierError {
    #[error("no observations to trim")]
    Empty,
    #[error("observations must be finite")]
    NonFinite,
    #[error("every observation was removed before the spread fell below the threshold")]
    Exhausted { removed: Vec<f64> },
}

/// Statistics of the retained observations
#[derive(Debug, Clone, PartialEq)]
pub struct TrimmedStats {
    pub mean: f64,
    pub std_dev: f64,
    pub retained: usize,
    /// Removed values, in removal order
    pub removed: Vec<f64>,
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (divisor n - 1); undefined below two values
pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = mean(values)?;
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    Some((sum_sq / (values.len() - 1) as f64).sqrt())
}

/// Index of the maximum, first occurrence on ties
fn max_index(values: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, value) in values.iter().enumerate() {
        match best {
            Some(b) if *value <= values[b] => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Trim the largest values until the standard deviation is at most `threshold`
pub fn remove_outliers(values: &[f64], threshold: f64) -> Result<TrimmedStats, OutlierError> {
    if values.is_empty() {
        return Err(OutlierError::Empty);
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(OutlierError::NonFinite);
    }

    let mut kept = values.to_vec();
    let mut removed = Vec::new();

    loop {
        if let Some(deviation) = std_dev(&kept) {
            if deviation <= threshold {
                let mean = mean(&kept).ok_or(OutlierError::Empty)?;
                log::debug!(
                    "Trimmed {} of {} values (mean {:.3}, std dev {:.3})",
                    removed.len(),
                    values.len(),
                    mean,
                    deviation
                );
                return Ok(TrimmedStats {
                    mean,
                    std_dev: deviation,
                    retained: kept.len(),
                    removed,
                });
            }
        }

        match max_index(&kept) {
            Some(index) => removed.push(kept.remove(index)),
            None => return Err(OutlierError::Exhausted { removed }),
        }
    }
}
