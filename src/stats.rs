//! ═══════════════════════════════════════════════════════════════════════════════
//! STATS — Statistical Primitives for Features and Scaling
//! ═══════════════════════════════════════════════════════════════════════════════
//!
//! - Welford variance for the feature scaler
//! - Window summaries (mean / sample std / max / min) for rolling features
//! - NaN-tolerant ordering for f64
//! ═══════════════════════════════════════════════════════════════════════════════

use std::cmp::Ordering;

/// Total order for f64 comparisons. NaN sorts as equal.
pub fn float_cmp(a: &f64, b: &f64) -> Ordering {
    a.partial_cmp(b).unwrap_or(Ordering::Equal)
}

/// Replace NaN/inf with 0.0
pub fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VARIANCE TRACKER — Online variance estimation
// ═══════════════════════════════════════════════════════════════════════════════

/// Welford's online variance algorithm
#[derive(Debug, Clone, Default)]
pub struct VarianceTracker {
    count: u64,
    mean: f64,
    m2: f64, // Sum of squared deviations
}

impl VarianceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update with new sample
    pub fn update(&mut self, sample: f64) {
        self.count += 1;
        let delta = sample - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = sample - self.mean;
        self.m2 += delta * delta2;
    }

    /// Current mean
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Current variance (population)
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    /// Current variance (sample, Bessel corrected)
    pub fn sample_variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// Population standard deviation
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Sample standard deviation
    pub fn sample_std_dev(&self) -> f64 {
        self.sample_variance().sqrt()
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WINDOW SUMMARY — Rolling aggregates with min-period 1
// ═══════════════════════════════════════════════════════════════════════════════

/// Aggregates over a window of readings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSummary {
    pub mean: f64,
    /// Sample std; 0.0 below two readings
    pub std: f64,
    pub max: f64,
    pub min: f64,
}

impl WindowSummary {
    /// Summarise the last `window` values of `values`. None when empty.
    pub fn trailing(values: &[f64], window: usize) -> Option<Self> {
        let start = values.len().saturating_sub(window);
        Self::of(&values[start..])
    }

    pub fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut tracker = VarianceTracker::new();
        let mut max = f64::NEG_INFINITY;
        let mut min = f64::INFINITY;
        for &v in values {
            tracker.update(v);
            max = max.max(v);
            min = min.min(v);
        }
        Some(Self {
            mean: tracker.mean(),
            std: tracker.sample_std_dev(),
            max,
            min,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variance_tracker() {
        let mut tracker = VarianceTracker::new();
        for i in 1..=5 {
            tracker.update(i as f64);
        }

        assert_eq!(tracker.mean(), 3.0);
        assert!((tracker.variance() - 2.0).abs() < 0.01);
        assert!((tracker.sample_variance() - 2.5).abs() < 0.01);
    }

    #[test]
    fn test_window_summary_trailing() {
        let values = [70.0, 72.0, 90.0, 74.0];
        let w = WindowSummary::trailing(&values, 3).unwrap();
        assert!((w.mean - 236.0 / 3.0).abs() < 1e-9);
        assert_eq!(w.max, 90.0);
        assert_eq!(w.min, 72.0);
    }

    #[test]
    fn test_window_summary_min_period() {
        // window larger than history still summarises what exists
        let w = WindowSummary::trailing(&[71.5], 24).unwrap();
        assert_eq!(w.mean, 71.5);
        assert_eq!(w.std, 0.0);
        assert!(WindowSummary::trailing(&[], 3).is_none());
    }

    #[test]
    fn test_float_cmp_nan() {
        let mut v = vec![3.0, f64::NAN, 1.0];
        v.sort_by(float_cmp);
        assert_eq!(v.len(), 3);
    }
}
