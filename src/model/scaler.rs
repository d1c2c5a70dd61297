//! Per-column standardization shared by both estimators.

use serde::{Deserialize, Serialize};

use crate::stats::VarianceTracker;

/// z = (x − mean) / std, population std. Zero-variance columns map to 0.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardScaler {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(rows: &[Vec<f64>]) -> Self {
        let width = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut trackers = vec![VarianceTracker::new(); width];
        for row in rows {
            for (tracker, &v) in trackers.iter_mut().zip(row) {
                tracker.update(v);
            }
        }
        let means = trackers.iter().map(|t| t.mean()).collect();
        let scales = trackers
            .iter()
            .map(|t| {
                let std = t.std_dev();
                if std > 0.0 && std.is_finite() {
                    std
                } else {
                    1.0
                }
            })
            .collect();
        Self { means, scales }
    }

    pub fn width(&self) -> usize {
        self.means.len()
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(&self.scales))
            .map(|(&x, (&m, &s))| (x - m) / s)
            .collect()
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter().map(|r| self.transform_row(r)).collect()
    }
}
