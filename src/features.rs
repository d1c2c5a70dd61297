//! ═══════════════════════════════════════════════════════════════════════════════
//! FEATURES — Event Log → Model Inputs
//! ═══════════════════════════════════════════════════════════════════════════════
//!
//! Two paths, one definition:
//!
//! ```text
//!   batch   (training)   every deduplicated event becomes a row; self features
//!                        use only the unit's samples strictly before the row
//!   online  (predict)    the unit's most recent ≤ 24 samples at or before the
//!                        query time, plus live neighbor temperatures
//! ```
//!
//! Both paths look at the same 24-sample trailing window, so a feature means
//! the same thing at train time and at serve time.
//!
//! Missing values (no lag yet, empty window, non-finite input) become 0.0.
//! ═══════════════════════════════════════════════════════════════════════════════

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::config::Thresholds;
use crate::events::HeatEvent;
use crate::stats::{finite_or_zero, WindowSummary};
use crate::topology::GridTopology;

/// Lag offsets, in samples
pub const LAGS: [usize; 5] = [1, 2, 3, 5, 10];
/// Rolling window sizes, in samples
pub const WINDOWS: [usize; 4] = [3, 6, 12, 24];
/// Trailing samples any self feature can see
pub const HISTORY_WINDOW: usize = 24;
/// `time_since_spike` when no spike is among the last `HISTORY_WINDOW` samples.
///
/// Older spikes are not searched, so batch and online rows agree. 999 means
/// "none in the window", not "none ever".
pub const NO_SPIKE_HOURS: f64 = 999.0;

/// Canonical feature order
pub const FEATURE_NAMES: [&str; 41] = [
    // time
    "hour",
    "day_of_week",
    "minute",
    "is_weekend",
    "is_business_hours",
    "is_night",
    "hour_sin",
    "hour_cos",
    "day_sin",
    "day_cos",
    // self
    "temp_lag_1",
    "temp_lag_2",
    "temp_lag_3",
    "temp_lag_5",
    "temp_lag_10",
    "rolling_mean_3",
    "rolling_std_3",
    "rolling_max_3",
    "rolling_min_3",
    "rolling_mean_6",
    "rolling_std_6",
    "rolling_max_6",
    "rolling_min_6",
    "rolling_mean_12",
    "rolling_std_12",
    "rolling_max_12",
    "rolling_min_12",
    "rolling_mean_24",
    "rolling_std_24",
    "rolling_max_24",
    "rolling_min_24",
    "temp_change_1",
    "temp_change_3",
    "temp_acceleration",
    "spikes_last_10",
    "spikes_last_24",
    "time_since_spike",
    // spatial
    "neighbor_mean_temp",
    "neighbor_max_temp",
    "neighbor_std_temp",
    "neighbor_spike_count",
];

pub fn feature_columns() -> Vec<String> {
    FEATURE_NAMES.iter().map(|s| s.to_string()).collect()
}

pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_NAMES.iter().position(|n| *n == name)
}

// ═══════════════════════════════════════════════════════════════════════════════
// FEATURE VECTORS
// ═══════════════════════════════════════════════════════════════════════════════

/// One row of named features in canonical order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    values: Vec<f64>,
}

impl FeatureVector {
    fn from_parts(time: [f64; 10], own: [f64; 27], spatial: [f64; 4]) -> Self {
        let values = time
            .into_iter()
            .chain(own)
            .chain(spatial)
            .map(finite_or_zero)
            .collect();
        Self { values }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        feature_index(name).map(|i| self.values[i])
    }

    /// Reorder to a persisted column list. Unknown columns read as 0.0.
    pub fn select(&self, columns: &[String]) -> Vec<f64> {
        columns
            .iter()
            .map(|c| self.get(c).unwrap_or(0.0))
            .collect()
    }
}

/// A training row
#[derive(Debug, Clone)]
pub struct FeatureRow {
    pub unit_id: usize,
    pub timestamp: NaiveDateTime,
    pub features: FeatureVector,
    /// Regression target
    pub temperature: f64,
    /// Classification target
    pub is_spike: bool,
}

/// Batch output, rows sorted by `(unit_id, timestamp)`
#[derive(Debug, Clone, Default)]
pub struct FeatureFrame {
    pub columns: Vec<String>,
    pub rows: Vec<FeatureRow>,
}

impl FeatureFrame {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn matrix(&self) -> Vec<Vec<f64>> {
        self.rows.iter().map(|r| r.features.values().to_vec()).collect()
    }

    pub fn targets(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.temperature).collect()
    }

    pub fn labels(&self) -> Vec<bool> {
        self.rows.iter().map(|r| r.is_spike).collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FEATURE FAMILIES
// ═══════════════════════════════════════════════════════════════════════════════

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn time_features(at: NaiveDateTime) -> [f64; 10] {
    let hour = at.hour() as f64;
    let dow = at.weekday().num_days_from_monday() as f64;
    [
        hour,
        dow,
        at.minute() as f64,
        flag(dow >= 5.0),
        flag((9.0..=17.0).contains(&hour)),
        flag(hour >= 22.0 || hour <= 6.0),
        (2.0 * PI * hour / 24.0).sin(),
        (2.0 * PI * hour / 24.0).cos(),
        (2.0 * PI * dow / 7.0).sin(),
        (2.0 * PI * dow / 7.0).cos(),
    ]
}

/// Self features from the unit's trailing samples (oldest first, all before the row)
fn self_features(
    prior: &[(NaiveDateTime, f64)],
    at: NaiveDateTime,
    thresholds: &Thresholds,
) -> [f64; 27] {
    let start = prior.len().saturating_sub(HISTORY_WINDOW);
    let prior = &prior[start..];
    let temps: Vec<f64> = prior.iter().map(|&(_, t)| t).collect();
    let len = temps.len();
    let lag = |k: usize| if k <= len { temps[len - k] } else { 0.0 };

    let mut out = [0.0; 27];
    for (i, &k) in LAGS.iter().enumerate() {
        out[i] = lag(k);
    }
    for (i, &w) in WINDOWS.iter().enumerate() {
        if let Some(s) = WindowSummary::trailing(&temps, w) {
            out[5 + i * 4] = s.mean;
            out[5 + i * 4 + 1] = s.std;
            out[5 + i * 4 + 2] = s.max;
            out[5 + i * 4 + 3] = s.min;
        }
    }

    let change_1 = if len >= 2 { lag(1) - lag(2) } else { 0.0 };
    out[21] = change_1;
    if len >= 3 {
        out[22] = lag(1) - lag(3);
        out[23] = change_1 - (lag(2) - lag(3));
    }

    let spikes_in = |n: usize| {
        temps[len.saturating_sub(n)..]
            .iter()
            .filter(|&&t| thresholds.is_spike(t))
            .count() as f64
    };
    out[24] = spikes_in(10);
    out[25] = spikes_in(24);

    out[26] = prior
        .iter()
        .rev()
        .find(|&&(_, t)| thresholds.is_spike(t))
        .map(|&(ts, _)| (at - ts).num_seconds() as f64 / 3600.0)
        .unwrap_or(NO_SPIKE_HOURS);
    out
}

fn spatial_features(neighbor_temps: &[f64], thresholds: &Thresholds) -> [f64; 4] {
    match WindowSummary::of(neighbor_temps) {
        Some(s) => [
            s.mean,
            s.max,
            s.std,
            neighbor_temps.iter().filter(|&&t| thresholds.is_spike(t)).count() as f64,
        ],
        None => [0.0; 4],
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PIPELINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Builds features for a fixed topology and spike threshold
#[derive(Debug, Clone)]
pub struct FeaturePipeline {
    topology: GridTopology,
    thresholds: Thresholds,
    /// Neighbor value before the neighbor has reported anything
    neighbor_fallback: f64,
}

impl FeaturePipeline {
    pub fn new(topology: GridTopology, thresholds: Thresholds, neighbor_fallback: f64) -> Self {
        Self {
            topology,
            thresholds,
            neighbor_fallback,
        }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Batch features. `events` should already be deduplicated; events for
    /// units outside the topology are ignored.
    pub fn build(&self, events: &[HeatEvent]) -> FeatureFrame {
        let n = self.topology.unit_count();
        let mut events: Vec<&HeatEvent> = events.iter().filter(|e| e.unit_id < n).collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.unit_id.cmp(&b.unit_id)));

        // Sweep time: per-unit trailing window plus last known value per unit.
        // A timestamp group is applied before its rows read neighbors.
        let mut windows: Vec<Vec<(NaiveDateTime, f64)>> = vec![Vec::new(); n];
        let mut last_known: Vec<Option<f64>> = vec![None; n];
        let mut rows = Vec::with_capacity(events.len());

        let mut i = 0;
        while i < events.len() {
            let ts = events[i].timestamp;
            let mut j = i;
            while j < events.len() && events[j].timestamp == ts {
                j += 1;
            }
            let group = &events[i..j];
            for e in group {
                last_known[e.unit_id] = Some(e.temperature);
            }
            for e in group {
                let own = self_features(&windows[e.unit_id], ts, &self.thresholds);
                let neighbors: Vec<f64> = self
                    .topology
                    .neighbors(e.unit_id)
                    .into_iter()
                    .map(|nb| last_known[nb].unwrap_or(self.neighbor_fallback))
                    .collect();
                let spatial = spatial_features(&neighbors, &self.thresholds);
                rows.push(FeatureRow {
                    unit_id: e.unit_id,
                    timestamp: ts,
                    features: FeatureVector::from_parts(time_features(ts), own, spatial),
                    temperature: e.temperature,
                    is_spike: self.thresholds.is_spike(e.temperature),
                });
            }
            for e in group {
                let w = &mut windows[e.unit_id];
                w.push((ts, e.temperature));
                if w.len() > HISTORY_WINDOW {
                    w.remove(0);
                }
            }
            i = j;
        }

        rows.sort_by(|a, b| a.unit_id.cmp(&b.unit_id).then(a.timestamp.cmp(&b.timestamp)));
        FeatureFrame {
            columns: feature_columns(),
            rows,
        }
    }

    /// Online features for one unit at `at`.
    ///
    /// `history` is the unit's recent samples, oldest first; anything after
    /// `at` is ignored. `neighbor_temps` are the live neighbor readings.
    pub fn online(
        &self,
        history: &[HeatEvent],
        at: NaiveDateTime,
        neighbor_temps: &[f64],
    ) -> FeatureVector {
        let prior: Vec<(NaiveDateTime, f64)> = history
            .iter()
            .filter(|e| e.timestamp <= at)
            .map(|e| (e.timestamp, e.temperature))
            .collect();
        let own = self_features(&prior, at, &self.thresholds);
        let spatial = spatial_features(neighbor_temps, &self.thresholds);
        FeatureVector::from_parts(time_features(at), own, spatial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn t0() -> NaiveDateTime {
        // a Saturday
        NaiveDate::from_ymd_opt(2024, 3, 16)
            .unwrap()
            .and_hms_opt(23, 30, 0)
            .unwrap()
    }

    fn pipeline() -> FeaturePipeline {
        FeaturePipeline::new(GridTopology::default(), Thresholds::default(), 70.0)
    }

    fn series(unit: usize, temps: &[f64]) -> Vec<HeatEvent> {
        temps
            .iter()
            .enumerate()
            .map(|(i, &t)| HeatEvent::new(unit, t, t0() + Duration::minutes(5 * i as i64)))
            .collect()
    }

    #[test]
    fn test_schema_is_unique() {
        let mut names = FEATURE_NAMES.to_vec();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 41);
    }

    #[test]
    fn test_time_features() {
        let v = pipeline().online(&[], t0(), &[]);
        assert_eq!(v.get("hour"), Some(23.0));
        assert_eq!(v.get("day_of_week"), Some(5.0));
        assert_eq!(v.get("minute"), Some(30.0));
        assert_eq!(v.get("is_weekend"), Some(1.0));
        assert_eq!(v.get("is_business_hours"), Some(0.0));
        assert_eq!(v.get("is_night"), Some(1.0));
    }

    #[test]
    fn test_first_row_has_no_self_history() {
        let frame = pipeline().build(&series(0, &[80.0, 90.0]));
        let first = &frame.rows[0].features;
        assert_eq!(first.get("temp_lag_1"), Some(0.0));
        assert_eq!(first.get("rolling_mean_3"), Some(0.0));
        assert_eq!(first.get("time_since_spike"), Some(NO_SPIKE_HOURS));
        // the row's own reading never leaks into its features
        let second = &frame.rows[1].features;
        assert_eq!(second.get("temp_lag_1"), Some(80.0));
        assert_eq!(second.get("rolling_max_24"), Some(80.0));
    }

    #[test]
    fn test_lags_and_changes() {
        let frame = pipeline().build(&series(2, &[70.0, 71.0, 73.0, 76.0, 80.0]));
        let last = &frame.rows[4].features;
        assert_eq!(last.get("temp_lag_1"), Some(76.0));
        assert_eq!(last.get("temp_lag_2"), Some(73.0));
        assert_eq!(last.get("temp_lag_3"), Some(71.0));
        assert_eq!(last.get("temp_lag_5"), Some(0.0));
        assert_eq!(last.get("temp_change_1"), Some(3.0));
        assert_eq!(last.get("temp_change_3"), Some(5.0));
        assert_eq!(last.get("temp_acceleration"), Some(1.0));
        assert_eq!(last.get("rolling_min_3"), Some(71.0));
    }

    #[test]
    fn test_spike_counters() {
        let frame = pipeline().build(&series(1, &[90.0, 72.0, 88.0, 71.0]));
        let last = &frame.rows[3].features;
        assert_eq!(last.get("spikes_last_10"), Some(2.0));
        // last spike was one step (5 min) before this row
        let hours = last.get("time_since_spike").unwrap();
        assert!((hours - 5.0 / 60.0).abs() < 1e-9);
        assert!(frame.rows[0].is_spike);
        assert!(!frame.rows[1].is_spike);
    }

    #[test]
    fn test_neighbor_fallback_and_fill() {
        let mut events = series(4, &[72.0, 73.0]);
        // unit 3 reports at the second timestamp only
        events.push(HeatEvent::new(3, 95.0, t0() + Duration::minutes(5)));
        let frame = pipeline().build(&events);
        let unit4: Vec<_> = frame.rows.iter().filter(|r| r.unit_id == 4).collect();

        // neighbors 3, 5, 10 all unknown → fallback
        assert_eq!(unit4[0].features.get("neighbor_mean_temp"), Some(70.0));
        assert_eq!(unit4[0].features.get("neighbor_std_temp"), Some(0.0));
        // same-timestamp reading of unit 3 is visible
        assert_eq!(unit4[1].features.get("neighbor_max_temp"), Some(95.0));
        assert_eq!(unit4[1].features.get("neighbor_spike_count"), Some(1.0));
        let mean = unit4[1].features.get("neighbor_mean_temp").unwrap();
        assert!((mean - 235.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_online_matches_batch_definition() {
        let temps = [70.0, 74.0, 91.0, 80.0, 75.0, 73.0];
        let events = series(7, &temps);
        let frame = pipeline().build(&events);
        let batch = &frame.rows[5].features;

        // predicting the sixth sample from the first five
        let neighbors = [70.0, 70.0, 70.0, 70.0];
        let online = pipeline().online(&events[..5], events[5].timestamp, &neighbors);
        for name in FEATURE_NAMES.iter().take(37) {
            assert_eq!(batch.get(name), online.get(name), "{} differs", name);
        }
    }

    #[test]
    fn test_online_ignores_future_samples() {
        let events = series(0, &[70.0, 71.0, 99.0]);
        let v = pipeline().online(&events, events[1].timestamp, &[]);
        assert_eq!(v.get("temp_lag_1"), Some(71.0));
        assert_eq!(v.get("spikes_last_24"), Some(0.0));
    }

    #[test]
    fn test_spike_outside_window_reads_as_none() {
        let mut temps = vec![95.0];
        temps.extend(std::iter::repeat(72.0).take(HISTORY_WINDOW + 1));
        let events = series(0, &temps);
        let at = events.last().unwrap().timestamp + Duration::minutes(5);

        let v = pipeline().online(&events, at, &[]);
        assert_eq!(v.get("time_since_spike"), Some(NO_SPIKE_HOURS));

        let frame = pipeline().build(&events);
        let last = &frame.rows.last().unwrap().features;
        assert_eq!(last.get("time_since_spike"), Some(NO_SPIKE_HOURS));
        let second = &frame.rows[1].features;
        assert!(second.get("time_since_spike").unwrap() < 1.0);
    }

    #[test]
    fn test_select_reorders() {
        let v = pipeline().online(&series(0, &[75.0]), t0() + Duration::hours(1), &[]);
        let cols = vec!["temp_lag_1".to_string(), "unknown".to_string(), "hour".to_string()];
        assert_eq!(v.select(&cols), vec![75.0, 0.0, 0.0]);
    }
}
