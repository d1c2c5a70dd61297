//! ═══════════════════════════════════════════════════════════════════════════════
//! MODEL — Temperature Regressor + Spike Classifier
//! ═══════════════════════════════════════════════════════════════════════════════
//!
//! ```text
//!   EventLog ─▶ clean ─▶ FeaturePipeline ─▶ split ─▶ StandardScaler
//!                                                        │
//!                                 ┌──────────────────────┴──────────────────┐
//!                                 ▼                                         ▼
//!                   GradientBoostedRegressor               GradientBoostedClassifier
//!                      (temperature, °F)                        (P(spike))
//! ```
//!
//! The fitted state is immutable and published as one `Arc` swap, so a predict
//! running during a retrain sees either the old model or the new one.
//! ═══════════════════════════════════════════════════════════════════════════════

pub mod boosting;
pub mod metrics;
pub mod scaler;
pub mod tree;

pub use boosting::{sigmoid, GradientBoostedClassifier, GradientBoostedRegressor};
pub use metrics::{mean_absolute_error, r2_score, Confusion};
pub use scaler::StandardScaler;

use chrono::{Duration, NaiveDateTime};
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{ModelConfig, Thresholds};
use crate::events::{local_now, HeatEvent};
use crate::features::FeaturePipeline;
use crate::topology::GridTopology;

// ═══════════════════════════════════════════════════════════════════════════════
// PUBLIC TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Output of one predict call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// °F
    pub predicted_temperature: f64,
    /// [0, 1]
    pub spike_probability: f64,
    /// [0, 1]; 0.0 means the model had nothing to say
    pub confidence: f64,
}

impl Prediction {
    /// Reported before the first successful train
    pub fn untrained(default_temperature: f64) -> Self {
        Self {
            predicted_temperature: default_temperature,
            spike_probability: 0.1,
            confidence: 0.0,
        }
    }

    /// Reported when a numeric failure occurs during predict
    pub fn degraded(default_temperature: f64) -> Self {
        Self {
            predicted_temperature: default_temperature,
            spike_probability: 0.0,
            confidence: 0.0,
        }
    }
}

/// Where the reported metrics were measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Evaluation {
    HeldOut,
    /// Too few rows for a split; metrics are optimistic
    InSample,
}

/// Snapshot of the last successful train
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub is_trained: bool,
    pub mae: Option<f64>,
    pub r2: Option<f64>,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1: Option<f64>,
    pub evaluation: Option<Evaluation>,
    pub train_rows: usize,
    pub test_rows: usize,
    pub trained_at: Option<NaiveDateTime>,
    pub trained_on_version: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainOutcome {
    Trained,
    /// Log unchanged since the last successful train
    Skipped,
    InsufficientData { samples: usize, required: usize },
}

impl fmt::Display for TrainOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainOutcome::Trained => write!(f, "trained"),
            TrainOutcome::Skipped => write!(f, "skipped (log unchanged)"),
            TrainOutcome::InsufficientData { samples, required } => {
                write!(f, "insufficient data ({} of {} samples)", samples, required)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainReport {
    pub outcome: TrainOutcome,
    pub metrics: ModelMetrics,
    /// Bootstrap events generated before this train
    pub seeded: usize,
}

/// Everything predict needs, fitted together
#[derive(Debug, Clone)]
pub struct FittedModel {
    /// Column order the estimators were fitted on
    pub feature_columns: Vec<String>,
    scaler: StandardScaler,
    regressor: GradientBoostedRegressor,
    classifier: GradientBoostedClassifier,
}

/// Published model state
#[derive(Debug, Clone, Default)]
pub struct ModelState {
    pub fitted: Option<FittedModel>,
    pub metrics: ModelMetrics,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PREDICTOR
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Predictor {
    config: ModelConfig,
    pipeline: FeaturePipeline,
    state: RwLock<Arc<ModelState>>,
}

impl Predictor {
    pub fn new(topology: GridTopology, thresholds: Thresholds, config: ModelConfig) -> Self {
        let pipeline = FeaturePipeline::new(topology, thresholds, config.neighbor_fallback);
        Self {
            config,
            pipeline,
            state: RwLock::new(Arc::new(ModelState::default())),
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &FeaturePipeline {
        &self.pipeline
    }

    pub fn snapshot(&self) -> Arc<ModelState> {
        self.state.read().clone()
    }

    pub fn is_trained(&self) -> bool {
        self.state.read().fitted.is_some()
    }

    pub fn metrics(&self) -> ModelMetrics {
        self.state.read().metrics.clone()
    }

    /// Would `train(version, false)` do any work?
    pub fn is_current(&self, version: u64) -> bool {
        let state = self.state.read();
        state.fitted.is_some() && state.metrics.trained_on_version == Some(version)
    }

    /// Fit both estimators on `events` (the log's contents at `version`)
    pub fn train(&self, events: &[HeatEvent], version: u64, force: bool) -> TrainReport {
        if !force && self.is_current(version) {
            debug!(version, "Model current, skipping train");
            return TrainReport {
                outcome: TrainOutcome::Skipped,
                metrics: self.metrics(),
                seeded: 0,
            };
        }

        let cleaned = self.clean(events);
        if cleaned.len() < self.config.min_samples {
            warn!(
                samples = cleaned.len(),
                required = self.config.min_samples,
                "Not enough clean samples to train"
            );
            *self.state.write() = Arc::new(ModelState::default());
            return TrainReport {
                outcome: TrainOutcome::InsufficientData {
                    samples: cleaned.len(),
                    required: self.config.min_samples,
                },
                metrics: ModelMetrics::default(),
                seeded: 0,
            };
        }

        let frame = self.pipeline.build(&cleaned);
        let x = frame.matrix();
        let y = frame.targets();
        let labels = frame.labels();

        let (train_idx, test_idx, evaluation) = self.split(x.len());
        let pick = |idx: &[usize]| -> (Vec<Vec<f64>>, Vec<f64>, Vec<bool>) {
            (
                idx.iter().map(|&i| x[i].clone()).collect(),
                idx.iter().map(|&i| y[i]).collect(),
                idx.iter().map(|&i| labels[i]).collect(),
            )
        };
        let (x_train, y_train, l_train) = pick(&train_idx);
        let (x_test, y_test, l_test) = pick(&test_idx);

        let scaler = StandardScaler::fit(&x_train);
        let z_train = scaler.transform(&x_train);
        let z_test = scaler.transform(&x_test);

        let seed = self.config.random_state;
        let regressor =
            GradientBoostedRegressor::fit(&z_train, &y_train, &self.config.regressor, seed);
        let classifier =
            GradientBoostedClassifier::fit(&z_train, &l_train, &self.config.classifier, seed);

        let temp_pred: Vec<f64> = z_test.iter().map(|r| regressor.predict(r)).collect();
        let spike_pred: Vec<bool> = z_test.iter().map(|r| classifier.predict(r)).collect();
        let confusion = Confusion::from_labels(&l_test, &spike_pred);

        let metrics = ModelMetrics {
            is_trained: true,
            mae: Some(mean_absolute_error(&y_test, &temp_pred)),
            r2: Some(r2_score(&y_test, &temp_pred)),
            precision: Some(confusion.precision()),
            recall: Some(confusion.recall()),
            f1: Some(confusion.f1()),
            evaluation: Some(evaluation),
            train_rows: train_idx.len(),
            test_rows: test_idx.len(),
            trained_at: Some(local_now()),
            trained_on_version: Some(version),
        };
        info!(
            rows = x.len(),
            mae = ?metrics.mae,
            r2 = ?metrics.r2,
            f1 = ?metrics.f1,
            evaluation = ?evaluation,
            version,
            "Model trained"
        );

        let fitted = FittedModel {
            feature_columns: frame.columns,
            scaler,
            regressor,
            classifier,
        };
        *self.state.write() = Arc::new(ModelState {
            fitted: Some(fitted),
            metrics: metrics.clone(),
        });

        TrainReport {
            outcome: TrainOutcome::Trained,
            metrics,
            seeded: 0,
        }
    }

    /// Predict the next reading of a unit at `at`
    pub fn predict(
        &self,
        history: &[HeatEvent],
        at: NaiveDateTime,
        neighbor_temps: &[f64],
    ) -> Prediction {
        let state = self.snapshot();
        let default = self.config.default_temperature;
        let Some(fitted) = state.fitted.as_ref() else {
            return Prediction::untrained(default);
        };

        let features = self.pipeline.online(history, at, neighbor_temps);
        let row = features.select(&fitted.feature_columns);
        if row.iter().any(|v| !v.is_finite()) {
            warn!("Non-finite feature in predict, returning default");
            return Prediction::degraded(default);
        }
        let z = fitted.scaler.transform_row(&row);
        let temperature = fitted.regressor.predict(&z);
        let probability = fitted.classifier.predict_proba(&z);
        if !temperature.is_finite() || !probability.is_finite() {
            warn!("Non-finite model output in predict, returning default");
            return Prediction::degraded(default);
        }

        Prediction {
            predicted_temperature: temperature,
            spike_probability: probability.clamp(0.0, 1.0),
            confidence: confidence(&state.metrics),
        }
    }

    /// Classifier output for the controller. None when untrained or degraded.
    pub fn spike_probability(
        &self,
        history: &[HeatEvent],
        at: NaiveDateTime,
        neighbor_temps: &[f64],
    ) -> Option<f64> {
        let p = self.predict(history, at, neighbor_temps);
        (p.confidence > 0.0).then_some(p.spike_probability)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PREPARATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Dedupe keep-last, drop implausible readings, downsample very large logs
    pub fn clean(&self, events: &[HeatEvent]) -> Vec<HeatEvent> {
        let (lo, hi) = self.config.temperature_range;
        let mut latest: BTreeMap<(usize, NaiveDateTime), &HeatEvent> = BTreeMap::new();
        for e in events {
            latest.insert((e.unit_id, e.timestamp), e);
        }
        let cleaned: Vec<HeatEvent> = latest
            .into_values()
            .filter(|e| e.temperature.is_finite() && e.temperature >= lo && e.temperature <= hi)
            .cloned()
            .collect();

        if cleaned.len() <= self.config.downsample_above {
            return cleaned;
        }
        self.downsample(cleaned)
    }

    fn downsample(&self, events: Vec<HeatEvent>) -> Vec<HeatEvent> {
        let Some(newest) = events.iter().map(|e| e.timestamp).max() else {
            return events;
        };
        let cutoff = newest - Duration::days(self.config.recent_window_days);
        let total = events.len();
        let (mut recent, mut older): (Vec<HeatEvent>, Vec<HeatEvent>) =
            events.into_iter().partition(|e| e.timestamp >= cutoff);

        let mut rng = StdRng::seed_from_u64(self.config.random_state);
        older.shuffle(&mut rng);
        older.truncate(self.config.older_sample_size);
        recent.extend(older);
        recent.sort_by(|a, b| a.unit_id.cmp(&b.unit_id).then(a.timestamp.cmp(&b.timestamp)));

        info!(before = total, after = recent.len(), "Downsampled training history");
        recent
    }

    /// Seeded shuffle split; in-sample below the holdout floor
    fn split(&self, n: usize) -> (Vec<usize>, Vec<usize>, Evaluation) {
        let all: Vec<usize> = (0..n).collect();
        if n <= self.config.holdout_min_rows {
            return (all.clone(), all, Evaluation::InSample);
        }
        let mut idx = all;
        let mut rng = StdRng::seed_from_u64(self.config.random_state);
        idx.shuffle(&mut rng);
        let n_test = ((n as f64) * self.config.test_fraction).round() as usize;
        let n_test = n_test.clamp(1, n - 1);
        let train = idx.split_off(n_test);
        (train, idx, Evaluation::HeldOut)
    }
}

/// Blend of regression and classification quality
pub fn confidence(metrics: &ModelMetrics) -> f64 {
    match (metrics.r2, metrics.f1) {
        (Some(r2), Some(f1)) if r2.is_finite() && f1.is_finite() => {
            (0.9 * r2 + 0.1 * f1).clamp(0.5, 0.95)
        }
        _ => 0.85,
    }
}
