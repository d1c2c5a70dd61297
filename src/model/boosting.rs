//! Gradient boosting over histogram trees: squared loss for temperature,
//! logistic loss for spike probability.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::tree::{BinMapper, RegressionTree, TreeParams};
use crate::config::BoostingParams;

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Loss {
    Squared,
    Logistic,
}

impl Loss {
    /// Negative gradient and hessian at raw score `f`
    fn stats(self, target: f64, f: f64) -> (f64, f64) {
        match self {
            Loss::Squared => (target - f, 1.0),
            Loss::Logistic => {
                let p = sigmoid(f);
                (target - p, (p * (1.0 - p)).max(1e-12))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Ensemble {
    base_score: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
}

impl Ensemble {
    fn raw(&self, row: &[f64]) -> f64 {
        self.base_score
            + self.learning_rate * self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }

    fn fit(
        rows: &[Vec<f64>],
        targets: &[f64],
        base_score: f64,
        loss: Loss,
        params: &BoostingParams,
        seed: u64,
    ) -> Self {
        let n = rows.len().min(targets.len());
        let mut ensemble = Self {
            base_score,
            learning_rate: params.learning_rate,
            trees: Vec::with_capacity(params.n_estimators),
        };
        if n == 0 {
            return ensemble;
        }

        let mapper = BinMapper::fit(&rows[..n], params.max_bins);
        let bins = mapper.transform(&rows[..n]);
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split,
            min_samples_leaf: params.min_samples_leaf,
            l2_regularization: params.l2_regularization,
        };
        let mut rng = StdRng::seed_from_u64(seed);
        let mut scores = vec![base_score; n];
        let mut grad = vec![0.0; n];
        let mut hess = vec![0.0; n];

        for _ in 0..params.n_estimators {
            for i in 0..n {
                let (g, h) = loss.stats(targets[i], scores[i]);
                grad[i] = g;
                hess[i] = h;
            }
            let mut sample: Vec<usize> = if params.subsample < 1.0 {
                (0..n).filter(|_| rng.gen::<f64>() < params.subsample).collect()
            } else {
                (0..n).collect()
            };
            if sample.is_empty() {
                sample = (0..n).collect();
            }

            let tree = RegressionTree::fit(&mapper, &bins, &grad, &hess, sample, &tree_params);
            for (score, row) in scores.iter_mut().zip(rows) {
                *score += params.learning_rate * tree.predict(row);
            }
            ensemble.trees.push(tree);
        }
        ensemble
    }
}

/// Temperature regressor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostedRegressor {
    ensemble: Ensemble,
}

impl GradientBoostedRegressor {
    pub fn fit(rows: &[Vec<f64>], targets: &[f64], params: &BoostingParams, seed: u64) -> Self {
        let base = if targets.is_empty() {
            0.0
        } else {
            targets.iter().sum::<f64>() / targets.len() as f64
        };
        Self {
            ensemble: Ensemble::fit(rows, targets, base, Loss::Squared, params, seed),
        }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        self.ensemble.raw(row)
    }

    pub fn n_trees(&self) -> usize {
        self.ensemble.trees.len()
    }
}

/// Spike classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostedClassifier {
    ensemble: Ensemble,
}

impl GradientBoostedClassifier {
    pub fn fit(rows: &[Vec<f64>], labels: &[bool], params: &BoostingParams, seed: u64) -> Self {
        let targets: Vec<f64> = labels.iter().map(|&l| if l { 1.0 } else { 0.0 }).collect();
        let prior = if targets.is_empty() {
            0.5
        } else {
            targets.iter().sum::<f64>() / targets.len() as f64
        };
        let p = prior.clamp(1e-6, 1.0 - 1e-6);
        let base = (p / (1.0 - p)).ln();
        Self {
            ensemble: Ensemble::fit(rows, &targets, base, Loss::Logistic, params, seed),
        }
    }

    /// P(spike)
    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        sigmoid(self.ensemble.raw(row))
    }

    pub fn predict(&self, row: &[f64]) -> bool {
        self.predict_proba(row) >= 0.5
    }

    pub fn n_trees(&self) -> usize {
        self.ensemble.trees.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> BoostingParams {
        BoostingParams {
            n_estimators: 40,
            learning_rate: 0.2,
            max_depth: 3,
            min_samples_split: 4,
            min_samples_leaf: 2,
            subsample: 0.8,
            l2_regularization: 1.0,
            max_bins: 32,
        }
    }

    #[test]
    fn test_regressor_learns_linear_trend() {
        let rows: Vec<Vec<f64>> = (0..200).map(|i| vec![i as f64 / 10.0]).collect();
        let y: Vec<f64> = rows.iter().map(|r| 70.0 + 2.0 * r[0]).collect();
        let model = GradientBoostedRegressor::fit(&rows, &y, &small(), 1);

        assert_eq!(model.n_trees(), 40);
        let err: f64 = rows
            .iter()
            .zip(&y)
            .map(|(r, t)| (model.predict(r) - t).abs())
            .sum::<f64>()
            / 200.0;
        assert!(err < 2.0, "mean error {}", err);
    }

    #[test]
    fn test_classifier_separates() {
        let rows: Vec<Vec<f64>> = (0..200).map(|i| vec![i as f64]).collect();
        let labels: Vec<bool> = (0..200).map(|i| i >= 150).collect();
        let model = GradientBoostedClassifier::fit(&rows, &labels, &small(), 1);

        assert!(model.predict_proba(&[190.0]) > 0.7);
        assert!(model.predict_proba(&[20.0]) < 0.3);
        let p = model.predict_proba(&[100.0]);
        assert!((0.0..=1.0).contains(&p));
    }

    #[test]
    fn test_single_class_stays_confident() {
        let rows: Vec<Vec<f64>> = (0..50).map(|i| vec![i as f64]).collect();
        let labels = vec![false; 50];
        let model = GradientBoostedClassifier::fit(&rows, &labels, &small(), 3);
        assert!(model.predict_proba(&[10.0]) < 0.01);
    }

    #[test]
    fn test_deterministic_for_seed() {
        let rows: Vec<Vec<f64>> = (0..100).map(|i| vec![(i * 7 % 13) as f64, i as f64]).collect();
        let y: Vec<f64> = rows.iter().map(|r| r[0] * 3.0 - r[1]).collect();
        let a = GradientBoostedRegressor::fit(&rows, &y, &small(), 9);
        let b = GradientBoostedRegressor::fit(&rows, &y, &small(), 9);
        assert_eq!(a.predict(&[4.0, 50.0]), b.predict(&[4.0, 50.0]));
    }
}
