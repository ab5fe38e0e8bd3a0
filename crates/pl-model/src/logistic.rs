//! Multinomial logistic regression with an L2 penalty.
//!
//! The penalty follows the inverse-strength convention: smaller `c` means
//! stronger regularization. Weight decay is applied as a proximal step
//! (`w / (1 + lr * lambda)`), which stays stable for arbitrarily small `c`.

use pl_types::{require_f64, require_str, ParamSet, PlResult, TrialError};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::estimator::{Estimator, EstimatorFactory};

/// Optimization routine used by [`LogisticRegression::fit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Solver {
    /// Full-batch gradient descent.
    Gd,
    /// Per-sample stochastic gradient descent, shuffled each epoch.
    Sgd,
    /// Full-batch descent with heavy-ball momentum.
    Momentum,
}

impl Solver {
    pub const ALL: [Solver; 3] = [Solver::Gd, Solver::Sgd, Solver::Momentum];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gd => "gd",
            Self::Sgd => "sgd",
            Self::Momentum => "momentum",
        }
    }
}

impl std::str::FromStr for Solver {
    type Err = TrialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|solver| solver.as_str() == s)
            .ok_or_else(|| TrialError::InvalidParameter {
                parameter: "solver".to_string(),
                message: format!("unknown solver '{s}', expected one of gd, sgd, momentum"),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FittedWeights {
    /// Per-feature (mean, std) used to standardize inputs.
    scaling: Vec<(f64, f64)>,
    /// `n_classes x n_features`
    coef: Vec<Vec<f64>>,
    intercept: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    /// Inverse regularization strength.
    pub c: f64,
    pub solver: Solver,
    pub max_iter: usize,
    pub learning_rate: f64,
    pub seed: u64,
    weights: Option<FittedWeights>,
}

impl LogisticRegression {
    pub fn new(c: f64, solver: Solver) -> Self {
        Self {
            c,
            solver,
            max_iter: 200,
            learning_rate: 0.5,
            seed: 0,
            weights: None,
        }
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn is_fitted(&self) -> bool {
        self.weights.is_some()
    }

    fn validate_hyperparameters(&self) -> PlResult<()> {
        if !self.c.is_finite() || self.c <= 0.0 {
            return Err(TrialError::InvalidParameter {
                parameter: "C".to_string(),
                message: format!("must be a positive finite number, got {}", self.c),
            }
            .into());
        }
        if self.max_iter == 0 {
            return Err(TrialError::InvalidParameter {
                parameter: "max_iter".to_string(),
                message: "must be at least 1".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn standardize(scaling: &[(f64, f64)], row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(scaling)
            .map(|(x, (mean, std))| (x - mean) / std)
            .collect()
    }

    fn class_probabilities(coef: &[Vec<f64>], intercept: &[f64], x: &[f64]) -> Vec<f64> {
        let logits: Vec<f64> = coef
            .iter()
            .zip(intercept)
            .map(|(w, b)| w.iter().zip(x).map(|(wi, xi)| wi * xi).sum::<f64>() + b)
            .collect();
        let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let exp: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
        let total: f64 = exp.iter().sum();
        exp.into_iter().map(|e| e / total).collect()
    }

    /// Mean log-loss gradient over `rows`.
    fn gradient(
        coef: &[Vec<f64>],
        intercept: &[f64],
        rows: &[(Vec<f64>, usize)],
    ) -> (Vec<Vec<f64>>, Vec<f64>) {
        let n_classes = coef.len();
        let n_features = coef.first().map_or(0, Vec::len);
        let mut grad_w = vec![vec![0.0; n_features]; n_classes];
        let mut grad_b = vec![0.0; n_classes];

        for (x, y) in rows {
            let probs = Self::class_probabilities(coef, intercept, x);
            for k in 0..n_classes {
                let residual = probs[k] - if k == *y { 1.0 } else { 0.0 };
                grad_b[k] += residual;
                for (g, xi) in grad_w[k].iter_mut().zip(x) {
                    *g += residual * xi;
                }
            }
        }

        let n = rows.len() as f64;
        for k in 0..n_classes {
            grad_b[k] /= n;
            grad_w[k].iter_mut().for_each(|g| *g /= n);
        }
        (grad_w, grad_b)
    }
}

impl Estimator for LogisticRegression {
    fn flavor(&self) -> &'static str {
        "plinth.logistic_regression"
    }

    fn fit(&mut self, features: &[Vec<f64>], labels: &[usize]) -> PlResult<()> {
        self.validate_hyperparameters()?;
        if features.is_empty() {
            return Err(TrialError::EmptySplit {
                split: "train".to_string(),
            }
            .into());
        }
        if features.len() != labels.len() {
            return Err(TrialError::LabelMismatch {
                split: "train".to_string(),
                rows: features.len(),
                labels: labels.len(),
            }
            .into());
        }
        let n_features = features[0].len();
        if let Some(bad) = features.iter().find(|row| row.len() != n_features) {
            return Err(TrialError::FeatureMismatch {
                expected: n_features,
                actual: bad.len(),
            }
            .into());
        }
        let distinct: std::collections::BTreeSet<usize> = labels.iter().copied().collect();
        if distinct.len() < 2 {
            return Err(TrialError::FitFailed {
                message: format!(
                    "needs samples of at least 2 classes, got {}",
                    distinct.len()
                ),
            }
            .into());
        }
        let n_classes = labels.iter().max().map_or(0, |m| m + 1);

        let n = features.len() as f64;
        let scaling: Vec<(f64, f64)> = (0..n_features)
            .map(|j| {
                let mean = features.iter().map(|r| r[j]).sum::<f64>() / n;
                let var = features.iter().map(|r| (r[j] - mean).powi(2)).sum::<f64>() / n;
                let std = var.sqrt();
                (mean, if std > 0.0 { std } else { 1.0 })
            })
            .collect();

        let mut rows: Vec<(Vec<f64>, usize)> = features
            .iter()
            .zip(labels)
            .map(|(row, y)| (Self::standardize(&scaling, row), *y))
            .collect();

        let mut coef = vec![vec![0.0; n_features]; n_classes];
        let mut intercept = vec![0.0; n_classes];
        let lr = self.learning_rate;
        let lambda = 1.0 / (self.c * n);
        let decay = 1.0 + lr * lambda;

        match self.solver {
            Solver::Gd => {
                for _ in 0..self.max_iter {
                    let (gw, gb) = Self::gradient(&coef, &intercept, &rows);
                    for k in 0..n_classes {
                        intercept[k] -= lr * gb[k];
                        for (w, g) in coef[k].iter_mut().zip(&gw[k]) {
                            *w = (*w - lr * g) / decay;
                        }
                    }
                }
            }
            Solver::Momentum => {
                const BETA: f64 = 0.9;
                let mut vel_w = vec![vec![0.0; n_features]; n_classes];
                let mut vel_b = vec![0.0; n_classes];
                for _ in 0..self.max_iter {
                    let (gw, gb) = Self::gradient(&coef, &intercept, &rows);
                    for k in 0..n_classes {
                        vel_b[k] = BETA * vel_b[k] - lr * gb[k];
                        intercept[k] += vel_b[k];
                        for j in 0..n_features {
                            vel_w[k][j] = BETA * vel_w[k][j] - lr * gw[k][j];
                            coef[k][j] = (coef[k][j] + vel_w[k][j]) / decay;
                        }
                    }
                }
            }
            Solver::Sgd => {
                let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
                // per-sample steps see 1/n of the penalty each
                let sample_decay = 1.0 + lr * lambda / n;
                for epoch in 0..self.max_iter {
                    rows.shuffle(&mut rng);
                    let step = lr / (1.0 + epoch as f64 * 0.05);
                    for sample in rows.chunks(1) {
                        let (gw, gb) = Self::gradient(&coef, &intercept, sample);
                        for k in 0..n_classes {
                            intercept[k] -= step * gb[k];
                            for (w, g) in coef[k].iter_mut().zip(&gw[k]) {
                                *w = (*w - step * g) / sample_decay;
                            }
                        }
                    }
                }
            }
        }

        let diverged = coef
            .iter()
            .flatten()
            .chain(intercept.iter())
            .any(|w| !w.is_finite());
        if diverged {
            return Err(TrialError::FitFailed {
                message: format!("{} solver diverged with C={}", self.solver.as_str(), self.c),
            }
            .into());
        }

        self.weights = Some(FittedWeights {
            scaling,
            coef,
            intercept,
        });
        Ok(())
    }

    fn predict(&self, features: &[Vec<f64>]) -> PlResult<Vec<usize>> {
        let weights = self.weights.as_ref().ok_or(TrialError::NotFitted)?;
        let expected = weights.scaling.len();
        features
            .iter()
            .map(|row| -> PlResult<usize> {
                if row.len() != expected {
                    return Err(TrialError::FeatureMismatch {
                        expected,
                        actual: row.len(),
                    }
                    .into());
                }
                let x = Self::standardize(&weights.scaling, row);
                let probs = Self::class_probabilities(&weights.coef, &weights.intercept, &x);
                Ok(probs
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                    .map_or(0, |(k, _)| k))
            })
            .collect()
    }

    fn n_classes(&self) -> Option<usize> {
        self.weights.as_ref().map(|w| w.coef.len())
    }
}

/// Builds a [`LogisticRegression`] from a trial's `C` and `solver`.
#[derive(Debug, Clone, PartialEq)]
pub struct LogisticRegressionFactory {
    pub max_iter: usize,
    pub seed: u64,
}

impl Default for LogisticRegressionFactory {
    fn default() -> Self {
        Self {
            max_iter: 200,
            seed: 0,
        }
    }
}

impl EstimatorFactory for LogisticRegressionFactory {
    type Model = LogisticRegression;

    fn parameter_names(&self) -> &[&'static str] {
        &["C", "solver"]
    }

    fn build(&self, params: &ParamSet) -> PlResult<LogisticRegression> {
        let c = require_f64(params, "C")?;
        let solver: Solver = require_str(params, "solver")?.parse()?;
        Ok(LogisticRegression::new(c, solver)
            .with_max_iter(self.max_iter)
            .with_seed(self.seed))
    }
}
