use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::ensemble::{Classifier, TrainingSet};
use crate::error::{EngineError, Result};
use crate::logistic::sigmoid;
use crate::tree::{RegressionTree, TreeParams};

const N_ROUNDS: usize = 100;
const MAX_DEPTH: usize = 4;
const LEARNING_RATE: f64 = 0.1;
const SUBSAMPLE: f64 = 0.8;
const COLSAMPLE: f64 = 0.8;
const LAMBDA: f64 = 1.0;
const MIN_CHILD_WEIGHT: f64 = 1.0;

/// Gradient-boosted trees on the log-loss, starting from a 0.5 base score.
#[derive(Debug, Clone)]
pub struct BoostedTrees {
    trees: Vec<RegressionTree>,
}

impl BoostedTrees {
    pub fn fit(data: &TrainingSet, seed: u64) -> Result<Self> {
        let n = data.len();
        let dim = data.dim();
        if n == 0 || dim == 0 {
            return Err(EngineError::estimator("boosting", "empty training set"));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let params = TreeParams {
            max_depth: MAX_DEPTH,
            min_samples_split: 2,
            min_samples_leaf: 1,
            min_child_weight: MIN_CHILD_WEIGHT,
            lambda: LAMBDA,
            max_features: None,
        };
        let n_rows = ((n as f64 * SUBSAMPLE).round() as usize).clamp(1, n);
        let n_cols = ((dim as f64 * COLSAMPLE).round() as usize).clamp(1, dim);

        let mut margin = vec![0.0; n];
        let mut grad = vec![0.0; n];
        let mut hess = vec![0.0; n];
        let mut all_rows: Vec<usize> = (0..n).collect();
        let mut all_cols: Vec<usize> = (0..dim).collect();
        let mut trees = Vec::with_capacity(N_ROUNDS);

        for _ in 0..N_ROUNDS {
            for i in 0..n {
                let p = sigmoid(margin[i]);
                let w = data.weights[i];
                grad[i] = w * (p - data.y[i]);
                hess[i] = w * (p * (1.0 - p)).max(1e-16);
            }

            all_rows.shuffle(&mut rng);
            let mut rows = all_rows[..n_rows].to_vec();
            rows.sort_unstable();
            all_cols.shuffle(&mut rng);
            let mut cols = all_cols[..n_cols].to_vec();
            cols.sort_unstable();

            let tree = RegressionTree::fit(&data.x, &grad, &hess, &rows, &cols, params, &mut rng);
            for (m, row) in margin.iter_mut().zip(&data.x) {
                *m += LEARNING_RATE * tree.predict(row);
            }
            trees.push(tree);
        }

        if margin.iter().any(|m| !m.is_finite()) {
            return Err(EngineError::estimator("boosting", "margin diverged"));
        }
        Ok(Self { trees })
    }

    fn margin(&self, x: &[f64]) -> f64 {
        self.trees
            .iter()
            .map(|t| LEARNING_RATE * t.predict(x))
            .sum()
    }
}

impl Classifier for BoostedTrees {
    fn name(&self) -> &'static str {
        "boosting"
    }

    fn predict_proba(&self, x: &[f64]) -> f64 {
        sigmoid(self.margin(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boosting_moves_toward_labels() {
        let x: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64, (i % 3) as f64]).collect();
        let y = (0..40).map(|i| if i >= 20 { 1.0 } else { 0.0 }).collect();
        let data = TrainingSet {
            x,
            y,
            weights: vec![1.0; 40],
        };
        let model = BoostedTrees::fit(&data, 42).unwrap();
        assert!(model.predict_proba(&[35.0, 1.0]) > 0.7);
        assert!(model.predict_proba(&[3.0, 1.0]) < 0.3);
    }
}
