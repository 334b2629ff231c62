use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::ensemble::{Classifier, TrainingSet};
use crate::error::{EngineError, Result};
use crate::tree::{RegressionTree, TreeParams};

const N_TREES: usize = 100;
const MAX_DEPTH: usize = 5;
const MIN_SAMPLES_SPLIT: usize = 10;
const MIN_SAMPLES_LEAF: usize = 5;

/// Bagged classification trees with balanced class weights and sqrt(p)
/// features per split.
#[derive(Debug, Clone)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    pub fn fit(data: &TrainingSet, seed: u64) -> Result<Self> {
        let n = data.len();
        if n == 0 {
            return Err(EngineError::estimator("forest", "no rows"));
        }
        let dim = data.dim();
        let w = data.balanced_weights();
        let grad: Vec<f64> = w.iter().zip(&data.y).map(|(w, y)| -w * y).collect();
        let features: Vec<usize> = (0..dim).collect();
        let params = TreeParams {
            max_depth: MAX_DEPTH,
            min_samples_split: MIN_SAMPLES_SPLIT,
            min_samples_leaf: MIN_SAMPLES_LEAF,
            min_child_weight: 0.0,
            lambda: 0.0,
            max_features: Some(((dim as f64).sqrt().floor() as usize).max(1)),
        };

        // One RNG per tree keeps the result independent of thread scheduling.
        let trees: Vec<RegressionTree> = (0..N_TREES)
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(t as u64));
                let rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit(&data.x, &grad, &w, &rows, &features, params, &mut rng)
            })
            .collect();

        Ok(Self { trees })
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }
}

impl Classifier for RandomForest {
    fn name(&self) -> &'static str {
        "forest"
    }

    fn predict_proba(&self, x: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.5;
        }
        let sum: f64 = self.trees.iter().map(|t| t.predict(x)).sum();
        (sum / self.trees.len() as f64).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stepped_data() -> TrainingSet {
        let x: Vec<Vec<f64>> = (0..30)
            .map(|i| vec![i as f64, ((i * 7) % 5) as f64])
            .collect();
        let y = (0..30).map(|i| if i >= 15 { 1.0 } else { 0.0 }).collect();
        TrainingSet {
            x,
            y,
            weights: vec![1.0; 30],
        }
    }

    #[test]
    fn separates_a_clear_threshold() {
        let forest = RandomForest::fit(&stepped_data(), 42).unwrap();
        assert_eq!(forest.tree_count(), 100);
        assert!(forest.predict_proba(&[28.0, 1.0]) > 0.6);
        assert!(forest.predict_proba(&[2.0, 1.0]) < 0.4);
    }

    #[test]
    fn same_seed_same_forest_output() {
        let data = stepped_data();
        let a = RandomForest::fit(&data, 9).unwrap();
        let b = RandomForest::fit(&data, 9).unwrap();
        for i in 0..30 {
            let x = [i as f64, 2.0];
            assert_eq!(a.predict_proba(&x), b.predict_proba(&x));
        }
    }
}
