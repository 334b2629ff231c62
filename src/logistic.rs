use crate::ensemble::{Classifier, TrainingSet};
use crate::error::{EngineError, Result};

/// Inverse regularisation strength, same meaning as the usual `C`.
const C_INV_REG: f64 = 0.5;
const MAX_ITERS: usize = 2000;
const GRAD_TOL: f64 = 1e-7;

/// L2-regularised logistic regression with an unpenalised intercept.
#[derive(Debug, Clone)]
pub struct LogisticModel {
    intercept: f64,
    coeffs: Vec<f64>,
}

impl LogisticModel {
    /// Minimises `sum(s_i * logloss_i) + |w|^2 / (2C)` by full-batch gradient
    /// descent, where `s_i` is the sample weight times the balanced class
    /// weight.
    pub fn fit(data: &TrainingSet) -> Result<Self> {
        let dim = data.dim();
        let s = data.balanced_weights();
        let s_sum: f64 = s.iter().sum();
        if s_sum <= 0.0 {
            return Err(EngineError::estimator("logistic", "zero total weight"));
        }

        // Step from a Lipschitz bound on the normalised objective.
        let mut sq = 0.0;
        for (row, w) in data.x.iter().zip(&s) {
            sq += w * (1.0 + row.iter().map(|v| v * v).sum::<f64>());
        }
        let l2 = 1.0 / (C_INV_REG * s_sum);
        let lipschitz = 0.25 * sq / s_sum + l2;
        let lr = 1.0 / lipschitz.max(1e-9);

        let mut intercept = 0.0;
        let mut coeffs = vec![0.0; dim];
        let mut grad = vec![0.0; dim];

        for _ in 0..MAX_ITERS {
            grad.iter_mut().for_each(|g| *g = 0.0);
            let mut grad_b = 0.0;
            for ((row, y), w) in data.x.iter().zip(&data.y).zip(&s) {
                let p = sigmoid(intercept + dot(&coeffs, row));
                let dz = w * (p - y);
                grad_b += dz;
                for (g, v) in grad.iter_mut().zip(row) {
                    *g += dz * v;
                }
            }
            grad_b /= s_sum;
            let mut max_g = grad_b.abs();
            for (g, c) in grad.iter_mut().zip(&coeffs) {
                *g = *g / s_sum + l2 * c;
                max_g = max_g.max(g.abs());
            }

            intercept -= lr * grad_b;
            for (c, g) in coeffs.iter_mut().zip(&grad) {
                *c -= lr * g;
            }
            if max_g < GRAD_TOL {
                break;
            }
        }

        if !intercept.is_finite() || coeffs.iter().any(|c| !c.is_finite()) {
            return Err(EngineError::estimator("logistic", "coefficients diverged"));
        }
        Ok(Self { intercept, coeffs })
    }

    pub fn coeffs(&self) -> &[f64] {
        &self.coeffs
    }
}

impl Classifier for LogisticModel {
    fn name(&self) -> &'static str {
        "logistic"
    }

    fn predict_proba(&self, x: &[f64]) -> f64 {
        sigmoid(self.intercept + dot(&self.coeffs, x))
    }
}

pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_is_stable_at_extremes() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(800.0) <= 1.0);
        assert!(sigmoid(-800.0) >= 0.0);
        assert!(sigmoid(-800.0).is_finite());
    }

    #[test]
    fn learns_direction_of_a_single_feature() {
        let xs = [-2.0, -1.5, -1.0, -0.5, 0.5, 1.0, 1.5, 2.0];
        let data = TrainingSet {
            x: xs.iter().map(|v| vec![*v]).collect(),
            y: vec![0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 1.0],
            weights: vec![1.0; 8],
        };
        let model = LogisticModel::fit(&data).unwrap();
        assert!(model.coeffs()[0] > 0.0);
        assert!(model.predict_proba(&[2.0]) > 0.5);
        assert!(model.predict_proba(&[-2.0]) < 0.5);
    }

    #[test]
    fn separable_data_stays_finite_under_l2() {
        let data = TrainingSet {
            x: vec![vec![-1.0], vec![-1.0], vec![1.0], vec![1.0]],
            y: vec![0.0, 0.0, 1.0, 1.0],
            weights: vec![0.5, 0.7, 0.8, 1.0],
        };
        let model = LogisticModel::fit(&data).unwrap();
        let p = model.predict_proba(&[1.0]);
        assert!(p > 0.5 && p < 1.0);
    }
}
