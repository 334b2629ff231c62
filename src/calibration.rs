use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metrics {
    pub samples: usize,
    pub brier: f64,
    pub log_loss: f64,
    pub accuracy: f64,
}

impl Metrics {
    fn empty() -> Self {
        Self {
            samples: 0,
            brier: 0.0,
            log_loss: 0.0,
            accuracy: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CalibrationBin {
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub count: usize,
    pub avg_pred: f64,
    pub actual_rate: f64,
}

/// Scores over-probabilities (0..1) against what happened.
pub fn evaluate_probs(predictions: &[f64], outcomes: &[bool]) -> Metrics {
    let ones = vec![1.0; predictions.len()];
    evaluate_probs_weighted(predictions, outcomes, &ones)
}

pub fn evaluate_probs_weighted(predictions: &[f64], outcomes: &[bool], weights: &[f64]) -> Metrics {
    if predictions.is_empty()
        || outcomes.is_empty()
        || predictions.len() != outcomes.len()
        || predictions.len() != weights.len()
    {
        return Metrics::empty();
    }

    let mut brier_sum = 0.0_f64;
    let mut log_loss_sum = 0.0_f64;
    let mut correct = 0.0_f64;
    let mut weight_sum = 0.0_f64;

    for ((p, outcome), w_raw) in predictions.iter().zip(outcomes).zip(weights) {
        let w = (*w_raw).max(1e-9);
        let p = p.clamp(0.0, 1.0);
        let y = if *outcome { 1.0 } else { 0.0 };
        weight_sum += w;
        brier_sum += w * (p - y).powi(2);

        let actual_prob = (if *outcome { p } else { 1.0 - p }).clamp(1e-12, 1.0);
        log_loss_sum += -w * actual_prob.ln();

        if (p >= 0.5) == *outcome {
            correct += w;
        }
    }

    let n = weight_sum.max(1e-9);
    Metrics {
        samples: predictions.len(),
        brier: brier_sum / n,
        log_loss: log_loss_sum / n,
        accuracy: correct / n,
    }
}

pub fn calibration_bins(predictions: &[f64], outcomes: &[bool], bins: usize) -> Vec<CalibrationBin> {
    let bins = bins.max(2);
    let mut counts = vec![0usize; bins];
    let mut pred_sum = vec![0.0_f64; bins];
    let mut actual_sum = vec![0.0_f64; bins];

    for (p, outcome) in predictions.iter().zip(outcomes) {
        let p = p.clamp(0.0, 1.0);
        let idx = ((p * bins as f64).floor() as usize).min(bins - 1);
        counts[idx] += 1;
        pred_sum[idx] += p;
        if *outcome {
            actual_sum[idx] += 1.0;
        }
    }

    let mut out = Vec::with_capacity(bins);
    for i in 0..bins {
        let start = i as f64 / bins as f64;
        let end = (i + 1) as f64 / bins as f64;
        let count = counts[i];
        let (avg_pred, actual_rate) = if count > 0 {
            (pred_sum[i] / count as f64, actual_sum[i] / count as f64)
        } else {
            (0.0, 0.0)
        };
        out.push(CalibrationBin {
            bucket_start: start,
            bucket_end: end,
            count,
            avg_pred,
            actual_rate,
        });
    }
    out
}

/// Non-decreasing piecewise-linear map from raw score to probability, fitted
/// with weighted pool-adjacent-violators. Scores outside the fitted range
/// clip to the end values.
#[derive(Debug, Clone, PartialEq)]
pub struct IsotonicCalibrator {
    knots: Vec<f64>,
    values: Vec<f64>,
}

impl IsotonicCalibrator {
    pub fn fit(scores: &[f64], labels: &[f64], weights: &[f64]) -> Result<Self> {
        if scores.is_empty() {
            return Err(EngineError::Calibration("no scores".to_string()));
        }
        if scores.len() != labels.len() || scores.len() != weights.len() {
            return Err(EngineError::Calibration(format!(
                "length mismatch: {} scores, {} labels, {} weights",
                scores.len(),
                labels.len(),
                weights.len()
            )));
        }
        if scores.iter().chain(labels).chain(weights).any(|v| !v.is_finite()) {
            return Err(EngineError::Calibration("non-finite input".to_string()));
        }
        if weights.iter().any(|w| *w < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
            return Err(EngineError::Calibration("weights must be positive".to_string()));
        }

        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|a, b| scores[*a].total_cmp(&scores[*b]));

        // Tied scores collapse to one weighted point first.
        let mut points: Vec<Block> = Vec::new();
        for i in order {
            let (x, y, w) = (scores[i], labels[i], weights[i]);
            match points.last_mut() {
                Some(last) if last.x_hi == x => {
                    last.sum_wy += w * y;
                    last.sum_w += w;
                }
                _ => points.push(Block {
                    sum_wy: w * y,
                    sum_w: w,
                    x_lo: x,
                    x_hi: x,
                }),
            }
        }

        let mut blocks: Vec<Block> = Vec::with_capacity(points.len());
        for p in points {
            blocks.push(p);
            while blocks.len() >= 2 {
                let n = blocks.len();
                if blocks[n - 2].value() <= blocks[n - 1].value() {
                    break;
                }
                let Some(top) = blocks.pop() else { break };
                if let Some(prev) = blocks.last_mut() {
                    prev.sum_wy += top.sum_wy;
                    prev.sum_w += top.sum_w;
                    prev.x_hi = top.x_hi;
                }
            }
        }

        let mut knots = Vec::with_capacity(blocks.len() * 2);
        let mut values = Vec::with_capacity(blocks.len() * 2);
        for b in &blocks {
            let v = b.value().clamp(0.0, 1.0);
            knots.push(b.x_lo);
            values.push(v);
            if b.x_hi > b.x_lo {
                knots.push(b.x_hi);
                values.push(v);
            }
        }

        Ok(Self { knots, values })
    }

    pub fn apply(&self, score: f64) -> f64 {
        let (Some(first), Some(last)) = (self.knots.first(), self.knots.last()) else {
            return score.clamp(0.0, 1.0);
        };
        if !score.is_finite() || score <= *first {
            return self.values[0];
        }
        if score >= *last {
            return self.values[self.values.len() - 1];
        }
        // First knot strictly greater than the score.
        let hi = self.knots.partition_point(|k| *k <= score);
        let lo = hi - 1;
        let (x0, x1) = (self.knots[lo], self.knots[hi]);
        let (y0, y1) = (self.values[lo], self.values[hi]);
        if x1 <= x0 {
            return y1;
        }
        y0 + (y1 - y0) * (score - x0) / (x1 - x0)
    }
}

#[derive(Debug, Clone, Copy)]
struct Block {
    sum_wy: f64,
    sum_w: f64,
    x_lo: f64,
    x_hi: f64,
}

impl Block {
    fn value(&self) -> f64 {
        self.sum_wy / self.sum_w.max(1e-12)
    }
}
