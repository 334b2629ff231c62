use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use crate::boosting::BoostedTrees;
use crate::calibration::IsotonicCalibrator;
use crate::error::{EngineError, Result};
use crate::features::{Feature, FeatureFrame, FeatureRow, FeatureVector};
use crate::forest::RandomForest;
use crate::logistic::LogisticModel;

pub const MIN_FEATURES: usize = 5;
const LAST_GAME_WEIGHTS: [f64; 3] = [0.2, 0.3, 0.5];

pub trait Classifier: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;
    fn predict_proba(&self, x: &[f64]) -> f64;
}

#[derive(Debug, Clone, Default)]
pub struct TrainingSet {
    pub x: Vec<Vec<f64>>,
    pub y: Vec<f64>,
    pub weights: Vec<f64>,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.x.first().map_or(0, Vec::len)
    }

    /// Sample weights scaled by `n / (2 * n_class)` so both classes carry the
    /// same total weight before recency.
    pub fn balanced_weights(&self) -> Vec<f64> {
        let n = self.len() as f64;
        let pos = self.y.iter().filter(|y| **y > 0.5).count();
        let neg = self.len() - pos;
        let w_pos = n / (2.0 * pos.max(1) as f64);
        let w_neg = n / (2.0 * neg.max(1) as f64);
        self.weights
            .iter()
            .zip(&self.y)
            .map(|(w, y)| w * if *y > 0.5 { w_pos } else { w_neg })
            .collect()
    }
}

/// Linear ramp from 0.5 (oldest) to 1.0 (newest).
pub fn recency_weights(n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![0.5],
        _ => (0..n)
            .map(|i| 0.5 + 0.5 * i as f64 / (n - 1) as f64)
            .collect(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnsembleParams {
    pub use_boosting: bool,
    pub seed: u64,
}

impl Default for EnsembleParams {
    fn default() -> Self {
        Self {
            use_boosting: true,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Preprocessor {
    features: Vec<Feature>,
    medians: Vec<f64>,
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl Preprocessor {
    pub fn fit(rows: &[&FeatureRow]) -> Result<Self> {
        let n = rows.len();
        let mut features = Vec::new();
        let mut medians = Vec::new();
        for feature in Feature::ALL {
            let mut present: Vec<f64> = rows.iter().filter_map(|r| r.features.get(feature)).collect();
            if present.len() * 2 <= n {
                continue;
            }
            present.sort_by(f64::total_cmp);
            features.push(feature);
            medians.push(median_sorted(&present));
        }
        if features.len() < MIN_FEATURES {
            return Err(EngineError::TooFewFeatures {
                available: features.len(),
                required: MIN_FEATURES,
            });
        }

        let dim = features.len();
        let mut pre = Self {
            features,
            medians,
            means: vec![0.0; dim],
            scales: vec![1.0; dim],
        };
        let imputed: Vec<Vec<f64>> = rows.iter().map(|r| pre.impute(&r.features)).collect();
        for j in 0..dim {
            let mean = imputed.iter().map(|r| r[j]).sum::<f64>() / n as f64;
            let var = imputed.iter().map(|r| (r[j] - mean).powi(2)).sum::<f64>() / n as f64;
            let sd = var.sqrt();
            pre.means[j] = mean;
            pre.scales[j] = if sd > 1e-12 { sd } else { 1.0 };
        }
        Ok(pre)
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn transform(&self, v: &FeatureVector) -> Vec<f64> {
        let mut row = self.impute(v);
        for (j, x) in row.iter_mut().enumerate() {
            *x = (*x - self.means[j]) / self.scales[j];
        }
        row
    }

    fn impute(&self, v: &FeatureVector) -> Vec<f64> {
        self.features
            .iter()
            .zip(&self.medians)
            .map(|(f, m)| v.get(*f).unwrap_or(*m))
            .collect()
    }
}

fn median_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnsembleScore {
    /// Percent, 0..=100.
    pub probability: f64,
    pub features_used: usize,
    pub rows_used: usize,
}

#[derive(Debug)]
pub struct EnsembleModel {
    preprocessor: Preprocessor,
    members: Vec<Box<dyn Classifier>>,
    calibrator: Option<IsotonicCalibrator>,
    rows_used: usize,
    latest: Vec<Vec<f64>>,
}

impl EnsembleModel {
    /// Fits on the rows of `frame` whose short and medium averages are
    /// defined. Labels are `points > frame.line`.
    pub fn fit(frame: &FeatureFrame, params: &EnsembleParams) -> Result<Self> {
        let rows: Vec<&FeatureRow> = frame.rows.iter().filter(|r| r.is_complete()).collect();
        let y: Vec<f64> = rows
            .iter()
            .map(|r| if r.is_over(frame.line) { 1.0 } else { 0.0 })
            .collect();
        let overs = y.iter().filter(|v| **v > 0.5).count();
        if overs == 0 || overs == y.len() {
            return Err(EngineError::InsufficientVariance {
                line: frame.line,
                rows: rows.len(),
            });
        }

        let preprocessor = Preprocessor::fit(&rows)?;
        let data = TrainingSet {
            x: rows.iter().map(|r| preprocessor.transform(&r.features)).collect(),
            weights: recency_weights(rows.len()),
            y,
        };

        let mut members: Vec<Box<dyn Classifier>> = vec![
            Box::new(LogisticModel::fit(&data)?),
            Box::new(RandomForest::fit(&data, params.seed)?),
        ];
        if params.use_boosting {
            members.push(Box::new(BoostedTrees::fit(&data, params.seed)?));
        }

        let votes: Vec<f64> = data.x.iter().map(|x| soft_vote(&members, x)).collect();
        let calibrator = match IsotonicCalibrator::fit(&votes, &data.y, &data.weights) {
            Ok(cal) => Some(cal),
            Err(err) => {
                warn!(error = %err, "calibration failed, using raw vote");
                None
            }
        };

        let latest = data.x[data.len().saturating_sub(LAST_GAME_WEIGHTS.len())..].to_vec();
        info!(
            line = frame.line,
            rows = data.len(),
            features = preprocessor.features().len(),
            members = members.len(),
            calibrated = calibrator.is_some(),
            "ensemble fitted"
        );

        Ok(Self {
            preprocessor,
            members,
            calibrator,
            rows_used: data.len(),
            latest,
        })
    }

    pub fn member_names(&self) -> Vec<&'static str> {
        self.members.iter().map(|m| m.name()).collect()
    }

    pub fn predict_proba(&self, v: &FeatureVector) -> f64 {
        self.score_row(&self.preprocessor.transform(v))
    }

    /// Probability for the next game: the newest row alone, or a 0.2/0.3/0.5
    /// blend of the newest three when available.
    pub fn score_latest(&self) -> EnsembleScore {
        let probs: Vec<f64> = self.latest.iter().map(|x| self.score_row(x)).collect();
        let p = match probs.as_slice() {
            [a, b, c] => LAST_GAME_WEIGHTS[0] * a + LAST_GAME_WEIGHTS[1] * b + LAST_GAME_WEIGHTS[2] * c,
            [.., last] => *last,
            [] => 0.5,
        };
        EnsembleScore {
            probability: (p * 100.0).clamp(0.0, 100.0),
            features_used: self.preprocessor.features().len(),
            rows_used: self.rows_used,
        }
    }

    fn score_row(&self, x: &[f64]) -> f64 {
        let vote = soft_vote(&self.members, x);
        match &self.calibrator {
            Some(cal) => cal.apply(vote),
            None => vote,
        }
    }
}

fn soft_vote(members: &[Box<dyn Classifier>], x: &[f64]) -> f64 {
    if members.is_empty() {
        return 0.5;
    }
    members.iter().map(|m| m.predict_proba(x)).sum::<f64>() / members.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::build_features;
    use crate::game_log::GameRecord;
    use chrono::NaiveDate;

    fn records(points: &[f64]) -> Vec<GameRecord> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                GameRecord::with_points(i as u32 + 1, start + chrono::Duration::days(i as i64), Some(*p))
            })
            .collect()
    }

    fn wavy(n: usize) -> Vec<f64> {
        (0..n).map(|i| 20.0 + ((i * 7) % 11) as f64).collect()
    }

    #[test]
    fn recency_ramp_endpoints() {
        assert!(recency_weights(0).is_empty());
        assert_eq!(recency_weights(1), vec![0.5]);
        let w = recency_weights(5);
        assert_eq!(w[0], 0.5);
        assert_eq!(w[4], 1.0);
        assert!((w[2] - 0.75).abs() < 1e-12);
    }

    #[test]
    fn balanced_weights_equalise_class_mass() {
        let data = TrainingSet {
            x: vec![vec![0.0]; 4],
            y: vec![1.0, 0.0, 0.0, 0.0],
            weights: vec![1.0; 4],
        };
        let w = data.balanced_weights();
        let pos: f64 = w[..1].iter().sum();
        let neg: f64 = w[1..].iter().sum();
        assert!((pos - neg).abs() < 1e-12);
        assert!((pos - 2.0).abs() < 1e-12);
    }

    #[test]
    fn median_handles_even_and_odd() {
        assert_eq!(median_sorted(&[1.0, 2.0, 9.0]), 2.0);
        assert_eq!(median_sorted(&[1.0, 2.0, 4.0, 9.0]), 3.0);
    }

    #[test]
    fn one_sided_labels_are_rejected() {
        let frame = build_features(&records(&wavy(20)), 5.5);
        let err = EnsembleModel::fit(&frame, &EnsembleParams::default()).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientVariance { .. }));
    }

    #[test]
    fn sparse_rows_are_rejected() {
        let mut rows = Vec::new();
        for i in 0..12 {
            let mut features = FeatureVector::default();
            features.set(Feature::AvgPtsShort, Some(20.0 + i as f64));
            features.set(Feature::AvgPtsMedium, Some(21.0));
            rows.push(FeatureRow {
                points: Some(if i % 2 == 0 { 30.0 } else { 10.0 }),
                features,
            });
        }
        let frame = FeatureFrame {
            line: 20.5,
            windows: crate::features::Windows::for_len(12),
            rows,
        };
        let err = EnsembleModel::fit(&frame, &EnsembleParams::default()).unwrap_err();
        assert_eq!(
            err,
            EngineError::TooFewFeatures {
                available: 2,
                required: MIN_FEATURES
            }
        );
    }

    #[test]
    fn fitted_model_scores_latest_games() {
        let frame = build_features(&records(&wavy(30)), 24.5);
        let model = EnsembleModel::fit(&frame, &EnsembleParams::default()).unwrap();
        assert_eq!(model.member_names(), vec!["logistic", "forest", "boosting"]);
        let score = model.score_latest();
        assert!((0.0..=100.0).contains(&score.probability));
        assert!(score.features_used >= MIN_FEATURES);
        // The first two games lack a medium average.
        assert_eq!(score.rows_used, 28);
    }

    #[test]
    fn latest_score_blends_the_last_three_rows() {
        let frame = build_features(&records(&wavy(30)), 24.5);
        let model = EnsembleModel::fit(&frame, &EnsembleParams::default()).unwrap();
        assert_eq!(model.latest.len(), 3);

        let rows: Vec<f64> = model.latest.iter().map(|x| model.score_row(x)).collect();
        let want = 0.2 * rows[0] + 0.3 * rows[1] + 0.5 * rows[2];
        let score = model.score_latest();
        assert!((score.probability - 100.0 * want).abs() < 1e-9);

        // The newest row scores the same from its raw feature vector.
        let newest = &frame.rows.last().unwrap().features;
        assert!((model.predict_proba(newest) - rows[2]).abs() < 1e-12);
    }

    #[test]
    fn boosting_can_be_left_out() {
        let frame = build_features(&records(&wavy(30)), 24.5);
        let params = EnsembleParams {
            use_boosting: false,
            seed: 7,
        };
        let model = EnsembleModel::fit(&frame, &params).unwrap();
        assert_eq!(model.member_names(), vec!["logistic", "forest"]);
    }
}
