use std::fmt;

use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use crate::ensemble::{EnsembleModel, EnsembleParams, EnsembleScore, recency_weights};
use crate::features::FeatureBuilder;
use crate::game_log::GameRecord;
use crate::monotonic::{Correction, Enforced, Reference};

pub const MIN_GAMES: usize = 5;
pub const MIN_USABLE_ROWS: usize = 8;
pub const EXTREME_HIGH_QUANTILE: f64 = 0.95;
pub const EXTREME_LOW_QUANTILE: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    VeryLow,
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn for_games(games: usize) -> Self {
        if games >= 25 {
            Confidence::High
        } else if games >= 15 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Method {
    EmpiricalFallback,
    ExtremeThresholdHigh,
    ExtremeThresholdLow,
    WeightedEmpirical,
    /// `None` when monotonicity enforcement was not requested.
    Ensemble(Option<Correction>),
    FallbackError(String),
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::EmpiricalFallback => f.write_str("empirical_fallback"),
            Method::ExtremeThresholdHigh => f.write_str("extreme_threshold_high"),
            Method::ExtremeThresholdLow => f.write_str("extreme_threshold_low"),
            Method::WeightedEmpirical => f.write_str("weighted_empirical"),
            Method::Ensemble(Some(c)) => write!(f, "ensemble_ml ({})", c.as_str()),
            Method::Ensemble(None) => f.write_str("ensemble_ml (no_adjustment)"),
            Method::FallbackError(reason) => write!(f, "fallback_error ({reason})"),
        }
    }
}

impl Serialize for Method {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TierOutcome {
    InsufficientData { probability: f64, games: usize },
    ExtremeHigh { probability: f64, games: usize },
    ExtremeLow { probability: f64, games: usize },
    FeatureStarved { probability: f64, games: usize, usable_rows: usize },
    Ensemble { score: EnsembleScore, games: usize },
    EnsembleFailed { probability: f64, games: usize, reason: String },
}

/// Runs the tiers in order over `recent` (already cut to the recent window).
/// `builder` must have been built from the same records.
pub fn select_tier(
    recent: &[GameRecord],
    builder: &FeatureBuilder,
    line: f64,
    params: &EnsembleParams,
) -> TierOutcome {
    let games = recent.len();
    let points: Vec<Option<f64>> = recent.iter().map(|r| r.points).collect();

    if games < MIN_GAMES {
        debug!(games, line, "tier: insufficient data");
        return TierOutcome::InsufficientData {
            probability: empirical_over_rate(&points, line),
            games,
        };
    }

    let mut present: Vec<f64> = points.iter().flatten().copied().collect();
    present.sort_by(f64::total_cmp);
    if let Some(hi) = quantile(&present, EXTREME_HIGH_QUANTILE)
        && line > hi
    {
        debug!(games, line, q95 = hi, "tier: extreme high line");
        return TierOutcome::ExtremeHigh {
            probability: empirical_over_rate(&points, line),
            games,
        };
    }
    if let Some(lo) = quantile(&present, EXTREME_LOW_QUANTILE)
        && line < lo
    {
        debug!(games, line, q05 = lo, "tier: extreme low line");
        return TierOutcome::ExtremeLow {
            probability: empirical_over_rate(&points, line),
            games,
        };
    }

    let frame = builder.frame(line).into_complete();
    if frame.len() < MIN_USABLE_ROWS {
        debug!(games, line, usable_rows = frame.len(), windows = ?builder.windows(), "tier: feature-starved");
        return TierOutcome::FeatureStarved {
            probability: weighted_over_rate(&points, line),
            games,
            usable_rows: frame.len(),
        };
    }

    match EnsembleModel::fit(&frame, params) {
        Ok(model) => TierOutcome::Ensemble {
            score: model.score_latest(),
            games,
        },
        Err(err) => {
            warn!(error = %err, line, "ensemble unavailable, using weighted empirical rate");
            TierOutcome::EnsembleFailed {
                probability: weighted_over_rate(&points, line),
                games,
                reason: err.to_string(),
            }
        }
    }
}

/// Percentage of games strictly above the line. Games without a points total
/// count as not over.
pub fn empirical_over_rate(points: &[Option<f64>], line: f64) -> f64 {
    if points.is_empty() {
        return 50.0;
    }
    let over = points.iter().filter(|p| p.is_some_and(|v| v > line)).count();
    100.0 * over as f64 / points.len() as f64
}

/// Over-rate with weights rising linearly from 0.5 (oldest) to 1.0 (newest).
pub fn weighted_over_rate(points: &[Option<f64>], line: f64) -> f64 {
    let weights = recency_weights(points.len());
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return 50.0;
    }
    let over: f64 = points
        .iter()
        .zip(&weights)
        .filter(|(p, _)| p.is_some_and(|v| v > line))
        .map(|(_, w)| w)
        .sum();
    100.0 * over / total
}

pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let pos = q.clamp(0.0, 1.0) * last as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionOutcome {
    /// Percent, rounded to two decimals.
    pub probability: f64,
    pub confidence: Confidence,
    pub method: Method,
    pub sample_size: usize,
    pub adjusted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features_used: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjustment: Option<Reference>,
}

impl DecisionOutcome {
    pub fn probability_fraction(&self) -> f64 {
        self.probability / 100.0
    }

    fn fallback(probability: f64, confidence: Confidence, method: Method, sample_size: usize) -> Self {
        Self {
            probability: round2(probability),
            confidence,
            method,
            sample_size,
            adjusted: false,
            features_used: None,
            original_probability: None,
            adjustment: None,
        }
    }

    /// Builds the response for a tier. `enforce` is applied to the ensemble
    /// probability only; `None` leaves it as scored.
    pub fn from_tier(tier: TierOutcome, enforce: Option<&dyn Fn(f64) -> Enforced>) -> Self {
        match tier {
            TierOutcome::InsufficientData { probability, games } => {
                Self::fallback(probability, Confidence::VeryLow, Method::EmpiricalFallback, games)
            }
            TierOutcome::ExtremeHigh { probability, games } => {
                Self::fallback(probability, Confidence::Low, Method::ExtremeThresholdHigh, games)
            }
            TierOutcome::ExtremeLow { probability, games } => {
                Self::fallback(probability, Confidence::Low, Method::ExtremeThresholdLow, games)
            }
            TierOutcome::FeatureStarved {
                probability, games, ..
            } => Self::fallback(probability, Confidence::Low, Method::WeightedEmpirical, games),
            TierOutcome::EnsembleFailed {
                probability,
                games,
                reason,
            } => Self::fallback(
                probability,
                Confidence::Low,
                Method::FallbackError(reason),
                games,
            ),
            TierOutcome::Ensemble { score, games } => {
                let confidence = Confidence::for_games(games);
                let Some(enforce) = enforce else {
                    return Self {
                        probability: round2(score.probability),
                        confidence,
                        method: Method::Ensemble(None),
                        sample_size: score.rows_used,
                        adjusted: false,
                        features_used: Some(score.features_used),
                        original_probability: None,
                        adjustment: None,
                    };
                };
                let enforced = enforce(score.probability);
                let adjusted = enforced.adjusted();
                Self {
                    probability: round2(enforced.probability),
                    confidence,
                    method: Method::Ensemble(Some(enforced.correction)),
                    sample_size: score.rows_used,
                    adjusted,
                    features_used: Some(score.features_used),
                    original_probability: adjusted.then(|| round2(enforced.raw)),
                    adjustment: enforced.reference.map(|r| Reference {
                        threshold: r.threshold,
                        probability: round2(r.probability),
                    }),
                }
            }
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
