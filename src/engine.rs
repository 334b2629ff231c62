use once_cell::sync::OnceCell;
use tracing::debug;

use crate::config::EngineConfig;
use crate::ensemble::EnsembleParams;
use crate::error::Result;
use crate::features::FeatureBuilder;
use crate::game_log::{self, GameRecord};
use crate::monotonic::{Enforced, EntityFingerprint, ThresholdCache};
use crate::policy::{self, Confidence, DecisionOutcome, Method};

static SHARED_ENGINE: OnceCell<PredictionEngine> = OnceCell::new();

/// Process-wide engine configured from the environment on first use.
pub fn shared_engine() -> &'static PredictionEngine {
    SHARED_ENGINE.get_or_init(|| PredictionEngine::new(EngineConfig::from_env()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictOptions {
    pub recent_games: usize,
    pub enforce_monotonicity: bool,
}

/// Entry point for predictions. Owns the threshold cache, so two engines never
/// see each other's history.
#[derive(Debug)]
pub struct PredictionEngine {
    config: EngineConfig,
    cache: ThresholdCache,
}

impl Default for PredictionEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl PredictionEngine {
    pub fn new(config: EngineConfig) -> Self {
        let cache = ThresholdCache::new(config.cache_capacity, config.max_adjustment_pp);
        Self { config, cache }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &ThresholdCache {
        &self.cache
    }

    pub fn reset_cache(&self) {
        self.cache.reset();
    }

    pub fn normalize(&self, raw: &str) -> Result<Vec<GameRecord>> {
        game_log::normalize(raw)
    }

    pub fn default_options(&self) -> PredictOptions {
        PredictOptions {
            recent_games: self.config.recent_games,
            enforce_monotonicity: self.config.enforce_monotonicity,
        }
    }

    pub fn predict(&self, records: &[GameRecord], line: f64) -> DecisionOutcome {
        self.predict_with(records, line, self.default_options())
    }

    pub fn predict_with(&self, records: &[GameRecord], line: f64, opts: PredictOptions) -> DecisionOutcome {
        let recent = tail(records, opts.recent_games);
        if recent.is_empty() {
            return empty_outcome();
        }
        let builder = FeatureBuilder::new(recent);
        self.decide(recent, &builder, line, opts.enforce_monotonicity)
    }

    /// Evaluates several lines in the given order. Line-independent feature
    /// columns are computed once; each line still passes through the cache, so
    /// earlier lines constrain later ones.
    pub fn predict_many(&self, records: &[GameRecord], lines: &[f64]) -> Vec<DecisionOutcome> {
        let opts = self.default_options();
        let recent = tail(records, opts.recent_games);
        if recent.is_empty() {
            return lines.iter().map(|_| empty_outcome()).collect();
        }
        let builder = FeatureBuilder::new(recent);
        lines
            .iter()
            .map(|line| self.decide(recent, &builder, *line, opts.enforce_monotonicity))
            .collect()
    }

    fn decide(
        &self,
        recent: &[GameRecord],
        builder: &FeatureBuilder,
        line: f64,
        enforce_monotonicity: bool,
    ) -> DecisionOutcome {
        let params = self.ensemble_params();
        let tier = policy::select_tier(recent, builder, line, &params);
        if !enforce_monotonicity {
            return DecisionOutcome::from_tier(tier, None);
        }

        let fp_points: Vec<Option<f64>> = tail(recent, self.config.fingerprint_games)
            .iter()
            .map(|r| r.points)
            .collect();
        let fingerprint = EntityFingerprint::from_points(&fp_points);
        let enforce: &dyn Fn(f64) -> Enforced = &|raw: f64| self.cache.record(fingerprint, line, raw);
        let outcome = DecisionOutcome::from_tier(tier, Some(enforce));
        debug!(
            %fingerprint,
            line,
            probability = outcome.probability,
            method = %outcome.method,
            "prediction"
        );
        outcome
    }

    fn ensemble_params(&self) -> EnsembleParams {
        EnsembleParams {
            use_boosting: self.config.use_boosting,
            seed: self.config.seed,
        }
    }
}

fn tail(records: &[GameRecord], n: usize) -> &[GameRecord] {
    &records[records.len().saturating_sub(n)..]
}

fn empty_outcome() -> DecisionOutcome {
    DecisionOutcome {
        probability: 50.0,
        confidence: Confidence::VeryLow,
        method: Method::EmpiricalFallback,
        sample_size: 0,
        adjusted: false,
        features_used: None,
        original_probability: None,
        adjustment: None,
    }
}
