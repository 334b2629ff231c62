use std::env;

use serde::{Deserialize, Serialize};

pub const DEFAULT_RECENT_GAMES: usize = 35;
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;
pub const DEFAULT_MAX_ADJUSTMENT_PP: f64 = 0.5;
pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How many of the most recent games feed a prediction.
    pub recent_games: usize,
    pub enforce_monotonicity: bool,
    /// How many recent point totals make up the entity fingerprint.
    pub fingerprint_games: usize,
    /// Entity buckets kept in the threshold cache; 0 means unbounded.
    pub cache_capacity: usize,
    /// Largest monotonicity correction, in percentage points.
    pub max_adjustment_pp: f64,
    pub use_boosting: bool,
    pub seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recent_games: DEFAULT_RECENT_GAMES,
            enforce_monotonicity: true,
            fingerprint_games: DEFAULT_RECENT_GAMES,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            max_adjustment_pp: DEFAULT_MAX_ADJUSTMENT_PP,
            use_boosting: true,
            seed: DEFAULT_SEED,
        }
    }
}

impl EngineConfig {
    /// Reads `OVER_*` variables; anything missing or malformed keeps its default.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            recent_games: env_parse("OVER_RECENT_GAMES")
                .unwrap_or(d.recent_games)
                .max(1),
            enforce_monotonicity: env_bool("OVER_ENFORCE_MONOTONICITY")
                .unwrap_or(d.enforce_monotonicity),
            fingerprint_games: env_parse("OVER_FINGERPRINT_GAMES")
                .unwrap_or(d.fingerprint_games)
                .max(1),
            cache_capacity: env_parse("OVER_CACHE_CAPACITY").unwrap_or(d.cache_capacity),
            max_adjustment_pp: env_parse::<f64>("OVER_MAX_ADJUSTMENT_PP")
                .filter(|v| v.is_finite() && *v >= 0.0)
                .unwrap_or(d.max_adjustment_pp)
                .min(100.0),
            use_boosting: env_bool("OVER_USE_BOOSTING").unwrap_or(d.use_boosting),
            seed: env_parse("OVER_SEED").unwrap_or(d.seed),
        }
    }
}

fn opt_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .and_then(|val| if val.trim().is_empty() { None } else { Some(val) })
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    opt_env(key).and_then(|val| val.trim().parse::<T>().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    parse_bool(&opt_env(key)?)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
