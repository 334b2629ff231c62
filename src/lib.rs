pub mod boosting;
pub mod calibration;
pub mod config;
pub mod engine;
pub mod ensemble;
pub mod error;
pub mod features;
pub mod forest;
pub mod game_log;
pub mod logistic;
pub mod monotonic;
pub mod policy;
pub mod summary;
pub mod tree;

pub use config::EngineConfig;
pub use engine::{PredictOptions, PredictionEngine, shared_engine};
pub use error::{EngineError, Result};
pub use game_log::{GameRecord, normalize};
pub use policy::{Confidence, DecisionOutcome, Method};
pub use summary::PlayerSummary;
