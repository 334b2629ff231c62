use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("line {line} leaves only one outcome class across {rows} games")]
    InsufficientVariance { line: f64, rows: usize },

    #[error("only {available} usable features, need {required}")]
    TooFewFeatures { available: usize, required: usize },

    #[error("{estimator} failed: {message}")]
    Estimator {
        estimator: &'static str,
        message: String,
    },

    #[error("calibration failed: {0}")]
    Calibration(String),
}

impl EngineError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn estimator(estimator: &'static str, message: impl Into<String>) -> Self {
        Self::Estimator {
            estimator,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
