use thiserror::Error;

use risk::ConfigError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The drawdown breaker's close was rejected; exposure is uncontrolled.
    #[error("forced exit on {pair} failed: {error}")]
    ForcedExitFailed { pair: String, error: String },
}

impl From<EngineError> for common::Error {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Config(e) => e.into(),
            EngineError::ForcedExitFailed { .. } => common::Error::Critical(err.to_string()),
        }
    }
}
