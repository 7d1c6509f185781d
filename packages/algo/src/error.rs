use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid engine params: {0}")]
    InvalidParameters(String),
    #[error("unknown exercise: {0}")]
    UnknownExercise(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON decode failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidParameters(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
