use std::path::PathBuf;

use mirt_algo::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("set only one of MIRT_MODEL_FILE and MIRT_SNAPSHOT_FILE")]
    ConflictingModel,
    #[error("invalid {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum EvaluatorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("model error: {0}")]
    Engine(#[from] EngineError),
    #[error("cannot open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
