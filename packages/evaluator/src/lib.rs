//! Offline evaluator for the MIRT engine.
//!
//! Loads a fitted model, replays a CSV response log user by user and emits
//! a `correct,probability` line for each held-out response, ready for ROC
//! analysis.

pub mod config;
pub mod error;
pub mod logging;
pub mod runner;

pub use config::{Config, ModelSource};
pub use error::{ConfigError, EvaluatorError};
pub use logging::{init_tracing, LoggingConfig};
pub use runner::{load_parameters, run};
