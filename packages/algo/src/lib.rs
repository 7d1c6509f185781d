//! # mirt-algo - adaptive assessment engine
//!
//! Pure Rust implementation of a Multidimensional Item Response Theory
//! (MIRT) assessment engine:
//!
//! - **Ability estimation** - diffusion (random-walk Metropolis) sampling of
//!   the posterior over a learner's ability vector
//! - **Response prediction** - multidimensional logistic accuracy model and
//!   Fisher information
//! - **Item selection** - random warm-up, diversity filtering and
//!   information-maximizing choice
//! - **Evaluation** - held-out replay of response logs for ROC analysis
//!
//! ## Module layout
//!
//! - [`params`] - fitted parameter sets, validation of current and legacy formats
//! - [`predictor`] - probability of a correct response, Fisher information
//! - [`estimator`] - ability sampling and per-session ability state
//! - [`selector`] - eligible exercises and the selection policy
//! - [`engine`] - the [`AdaptiveEngine`] contract and [`MirtEngine`]
//! - [`evaluation`] - log replay harness
//! - [`sanitize`] - numerical stability helpers
//! - [`types`] - shared types and constants
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use mirt_algo::{AdaptiveEngine, ItemResponse, MirtEngine, ParameterSet, RawEngineParams};
//!
//! let raw: RawEngineParams = serde_json::from_str(r#"{
//!     "exercise_index": {"addition_1": 0, "subtraction_1": 1},
//!     "max_length": 10,
//!     "couplings": [[1.2, 0.3], [0.8, -0.2]]
//! }"#).unwrap();
//! let params = Arc::new(ParameterSet::from_params(raw).unwrap());
//!
//! let mut engine = MirtEngine::with_seed(params, 42);
//! let mut history = Vec::new();
//! let first = engine.next_suggested_item(&history).unwrap();
//! history.push(ItemResponse::new(first.item_id, true, Some(14.0)));
//!
//! let score = engine.score(&history).unwrap();
//! assert!(score > 0.0 && score < 1.0);
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod engine;
pub mod error;
pub mod estimator;
pub mod evaluation;
pub mod params;
pub mod predictor;
pub mod sanitize;
pub mod selector;
pub mod types;

// ============================================================================
// Re-exports
// ============================================================================

pub use types::*;

pub use engine::{AdaptiveEngine, EngineOptions, MirtEngine};

pub use error::{EngineError, Result};

pub use estimator::{AbilityState, SamplerConfig};

pub use evaluation::{EvaluationHarness, EvaluationSummary, LogLayout, PredictionRecord};

pub use params::{
    validate_params, ItemRow, MirtParameters, ParameterSet, ParamsFormat, RawEngineParams,
    ValidatedParams,
};

pub use selector::ItemSelector;
