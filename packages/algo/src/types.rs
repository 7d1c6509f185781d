//! Common Types and Constants
//!
//! Shared data structures used across the engine modules: response records,
//! item suggestions and tuning defaults.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ==================== Constants ====================

/// Don't repeat an exercise family within this many consecutive items
pub const REPEAT_MIN_CYCLE: usize = 5;

/// Don't attempt an exercise family more than this many times
pub const ATTEMPT_MAX_TIMES: usize = 1;

/// Assessment length used when an offline snapshot omits `max_length`
pub const DEFAULT_MAX_LENGTH: usize = 15;

/// Upper clamp (seconds) for response time when the model omits one
pub const DEFAULT_MAX_TIME_TAKEN: f64 = 1000.0;

/// Lower clamp (seconds) for response time
pub const MIN_TIME_TAKEN: f64 = 1.0;

/// Share of post-warm-up items chosen uniformly at random
pub const DEFAULT_RANDOM_ITEM_FREQUENCY: f64 = 0.05;

/// Sampling steps for interactive decisions
pub const LIVE_SAMPLING_STEPS: usize = 200;

/// Sampling steps for final scoring
pub const SCORING_SAMPLING_STEPS: usize = 1000;

/// Standard deviation of the Gaussian proposal step
pub const DEFAULT_STEP_SIZE: f64 = 0.5;

/// Fraction of each chain discarded before averaging
pub const BURN_IN_FRACTION: f64 = 0.2;

/// Logit clamp keeping probabilities strictly inside (0, 1)
pub const MAX_LOGIT: f64 = 30.0;

/// Numerical stability epsilon
pub const EPSILON: f64 = 1e-10;

// ==================== Response History ====================

/// Metadata attached to a recorded response
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// The item was issued by the random policy
    #[serde(default)]
    pub random: bool,
    /// The item is an analytics card, held out in offline evaluation
    #[serde(default)]
    pub analytics: bool,
    /// Any other client-supplied keys
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One answered item in an assessment history
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemResponse {
    /// Exercise name, must be known to the parameter set
    pub exercise: String,
    /// Whether the answer was correct
    pub correct: bool,
    /// Response latency in seconds; missing or garbage values are clamped
    #[serde(default)]
    pub time_taken: Option<f64>,
    #[serde(default)]
    pub metadata: ResponseMetadata,
}

impl ItemResponse {
    pub fn new(exercise: impl Into<String>, correct: bool, time_taken: Option<f64>) -> Self {
        Self {
            exercise: exercise.into(),
            correct,
            time_taken,
            metadata: ResponseMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: ResponseMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

// ==================== Item Suggestion ====================

/// Metadata describing how a suggestion was made
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SuggestionMetadata {
    /// Chosen by the random policy rather than information maximization
    pub random: bool,
    /// Predicted accuracy on the item at the current ability estimate
    pub estimated_accuracy: f64,
}

/// The engine's preferred next item
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemSuggestion {
    pub item_id: String,
    pub metadata: SuggestionMetadata,
}

// ==================== Ability Estimate ====================

/// Result of one sampling run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AbilityEstimate {
    /// Last state of the chain
    pub sample: Vec<f64>,
    /// Posterior mean over kept samples
    pub mean: Vec<f64>,
    /// Elementwise posterior standard deviation
    pub stdev: Vec<f64>,
}

impl AbilityEstimate {
    /// An estimate that is exactly the prior, with no spread
    pub fn from_prior(prior: &[f64]) -> Self {
        Self {
            sample: prior.to_vec(),
            mean: prior.to_vec(),
            stdev: vec![0.0; prior.len()],
        }
    }
}
