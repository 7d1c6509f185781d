//! Adaptive Engine
//!
//! The public assessment contract. [`AdaptiveEngine`] is the capability
//! interface a client drives; [`MirtEngine`] implements it on top of a
//! shared, read-only [`ParameterSet`].
//!
//! One engine serves one assessment session. It owns the session's ability
//! estimate and random source, and every call that re-estimates ability
//! updates that estimate as a side effect.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::estimator::{AbilityState, SamplerConfig};
use crate::params::{validate_params, ParameterSet, RawEngineParams, ValidatedParams};
use crate::predictor::{fisher_information, probability_correct};
use crate::selector::ItemSelector;
use crate::types::{ItemResponse, ItemSuggestion, DEFAULT_STEP_SIZE};

// ==================== Capability Interface ====================

pub trait AdaptiveEngine {
    /// The engine's preferred next item
    fn next_suggested_item(&mut self, history: &[ItemResponse]) -> Result<ItemSuggestion>;

    /// Overall score in `[0, 1]`: mean predicted accuracy over every known
    /// exercise, not only the attempted ones.
    fn score(&mut self, history: &[ItemResponse]) -> Result<f64>;

    /// Score as a truncated integer percentage
    fn readable_score(&mut self, history: &[ItemResponse]) -> Result<String> {
        let score = self.score(history)?;
        Ok(((score * 100.0) as i64).to_string())
    }

    /// Share of the assessment completed, saturating at 1
    fn progress(&self, history: &[ItemResponse]) -> f64;

    fn is_complete(&self, history: &[ItemResponse]) -> bool {
        self.progress(history) >= 1.0
    }

    /// Expected probability of answering `exercise` correctly next
    fn estimated_exercise_accuracy(
        &mut self,
        history: &[ItemResponse],
        exercise: &str,
        update_abilities: bool,
    ) -> Result<f64>;

    /// Expected accuracy for every known exercise
    fn estimated_exercise_accuracies(
        &mut self,
        history: &[ItemResponse],
    ) -> Result<BTreeMap<String, f64>>;
}

// ==================== Options ====================

/// Per-engine tuning; unset fields take the defaults
#[derive(Clone, Debug, Default)]
pub struct EngineOptions {
    /// Exercises the client would like questions drawn from
    pub contextual_exercises: Option<Vec<String>>,
    /// Sampling steps for live decisions (default 200)
    pub live_steps: Option<usize>,
    /// Sampling steps for scoring (default 1000)
    pub scoring_steps: Option<usize>,
    /// Proposal standard deviation (default 0.5)
    pub step_size: Option<f64>,
    /// Random seed for reproducibility
    pub seed: Option<u64>,
}

// ==================== MIRT Engine ====================

pub struct MirtEngine {
    params: Arc<ParameterSet>,
    selector: ItemSelector,
    state: AbilityState,
    live: SamplerConfig,
    scoring: SamplerConfig,
    rng: ChaCha8Rng,
}

impl MirtEngine {
    pub fn new(params: Arc<ParameterSet>) -> Self {
        Self::with_options(params, EngineOptions::default())
    }

    pub fn with_options(params: Arc<ParameterSet>, options: EngineOptions) -> Self {
        let seed = options.seed.unwrap_or_else(|| {
            use std::time::{SystemTime, UNIX_EPOCH};
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(42)
        });
        let step_size = options.step_size.unwrap_or(DEFAULT_STEP_SIZE);

        let live = SamplerConfig {
            step_size,
            ..SamplerConfig::live()
        };
        let scoring = SamplerConfig {
            step_size,
            ..SamplerConfig::scoring()
        };

        Self {
            state: AbilityState::new(params.num_abilities()),
            selector: ItemSelector::new(options.contextual_exercises),
            live: options.live_steps.map_or(live, |n| live.with_steps(n)),
            scoring: options.scoring_steps.map_or(scoring, |n| scoring.with_steps(n)),
            rng: ChaCha8Rng::seed_from_u64(seed),
            params,
        }
    }

    /// Create an engine with a specific seed (for testing)
    pub fn with_seed(params: Arc<ParameterSet>, seed: u64) -> Self {
        Self::with_options(
            params,
            EngineOptions {
                seed: Some(seed),
                ..EngineOptions::default()
            },
        )
    }

    /// Validates raw params and builds an engine over them
    pub fn from_params(raw: RawEngineParams, options: EngineOptions) -> Result<Self> {
        let params = ParameterSet::from_params(raw)?;
        Ok(Self::with_options(Arc::new(params), options))
    }

    /// See [`validate_params`]
    pub fn validate_params(raw: RawEngineParams) -> Result<ValidatedParams> {
        validate_params(raw)
    }

    pub fn parameters(&self) -> &Arc<ParameterSet> {
        &self.params
    }

    pub fn abilities(&self) -> &[f64] {
        self.state.abilities()
    }

    pub fn abilities_stdev(&self) -> &[f64] {
        self.state.stdev()
    }

    pub fn exercises(&self) -> impl Iterator<Item = &str> + '_ {
        self.params.exercises()
    }

    /// Fisher information of `exercise` at the current estimate
    pub fn fisher_information(&self, exercise: &str) -> Result<f64> {
        let row = self.params.correct_row(exercise)?;
        Ok(fisher_information(self.state.abilities(), row))
    }

    /// Accuracy on `exercise` after re-estimating from everything but the
    /// analytics cards in `history`. Offline evaluation only.
    pub fn estimated_analytics_accuracy(
        &mut self,
        history: &[ItemResponse],
        exercise: &str,
    ) -> Result<f64> {
        self.update_abilities(history, self.live, true)?;
        self.estimated_exercise_accuracy(history, exercise, false)
    }

    /// Forget the session's ability estimate
    pub fn reset(&mut self) {
        self.state.reset();
    }

    fn update_abilities(
        &mut self,
        history: &[ItemResponse],
        config: SamplerConfig,
        ignore_analytics: bool,
    ) -> Result<()> {
        self.state
            .update(history, &self.params, config, ignore_analytics, &mut self.rng)
    }
}

impl AdaptiveEngine for MirtEngine {
    fn next_suggested_item(&mut self, history: &[ItemResponse]) -> Result<ItemSuggestion> {
        let suggestion = self.selector.choose_next(
            history,
            &self.params,
            &mut self.state,
            self.live,
            &mut self.rng,
        )?;

        debug!(
            item = %suggestion.item_id,
            random = suggestion.metadata.random,
            estimated_accuracy = suggestion.metadata.estimated_accuracy,
            history_len = history.len(),
            "suggested next item"
        );
        Ok(suggestion)
    }

    fn score(&mut self, history: &[ItemResponse]) -> Result<f64> {
        self.update_abilities(history, self.scoring, false)?;

        let abilities = self.state.abilities();
        let parameters = self.params.parameters();
        let total: f64 = self
            .params
            .exercise_index()
            .values()
            .map(|&row| probability_correct(abilities, parameters.correct_row(row)))
            .sum();

        Ok(total / self.params.num_exercises() as f64)
    }

    fn progress(&self, history: &[ItemResponse]) -> f64 {
        (history.len() as f64 / self.params.max_length() as f64).min(1.0)
    }

    fn estimated_exercise_accuracy(
        &mut self,
        history: &[ItemResponse],
        exercise: &str,
        update_abilities: bool,
    ) -> Result<f64> {
        // resolve first so an unknown exercise fails without sampling
        let row = self.params.exercise_row(exercise)?;
        if update_abilities {
            self.update_abilities(history, self.live, false)?;
        }
        let row = self.params.parameters().correct_row(row);
        Ok(probability_correct(self.state.abilities(), row))
    }

    fn estimated_exercise_accuracies(
        &mut self,
        history: &[ItemResponse],
    ) -> Result<BTreeMap<String, f64>> {
        // one re-estimation for the whole map
        self.update_abilities(history, self.live, false)?;

        let abilities = self.state.abilities();
        let parameters = self.params.parameters();
        Ok(self
            .params
            .exercise_index()
            .iter()
            .map(|(name, &row)| {
                (
                    name.clone(),
                    probability_correct(abilities, parameters.correct_row(row)),
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use serde_json::json;

    fn params(value: serde_json::Value) -> Arc<ParameterSet> {
        let raw: RawEngineParams = serde_json::from_value(value).unwrap();
        Arc::new(ParameterSet::from_params(raw).unwrap())
    }

    fn two_item_model() -> Arc<ParameterSet> {
        params(json!({
            "exercise_index": {"a": 0, "b": 1},
            "max_length": 4,
            "couplings": [[2.5, 0.0], [0.01, 0.0]]
        }))
    }

    fn correct(exercise: &str, n: usize) -> Vec<ItemResponse> {
        (0..n)
            .map(|_| ItemResponse::new(exercise, true, Some(6.0)))
            .collect()
    }

    #[test]
    fn test_new_engine_starts_at_zero() {
        let engine = MirtEngine::with_seed(two_item_model(), 1);
        assert_eq!(engine.abilities(), &[0.0]);
        assert_eq!(engine.abilities_stdev(), &[0.0]);
        assert_eq!(engine.exercises().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_progress_saturates() {
        let engine = MirtEngine::with_seed(two_item_model(), 1);
        assert_eq!(engine.progress(&[]), 0.0);
        assert_eq!(engine.progress(&correct("a", 2)), 0.5);
        assert_eq!(engine.progress(&correct("a", 4)), 1.0);
        assert_eq!(engine.progress(&correct("a", 9)), 1.0);
        assert!(!engine.is_complete(&correct("a", 3)));
        assert!(engine.is_complete(&correct("a", 4)));
    }

    #[test]
    fn test_unknown_exercise_accuracy() {
        let mut engine = MirtEngine::with_seed(two_item_model(), 1);
        let err = engine
            .estimated_exercise_accuracy(&[], "nope", true)
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownExercise(_)));
    }

    #[test]
    fn test_fisher_information_at_current_estimate() {
        let engine = MirtEngine::with_seed(two_item_model(), 1);
        // p = 0.5 at zero ability, so information is a^2 / 4
        let a = engine.fisher_information("a").unwrap();
        let b = engine.fisher_information("b").unwrap();
        assert!((a - 2.5 * 2.5 * 0.25).abs() < 1e-12);
        assert!(a > b);
        assert!(matches!(
            engine.fisher_information("nope"),
            Err(EngineError::UnknownExercise(_))
        ));
    }

    #[test]
    fn test_reset_forgets_estimate() {
        let mut engine = MirtEngine::with_seed(two_item_model(), 7);
        engine
            .estimated_exercise_accuracy(&correct("a", 5), "a", true)
            .unwrap();
        assert!(engine.abilities()[0] > 0.0);

        engine.reset();
        assert_eq!(engine.abilities(), &[0.0]);
        assert_eq!(engine.abilities_stdev(), &[0.0]);
    }

    #[test]
    fn test_discriminating_item_tracks_ability() {
        let mut engine = MirtEngine::with_seed(two_item_model(), 7);
        let history = correct("a", 5);

        let a = engine.estimated_exercise_accuracy(&history, "a", true).unwrap();
        let b = engine.estimated_exercise_accuracy(&history, "b", true).unwrap();
        assert!(a > b, "accuracy on a ({}) should exceed b ({})", a, b);
        assert!(engine.abilities()[0] > 0.0);
    }

    #[test]
    fn test_accuracies_cover_all_exercises() {
        let mut engine = MirtEngine::with_seed(two_item_model(), 3);
        let accuracies = engine.estimated_exercise_accuracies(&correct("a", 2)).unwrap();

        assert_eq!(accuracies.len(), 2);
        assert!(accuracies.values().all(|&p| p > 0.0 && p < 1.0));
    }

    #[test]
    fn test_score_and_readable_score() {
        let mut engine = MirtEngine::with_seed(two_item_model(), 5);
        let history = correct("a", 3);

        let score = engine.score(&history).unwrap();
        assert!(score > 0.5 && score < 1.0, "score {}", score);

        let readable = engine.readable_score(&history).unwrap();
        let percent: i64 = readable.parse().unwrap();
        assert!((0..=100).contains(&percent));
    }

    #[test]
    fn test_score_of_empty_history_is_prior_mean() {
        let mut engine = MirtEngine::with_seed(two_item_model(), 5);
        // zero ability and zero bias put every item at 0.5
        assert!((engine.score(&[]).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_always_random_engine() {
        let model = params(json!({
            "exercise_index": {"a_1": 0, "b_1": 1, "c_1": 2},
            "max_length": 3,
            "couplings": [[1.0, 0.0], [1.0, 0.5], [1.0, -0.5]],
            "random_item_frequency": 1.0
        }));
        let mut engine = MirtEngine::with_seed(model, 12);
        let mut history = Vec::new();

        while !engine.is_complete(&history) {
            let suggestion = engine.next_suggested_item(&history).unwrap();
            assert!(suggestion.metadata.random);
            history.push(ItemResponse::new(suggestion.item_id, false, Some(20.0)));
        }
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_contextual_exercises_limit_suggestions() {
        let model = params(json!({
            "exercise_index": {"a_1": 0, "b_1": 1, "c_1": 2},
            "max_length": 3,
            "couplings": [[1.0, 0.0], [1.0, 0.5], [1.0, -0.5]]
        }));
        let options = EngineOptions {
            contextual_exercises: Some(vec!["c_1".to_string()]),
            seed: Some(4),
            ..EngineOptions::default()
        };
        let mut engine = MirtEngine::with_options(model, options);

        for _ in 0..5 {
            assert_eq!(engine.next_suggested_item(&[]).unwrap().item_id, "c_1");
        }
    }

    #[test]
    fn test_same_seed_same_suggestions() {
        let run = |seed| {
            let mut engine = MirtEngine::with_seed(two_item_model(), seed);
            let mut history = Vec::new();
            let mut picked = Vec::new();
            for i in 0..4 {
                let suggestion = engine.next_suggested_item(&history).unwrap();
                picked.push(suggestion.item_id.clone());
                history.push(ItemResponse::new(suggestion.item_id, i % 2 == 0, Some(9.0)));
            }
            picked
        };
        assert_eq!(run(21), run(21));
    }

    #[test]
    fn test_analytics_accuracy_ignores_flagged_items() {
        use crate::types::ResponseMetadata;

        let mut engine = MirtEngine::with_seed(two_item_model(), 8);
        let analytics = ResponseMetadata {
            analytics: true,
            ..ResponseMetadata::default()
        };
        let history: Vec<ItemResponse> = correct("a", 4)
            .into_iter()
            .map(|r| r.with_metadata(analytics.clone()))
            .collect();

        // every item is an analytics card, so nothing is learned
        let p = engine.estimated_analytics_accuracy(&history, "a").unwrap();
        assert!((p - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_engine_as_trait_object() {
        let mut engine: Box<dyn AdaptiveEngine> = Box::new(MirtEngine::with_seed(two_item_model(), 2));
        let suggestion = engine.next_suggested_item(&[]).unwrap();
        assert!(suggestion.metadata.random);
        assert_eq!(engine.progress(&[]), 0.0);
    }

    #[test]
    fn test_options_override_step_counts() {
        let options = EngineOptions {
            live_steps: Some(0),
            seed: Some(1),
            ..EngineOptions::default()
        };
        let mut engine = MirtEngine::with_options(two_item_model(), options);
        // zero steps leaves the estimate untouched
        let p = engine.estimated_exercise_accuracy(&correct("a", 3), "a", true).unwrap();
        assert!((p - 0.5).abs() < 1e-12);
    }
}
