//! Item Selector
//!
//! Chooses the next exercise of an assessment.
//!
//! Policy:
//! - First item, or with probability `random_item_frequency`: uniform pick
//! - Otherwise: the eligible exercise with maximal Fisher information at the
//!   freshly re-estimated ability
//!
//! Eligibility narrows all known exercises to the client's context and then
//! filters for diversity, falling back to the widest non-empty set.

use rand::Rng;
use std::collections::HashMap;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::estimator::{AbilityState, SamplerConfig};
use crate::params::ParameterSet;
use crate::predictor::{fisher_information, probability_correct};
use crate::types::{
    ItemResponse, ItemSuggestion, SuggestionMetadata, ATTEMPT_MAX_TIMES, REPEAT_MIN_CYCLE,
};

// ==================== Eligibility ====================

/// Family of an exercise: the name up to its last `_`.
///
/// `addition_1` and `addition_2` share the root `addition`.
pub fn exercise_root(name: &str) -> &str {
    match name.rfind('_') {
        Some(end) => &name[..end],
        None => name,
    }
}

/// Drops candidates whose family was seen within the last
/// [`REPEAT_MIN_CYCLE`] items or already attempted [`ATTEMPT_MAX_TIMES`] times.
pub fn filter_for_diversity(candidates: &[String], history: &[ItemResponse]) -> Vec<String> {
    let roots: Vec<&str> = history
        .iter()
        .map(|response| exercise_root(&response.exercise))
        .collect();

    let mut histogram: HashMap<&str, usize> = HashMap::new();
    for &root in &roots {
        *histogram.entry(root).or_insert(0) += 1;
    }
    let recent = &roots[roots.len().saturating_sub(REPEAT_MIN_CYCLE)..];

    candidates
        .iter()
        .filter(|exercise| {
            let root = exercise_root(exercise);
            !recent.contains(&root) && histogram.get(root).copied().unwrap_or(0) < ATTEMPT_MAX_TIMES
        })
        .cloned()
        .collect()
}

/// The most aggressively filtered non-empty candidate list.
///
/// Order follows `known`, so it is lexicographic for a [`ParameterSet`].
pub fn eligible_exercises(
    history: &[ItemResponse],
    known: &[String],
    contextual: Option<&[String]>,
) -> Vec<String> {
    let context: Vec<String> = match contextual {
        Some(allowed) if !allowed.is_empty() => known
            .iter()
            .filter(|exercise| allowed.contains(*exercise))
            .cloned()
            .collect(),
        _ => known.to_vec(),
    };

    let diverse = filter_for_diversity(&context, history);
    if !diverse.is_empty() {
        diverse
    } else if !context.is_empty() {
        context
    } else {
        known.to_vec()
    }
}

// ==================== Selection ====================

/// Candidate with the strictly largest Fisher information; the first one
/// wins ties.
pub fn most_informative(
    abilities: &[f64],
    params: &ParameterSet,
    candidates: &[String],
) -> Result<Option<(String, f64)>> {
    let mut best: Option<(String, f64)> = None;
    for exercise in candidates {
        let info = fisher_information(abilities, params.correct_row(exercise)?);
        let better = match &best {
            Some((_, max_info)) => info > *max_info,
            None => true,
        };
        if better {
            best = Some((exercise.clone(), info));
        }
    }
    Ok(best)
}

/// Selection policy bound to an optional mission context
#[derive(Clone, Debug, Default)]
pub struct ItemSelector {
    contextual_exercises: Option<Vec<String>>,
}

impl ItemSelector {
    pub fn new(contextual_exercises: Option<Vec<String>>) -> Self {
        Self {
            contextual_exercises,
        }
    }

    pub fn contextual_exercises(&self) -> Option<&[String]> {
        self.contextual_exercises.as_deref()
    }

    pub fn eligible_exercises(&self, history: &[ItemResponse], params: &ParameterSet) -> Vec<String> {
        let known: Vec<String> = params.exercises().map(str::to_string).collect();
        eligible_exercises(history, &known, self.contextual_exercises())
    }

    /// Picks the next item, re-estimating `state` on the informative path.
    pub fn choose_next<R: Rng + ?Sized>(
        &self,
        history: &[ItemResponse],
        params: &ParameterSet,
        state: &mut AbilityState,
        config: SamplerConfig,
        rng: &mut R,
    ) -> Result<ItemSuggestion> {
        let eligible = self.eligible_exercises(history, params);
        if eligible.is_empty() {
            return Err(EngineError::invalid("no exercises to choose from"));
        }

        let random = history.is_empty() || rng.gen::<f64>() < params.random_item_frequency();

        let item_id = if random {
            eligible[rng.gen_range(0..eligible.len())].clone()
        } else {
            state.update(history, params, config, false, rng)?;
            match most_informative(state.abilities(), params, &eligible)? {
                Some((exercise, info)) => {
                    debug!(exercise = %exercise, fisher_information = info, "most informative item");
                    exercise
                }
                None => eligible[0].clone(),
            }
        };

        let estimated_accuracy =
            probability_correct(state.abilities(), params.correct_row(&item_id)?);

        Ok(ItemSuggestion {
            item_id,
            metadata: SuggestionMetadata {
                random,
                estimated_accuracy,
            },
        })
    }
}
