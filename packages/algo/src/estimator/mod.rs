//! Ability Estimator
//!
//! Posterior ability estimation by diffusion sampling (random-walk
//! Metropolis) over the ability space.
//!
//! Core principles:
//! - Standard normal prior on every ability dimension
//! - Bernoulli likelihood of each observed outcome under the predictor
//! - Gaussian likelihood of each observed log response time
//! - Gaussian proposals around the current sample, Metropolis acceptance
//! - Running mean / variance of the chain after burn-in as the estimate
//!
//! The chain is warm-started from the caller's prior, normally the previous
//! estimate of the same session, so short live chains stay stable.

use rand::Rng;
use tracing::debug;

use crate::error::Result;
use crate::params::{MirtParameters, ParameterSet};
use crate::predictor::{dot, log_likelihood_correct};
use crate::sanitize::{log_time_taken, sanitize_ability_vector, sanitize_sigma};
use crate::types::{
    AbilityEstimate, ItemResponse, BURN_IN_FRACTION, DEFAULT_STEP_SIZE, EPSILON,
    LIVE_SAMPLING_STEPS, SCORING_SAMPLING_STEPS,
};

// ==================== Observations ====================

/// A history item resolved against the parameter set
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Observation {
    /// Row of the exercise in the coupling matrices
    pub row: usize,
    pub correct: bool,
    /// Log of the clamped response time
    pub log_time_taken: f64,
}

/// Resolves exercise names and clamps response times.
///
/// Fails with `UnknownExercise` on the first name missing from the model.
/// With `ignore_analytics`, items flagged as analytics cards are dropped.
pub fn prepare_observations(
    history: &[ItemResponse],
    params: &ParameterSet,
    ignore_analytics: bool,
) -> Result<Vec<Observation>> {
    history
        .iter()
        .filter(|response| !(ignore_analytics && response.metadata.analytics))
        .map(|response| {
            Ok(Observation {
                row: params.exercise_row(&response.exercise)?,
                correct: response.correct,
                log_time_taken: log_time_taken(response.time_taken, params.max_time_taken()),
            })
        })
        .collect()
}

// ==================== Likelihood ====================

/// Unnormalized log posterior of `abilities` given the observations
pub fn log_posterior(params: &MirtParameters, observations: &[Observation], abilities: &[f64]) -> f64 {
    let log_prior = -0.5 * abilities.iter().map(|a| a * a).sum::<f64>();

    let log_likelihood: f64 = observations
        .iter()
        .map(|obs| {
            let correct_term =
                log_likelihood_correct(abilities, params.correct_row(obs.row), obs.correct);

            let time_row = params.time_row(obs.row);
            let predicted = dot(time_row.discrimination(), abilities) + time_row.bias();
            let sigma = sanitize_sigma(params.sigma_time(obs.row));
            let err = predicted - obs.log_time_taken;
            let time_term = -(err * err) / (2.0 * sigma * sigma) - sigma.ln();

            correct_term + time_term
        })
        .sum();

    log_prior + log_likelihood
}

// ==================== Sampling ====================

/// Chain length and proposal width for one estimation
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerConfig {
    pub num_steps: usize,
    /// Standard deviation of each proposal step
    pub step_size: f64,
}

impl SamplerConfig {
    /// Fast path for choosing the next item
    pub fn live() -> Self {
        Self {
            num_steps: LIVE_SAMPLING_STEPS,
            step_size: DEFAULT_STEP_SIZE,
        }
    }

    /// Slow, near-deterministic path for final scores
    pub fn scoring() -> Self {
        Self {
            num_steps: SCORING_SAMPLING_STEPS,
            step_size: DEFAULT_STEP_SIZE,
        }
    }

    pub fn with_steps(mut self, num_steps: usize) -> Self {
        self.num_steps = num_steps;
        self
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self::live()
    }
}

/// Standard normal draw via the Box-Muller transform
pub fn sample_standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(EPSILON);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Welford accumulator over ability vectors
struct RunningMoments {
    count: usize,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl RunningMoments {
    fn new(dim: usize) -> Self {
        Self {
            count: 0,
            mean: vec![0.0; dim],
            m2: vec![0.0; dim],
        }
    }

    fn push(&mut self, sample: &[f64]) {
        self.count += 1;
        let n = self.count as f64;
        for ((mean, m2), &x) in self.mean.iter_mut().zip(self.m2.iter_mut()).zip(sample) {
            let delta = x - *mean;
            *mean += delta / n;
            *m2 += delta * (x - *mean);
        }
    }

    fn stdev(&self) -> Vec<f64> {
        if self.count == 0 {
            return vec![0.0; self.m2.len()];
        }
        let n = self.count as f64;
        self.m2.iter().map(|m2| (m2 / n).max(0.0).sqrt()).collect()
    }
}

/// Runs the diffusion sampler from `prior`.
///
/// With no observations or no steps the prior is returned unchanged.
pub fn sample_abilities_diffusion<R: Rng + ?Sized>(
    params: &MirtParameters,
    observations: &[Observation],
    prior: &[f64],
    config: SamplerConfig,
    rng: &mut R,
) -> AbilityEstimate {
    if observations.is_empty() || config.num_steps == 0 {
        return AbilityEstimate::from_prior(prior);
    }

    let dim = params.num_abilities();
    let mut current = vec![0.0; dim];
    for (slot, &value) in current.iter_mut().zip(prior) {
        *slot = value;
    }
    sanitize_ability_vector(&mut current);

    let step_size = if config.step_size.is_finite() && config.step_size > 0.0 {
        config.step_size
    } else {
        DEFAULT_STEP_SIZE
    };

    let burn_in = (config.num_steps as f64 * BURN_IN_FRACTION) as usize;
    let mut current_log_p = log_posterior(params, observations, &current);
    let mut moments = RunningMoments::new(dim);
    let mut proposal = vec![0.0; dim];
    let mut accepted = 0usize;

    for step in 0..config.num_steps {
        for (p, &c) in proposal.iter_mut().zip(&current) {
            *p = c + step_size * sample_standard_normal(rng);
        }

        let proposal_log_p = log_posterior(params, observations, &proposal);
        let log_ratio = proposal_log_p - current_log_p;
        if log_ratio >= 0.0 || rng.gen::<f64>() < log_ratio.exp() {
            current.copy_from_slice(&proposal);
            current_log_p = proposal_log_p;
            accepted += 1;
        }

        if step >= burn_in {
            moments.push(&current);
        }
    }

    debug!(
        steps = config.num_steps,
        observations = observations.len(),
        acceptance = accepted as f64 / config.num_steps as f64,
        "diffusion sampling finished"
    );

    let stdev = moments.stdev();
    let mean = if moments.count == 0 {
        current.clone()
    } else {
        moments.mean
    };

    AbilityEstimate {
        sample: current,
        mean,
        stdev,
    }
}

/// Estimates ability from a response history.
pub fn estimate<R: Rng + ?Sized>(
    history: &[ItemResponse],
    params: &ParameterSet,
    prior: &[f64],
    config: SamplerConfig,
    ignore_analytics: bool,
    rng: &mut R,
) -> Result<AbilityEstimate> {
    let observations = prepare_observations(history, params, ignore_analytics)?;
    Ok(sample_abilities_diffusion(
        params.parameters(),
        &observations,
        prior,
        config,
        rng,
    ))
}

// ==================== Session State ====================

/// The ability estimate carried by one assessment session
#[derive(Clone, Debug, PartialEq)]
pub struct AbilityState {
    abilities: Vec<f64>,
    stdev: Vec<f64>,
}

impl AbilityState {
    /// Zero abilities, zero spread
    pub fn new(num_abilities: usize) -> Self {
        Self {
            abilities: vec![0.0; num_abilities],
            stdev: vec![0.0; num_abilities],
        }
    }

    pub fn abilities(&self) -> &[f64] {
        &self.abilities
    }

    pub fn stdev(&self) -> &[f64] {
        &self.stdev
    }

    /// Re-estimates from `history`, warm-starting at the current abilities,
    /// and keeps the posterior mean.
    pub fn update<R: Rng + ?Sized>(
        &mut self,
        history: &[ItemResponse],
        params: &ParameterSet,
        config: SamplerConfig,
        ignore_analytics: bool,
        rng: &mut R,
    ) -> Result<()> {
        let estimate = estimate(history, params, &self.abilities, config, ignore_analytics, rng)?;
        self.abilities = estimate.mean;
        self.stdev = estimate.stdev;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.abilities.iter_mut().for_each(|a| *a = 0.0);
        self.stdev.iter_mut().for_each(|s| *s = 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::params::RawEngineParams;
    use crate::types::ResponseMetadata;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use serde_json::json;

    fn one_ability_model() -> ParameterSet {
        let raw: RawEngineParams = serde_json::from_value(json!({
            "exercise_index": {"easy": 0, "hard": 1},
            "max_length": 10,
            "couplings": [[1.5, 1.0], [1.5, -1.0]]
        }))
        .unwrap();
        ParameterSet::from_params(raw).unwrap()
    }

    fn answers(exercise: &str, correct: bool, n: usize) -> Vec<ItemResponse> {
        (0..n)
            .map(|_| ItemResponse::new(exercise, correct, Some(10.0)))
            .collect()
    }

    #[test]
    fn test_sample_standard_normal_moments() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let n = 20_000;
        let samples: Vec<f64> = (0..n).map(|_| sample_standard_normal(&mut rng)).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.05, "mean {}", mean);
        assert!((var - 1.0).abs() < 0.05, "variance {}", var);
    }

    #[test]
    fn test_empty_history_returns_prior() {
        let params = one_ability_model();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let estimate = estimate(&[], &params, &[0.0], SamplerConfig::live(), false, &mut rng).unwrap();

        assert_eq!(estimate.mean, vec![0.0]);
        assert_eq!(estimate.sample, vec![0.0]);
        assert_eq!(estimate.stdev, vec![0.0]);
    }

    #[test]
    fn test_correct_answers_raise_ability() {
        let params = one_ability_model();
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        let good = estimate(
            &answers("hard", true, 8),
            &params,
            &[0.0],
            SamplerConfig::scoring(),
            false,
            &mut rng,
        )
        .unwrap();
        let bad = estimate(
            &answers("easy", false, 8),
            &params,
            &[0.0],
            SamplerConfig::scoring(),
            false,
            &mut rng,
        )
        .unwrap();

        assert!(good.mean[0] > 0.5, "mean after correct answers {}", good.mean[0]);
        assert!(bad.mean[0] < -0.5, "mean after wrong answers {}", bad.mean[0]);
        assert!(good.stdev[0] > 0.0);
    }

    #[test]
    fn test_unknown_exercise_fails() {
        let params = one_ability_model();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let history = vec![ItemResponse::new("missing", true, None)];

        let err = estimate(&history, &params, &[0.0], SamplerConfig::live(), false, &mut rng)
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownExercise(name) if name == "missing"));
    }

    #[test]
    fn test_ignore_analytics_drops_flagged_items() {
        let params = one_ability_model();
        let flagged = ItemResponse::new("easy", true, None).with_metadata(ResponseMetadata {
            analytics: true,
            ..ResponseMetadata::default()
        });
        let history = vec![flagged, ItemResponse::new("hard", false, Some(3.0))];

        let kept = prepare_observations(&history, &params, true).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].row, 1);
        assert_eq!(prepare_observations(&history, &params, false).unwrap().len(), 2);
    }

    #[test]
    fn test_degenerate_times_are_clamped() {
        let params = one_ability_model();
        let history = vec![
            ItemResponse::new("easy", true, Some(f64::NAN)),
            ItemResponse::new("easy", true, Some(-4.0)),
            ItemResponse::new("easy", true, Some(1e12)),
        ];
        let observations = prepare_observations(&history, &params, false).unwrap();

        assert_eq!(observations[0].log_time_taken, 0.0);
        assert_eq!(observations[1].log_time_taken, 0.0);
        assert!((observations[2].log_time_taken - 1000f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_same_seed_same_chain() {
        let params = one_ability_model();
        let history = answers("hard", true, 3);

        let run = |seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            estimate(&history, &params, &[0.0], SamplerConfig::live(), false, &mut rng).unwrap()
        };
        assert_eq!(run(9), run(9));
    }

    #[test]
    fn test_log_posterior_prefers_consistent_ability() {
        let params = one_ability_model();
        let observations =
            prepare_observations(&answers("hard", true, 5), &params, false).unwrap();
        let high = log_posterior(params.parameters(), &observations, &[2.0]);
        let low = log_posterior(params.parameters(), &observations, &[-2.0]);
        assert!(high > low);
    }

    #[test]
    fn test_ability_state_update_and_reset() {
        let params = one_ability_model();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut state = AbilityState::new(1);

        state
            .update(&answers("hard", true, 6), &params, SamplerConfig::live(), false, &mut rng)
            .unwrap();
        assert!(state.abilities()[0] > 0.0);

        state.reset();
        assert_eq!(state.abilities(), &[0.0]);
        assert_eq!(state.stdev(), &[0.0]);
    }
}
