//! Parameter Set
//!
//! A fitted MIRT model as consumed by the engine: per-exercise correctness
//! and response-time couplings plus the global model shape.
//!
//! Two live input shapes are accepted and normalized into one
//! [`ParameterSet`]:
//! - **current**: a flat parameter vector with response-time modeling
//! - **legacy**: a bare correctness coupling matrix, no response time
//!
//! An offline snapshot file is a third, explicit entry point.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{EngineError, Result};
use crate::sanitize::has_invalid_values;
use crate::types::{DEFAULT_MAX_LENGTH, DEFAULT_MAX_TIME_TAKEN, DEFAULT_RANDOM_ITEM_FREQUENCY};

// ==================== Item Rows ====================

/// One exercise's coupling row: discrimination weights followed by a bias
#[derive(Clone, Copy, Debug)]
pub struct ItemRow<'a> {
    weights: &'a [f64],
}

impl<'a> ItemRow<'a> {
    pub fn new(weights: &'a [f64]) -> Self {
        Self { weights }
    }

    /// Per-ability weights (every column but the last)
    pub fn discrimination(&self) -> &'a [f64] {
        match self.weights.split_last() {
            Some((_, rest)) => rest,
            None => &[],
        }
    }

    /// Bias / difficulty term (the last column)
    pub fn bias(&self) -> f64 {
        self.weights.last().copied().unwrap_or(0.0)
    }
}

// ==================== MIRT Parameters ====================

/// Row-major coupling matrices for all exercises.
///
/// Flat layout: `W_correct`, then `W_time`, then `sigma_time`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MirtParameters {
    num_abilities: usize,
    num_exercises: usize,
    w_correct: Vec<f64>,
    w_time: Vec<f64>,
    sigma_time: Vec<f64>,
}

impl MirtParameters {
    /// Zero couplings and unit time noise
    pub fn new(num_abilities: usize, num_exercises: usize) -> Self {
        let width = num_abilities + 1;
        Self {
            num_abilities,
            num_exercises,
            w_correct: vec![0.0; num_exercises * width],
            w_time: vec![0.0; num_exercises * width],
            sigma_time: vec![1.0; num_exercises],
        }
    }

    /// Length of a flat vector for the given shape
    pub fn flat_len(num_abilities: usize, num_exercises: usize) -> usize {
        2 * num_exercises * (num_abilities + 1) + num_exercises
    }

    pub fn from_flat(num_abilities: usize, num_exercises: usize, flat: &[f64]) -> Result<Self> {
        if num_abilities == 0 {
            return Err(EngineError::invalid("num_abilities must be positive"));
        }

        let expected = Self::flat_len(num_abilities, num_exercises);
        if flat.len() != expected {
            return Err(EngineError::invalid(format!(
                "theta_flat has {} values, expected {} for {} exercises and {} abilities",
                flat.len(),
                expected,
                num_exercises,
                num_abilities
            )));
        }

        let block = num_exercises * (num_abilities + 1);
        Ok(Self {
            num_abilities,
            num_exercises,
            w_correct: flat[..block].to_vec(),
            w_time: flat[block..2 * block].to_vec(),
            sigma_time: flat[2 * block..].to_vec(),
        })
    }

    /// Converts a no-response-time coupling matrix: `W_time = 0`, `sigma_time = 1`
    pub fn from_couplings(couplings: &[Vec<f64>]) -> Result<Self> {
        let width = couplings.first().map(Vec::len).unwrap_or(0);
        if width < 2 {
            return Err(EngineError::invalid(
                "couplings rows need at least one ability column and a bias",
            ));
        }
        if couplings.iter().any(|row| row.len() != width) {
            return Err(EngineError::invalid("couplings rows differ in length"));
        }

        let mut params = Self::new(width - 1, couplings.len());
        params.w_correct = couplings.iter().flatten().copied().collect();
        Ok(params)
    }

    fn from_rows(
        num_abilities: usize,
        w_correct: &[Vec<f64>],
        w_time: &[Vec<f64>],
        sigma_time: &[f64],
    ) -> Result<Self> {
        let width = num_abilities + 1;
        let num_exercises = w_correct.len();
        let shapes_match = num_abilities > 0
            && w_time.len() == num_exercises
            && sigma_time.len() == num_exercises
            && w_correct.iter().chain(w_time).all(|row| row.len() == width);
        if !shapes_match {
            return Err(EngineError::invalid("snapshot theta has inconsistent shapes"));
        }

        Ok(Self {
            num_abilities,
            num_exercises,
            w_correct: w_correct.iter().flatten().copied().collect(),
            w_time: w_time.iter().flatten().copied().collect(),
            sigma_time: sigma_time.to_vec(),
        })
    }

    pub fn flat(&self) -> Vec<f64> {
        let mut flat = Vec::with_capacity(Self::flat_len(self.num_abilities, self.num_exercises));
        flat.extend_from_slice(&self.w_correct);
        flat.extend_from_slice(&self.w_time);
        flat.extend_from_slice(&self.sigma_time);
        flat
    }

    pub fn num_abilities(&self) -> usize {
        self.num_abilities
    }

    pub fn num_exercises(&self) -> usize {
        self.num_exercises
    }

    fn row<'m>(&self, matrix: &'m [f64], index: usize) -> &'m [f64] {
        let width = self.num_abilities + 1;
        &matrix[index * width..(index + 1) * width]
    }

    pub fn correct_row(&self, index: usize) -> ItemRow<'_> {
        ItemRow::new(self.row(&self.w_correct, index))
    }

    pub fn time_row(&self, index: usize) -> ItemRow<'_> {
        ItemRow::new(self.row(&self.w_time, index))
    }

    pub fn sigma_time(&self, index: usize) -> f64 {
        self.sigma_time[index]
    }
}

// ==================== Raw Input & Validation ====================

/// Engine params as received from a client or a model file.
///
/// Every field is optional here; [`validate_params`] decides which shape
/// the input has.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawEngineParams {
    #[serde(default, alias = "exercise_ind_dict")]
    pub exercise_index: Option<BTreeMap<String, usize>>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub theta_flat: Option<Vec<f64>>,
    #[serde(default)]
    pub num_abilities: Option<usize>,
    #[serde(default)]
    pub max_time_taken: Option<f64>,
    #[serde(default)]
    pub couplings: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub random_item_frequency: Option<f64>,
}

/// Which of the accepted input shapes the params came in
#[derive(Clone, Debug, PartialEq)]
pub enum ParamsFormat {
    /// Response-time aware flat parameter vector
    Current {
        theta_flat: Vec<f64>,
        num_abilities: usize,
    },
    /// Correctness couplings only
    Legacy { couplings: Vec<Vec<f64>> },
}

/// Params that passed shape validation
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedParams {
    pub exercise_index: BTreeMap<String, usize>,
    pub max_length: usize,
    pub format: ParamsFormat,
    pub max_time_taken: Option<f64>,
    pub random_item_frequency: Option<f64>,
}

/// Checks that the raw params match one of the two accepted formats.
///
/// The current format is preferred when both could apply.
pub fn validate_params(raw: RawEngineParams) -> Result<ValidatedParams> {
    let RawEngineParams {
        exercise_index,
        max_length,
        theta_flat,
        num_abilities,
        max_time_taken,
        couplings,
        random_item_frequency,
    } = raw;

    // required by both formats
    let (exercise_index, max_length) = match (exercise_index, max_length) {
        (Some(index), Some(len)) => (index, len),
        _ => {
            return Err(EngineError::invalid(
                "exercise_index and max_length are required",
            ))
        }
    };

    let format = match (theta_flat, num_abilities, max_time_taken, couplings) {
        (Some(theta_flat), Some(num_abilities), Some(_), _) => ParamsFormat::Current {
            theta_flat,
            num_abilities,
        },
        (_, _, _, Some(couplings)) if couplings.len() == exercise_index.len() => {
            ParamsFormat::Legacy { couplings }
        }
        (_, _, _, Some(couplings)) => {
            return Err(EngineError::invalid(format!(
                "couplings has {} rows but exercise_index has {} exercises",
                couplings.len(),
                exercise_index.len()
            )))
        }
        _ => {
            return Err(EngineError::invalid(
                "expected theta_flat, num_abilities and max_time_taken, or couplings",
            ))
        }
    };

    Ok(ValidatedParams {
        exercise_index,
        max_length,
        format,
        max_time_taken,
        random_item_frequency,
    })
}

// ==================== Parameter Set ====================

/// Immutable fitted model shared by every engine built from it
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterSet {
    parameters: MirtParameters,
    exercise_index: BTreeMap<String, usize>,
    max_length: usize,
    max_time_taken: f64,
    random_item_frequency: f64,
}

#[derive(Deserialize)]
struct ModelFile {
    params: RawEngineParams,
}

#[derive(Deserialize)]
struct ThetaSnapshot {
    num_abilities: usize,
    #[serde(rename = "W_correct")]
    w_correct: Vec<Vec<f64>>,
    #[serde(rename = "W_time")]
    w_time: Vec<Vec<f64>>,
    sigma_time: Vec<f64>,
}

#[derive(Deserialize)]
struct ParameterSnapshot {
    theta: ThetaSnapshot,
    #[serde(alias = "exercise_index")]
    exercise_ind_dict: BTreeMap<String, usize>,
    #[serde(default)]
    max_length: Option<usize>,
    #[serde(default)]
    max_time_taken: Option<f64>,
    #[serde(default)]
    random_item_frequency: Option<f64>,
}

impl ParameterSet {
    pub fn new(
        parameters: MirtParameters,
        exercise_index: BTreeMap<String, usize>,
        max_length: usize,
        max_time_taken: f64,
        random_item_frequency: f64,
    ) -> Result<Self> {
        if exercise_index.is_empty() {
            return Err(EngineError::invalid("exercise_index is empty"));
        }
        if parameters.num_abilities() == 0 {
            return Err(EngineError::invalid("num_abilities must be positive"));
        }
        if parameters.num_exercises() != exercise_index.len() {
            return Err(EngineError::invalid(format!(
                "parameters cover {} exercises but exercise_index has {}",
                parameters.num_exercises(),
                exercise_index.len()
            )));
        }

        let mut seen = HashSet::with_capacity(exercise_index.len());
        for (name, &row) in &exercise_index {
            if row >= exercise_index.len() || !seen.insert(row) {
                return Err(EngineError::invalid(format!(
                    "exercise {name} has out of range or duplicate row {row}"
                )));
            }
        }

        if max_length == 0 {
            return Err(EngineError::invalid("max_length must be positive"));
        }
        if !max_time_taken.is_finite() || max_time_taken <= 0.0 {
            return Err(EngineError::invalid("max_time_taken must be a positive number"));
        }
        if !(0.0..=1.0).contains(&random_item_frequency) {
            return Err(EngineError::invalid("random_item_frequency must be within [0, 1]"));
        }
        if has_invalid_values(&parameters.flat()) {
            return Err(EngineError::invalid("parameters contain NaN or infinite values"));
        }

        Ok(Self {
            parameters,
            exercise_index,
            max_length,
            max_time_taken,
            random_item_frequency,
        })
    }

    /// Live entry point: validate then normalize
    pub fn from_params(raw: RawEngineParams) -> Result<Self> {
        Self::from_validated(validate_params(raw)?)
    }

    pub fn from_validated(validated: ValidatedParams) -> Result<Self> {
        let num_exercises = validated.exercise_index.len();
        let parameters = match &validated.format {
            ParamsFormat::Current {
                theta_flat,
                num_abilities,
            } => MirtParameters::from_flat(*num_abilities, num_exercises, theta_flat)?,
            ParamsFormat::Legacy { couplings } => MirtParameters::from_couplings(couplings)?,
        };

        Self::new(
            parameters,
            validated.exercise_index,
            validated.max_length,
            validated.max_time_taken.unwrap_or(DEFAULT_MAX_TIME_TAKEN),
            validated
                .random_item_frequency
                .unwrap_or(DEFAULT_RANDOM_ITEM_FREQUENCY),
        )
    }

    /// Reads a `{ "params": { ... } }` model file
    pub fn from_model_reader<R: Read>(reader: R) -> Result<Self> {
        let model: ModelFile = serde_json::from_reader(reader)?;
        Self::from_params(model.params)
    }

    pub fn from_model_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_model_reader(BufReader::new(file))
    }

    /// Offline entry point: a persisted snapshot of fitted parameters.
    ///
    /// `max_length` falls back to [`DEFAULT_MAX_LENGTH`].
    pub fn from_snapshot<R: Read>(reader: R) -> Result<Self> {
        let snapshot: ParameterSnapshot = serde_json::from_reader(reader)?;
        let theta = snapshot.theta;
        let parameters = MirtParameters::from_rows(
            theta.num_abilities,
            &theta.w_correct,
            &theta.w_time,
            &theta.sigma_time,
        )?;

        Self::new(
            parameters,
            snapshot.exercise_ind_dict,
            snapshot.max_length.unwrap_or(DEFAULT_MAX_LENGTH),
            snapshot.max_time_taken.unwrap_or(DEFAULT_MAX_TIME_TAKEN),
            snapshot
                .random_item_frequency
                .unwrap_or(DEFAULT_RANDOM_ITEM_FREQUENCY),
        )
    }

    pub fn from_snapshot_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_snapshot(BufReader::new(file))
    }

    /// Copy with a different random item frequency
    pub fn with_random_item_frequency(mut self, frequency: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&frequency) {
            return Err(EngineError::invalid("random_item_frequency must be within [0, 1]"));
        }
        self.random_item_frequency = frequency;
        Ok(self)
    }

    pub fn parameters(&self) -> &MirtParameters {
        &self.parameters
    }

    pub fn num_abilities(&self) -> usize {
        self.parameters.num_abilities()
    }

    pub fn num_exercises(&self) -> usize {
        self.exercise_index.len()
    }

    pub fn exercise_index(&self) -> &BTreeMap<String, usize> {
        &self.exercise_index
    }

    /// Known exercise names in lexicographic order
    pub fn exercises(&self) -> impl Iterator<Item = &str> + '_ {
        self.exercise_index.keys().map(String::as_str)
    }

    pub fn contains(&self, exercise: &str) -> bool {
        self.exercise_index.contains_key(exercise)
    }

    pub fn exercise_row(&self, exercise: &str) -> Result<usize> {
        self.exercise_index
            .get(exercise)
            .copied()
            .ok_or_else(|| EngineError::UnknownExercise(exercise.to_string()))
    }

    pub fn correct_row(&self, exercise: &str) -> Result<ItemRow<'_>> {
        let row = self.exercise_row(exercise)?;
        Ok(self.parameters.correct_row(row))
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn max_time_taken(&self) -> f64 {
        self.max_time_taken
    }

    pub fn random_item_frequency(&self) -> f64 {
        self.random_item_frequency
    }
}
