//! Response Predictor
//!
//! Multidimensional logistic model relating an ability vector to the
//! probability of answering an exercise correctly:
//!
//! ```text
//! p = sigmoid(a · θ + b)
//! ```
//!
//! and the Fisher information used to rank candidate exercises.

use crate::params::ItemRow;
use crate::types::MAX_LOGIT;

/// Dot product over the shared prefix of two slices
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Logistic function with the argument clamped to `[-MAX_LOGIT, MAX_LOGIT]`,
/// so the result is strictly inside (0, 1).
pub fn sigmoid(z: f64) -> f64 {
    let z = if z.is_nan() {
        0.0
    } else {
        z.clamp(-MAX_LOGIT, MAX_LOGIT)
    };
    1.0 / (1.0 + (-z).exp())
}

/// Linear predictor `a · θ + b` for one item row
pub fn logit(abilities: &[f64], row: ItemRow<'_>) -> f64 {
    dot(row.discrimination(), abilities) + row.bias()
}

/// Probability of a correct response on `row` at `abilities`
pub fn probability_correct(abilities: &[f64], row: ItemRow<'_>) -> f64 {
    sigmoid(logit(abilities, row))
}

/// Log-probability of the observed outcome, always finite
pub fn log_likelihood_correct(abilities: &[f64], row: ItemRow<'_>, correct: bool) -> f64 {
    let p = probability_correct(abilities, row);
    if correct {
        p.ln()
    } else {
        (1.0 - p).ln()
    }
}

/// Fisher information of `row` at `abilities`: `Σ a² · p · (1 − p)`.
///
/// Exact for a single ability. With several abilities the squared
/// discrimination norm stands in for the information matrix, so this is an
/// approximation kept for compatibility with fitted models in use.
pub fn fisher_information(abilities: &[f64], row: ItemRow<'_>) -> f64 {
    let p = probability_correct(abilities, row);
    let sensitivity: f64 = row.discrimination().iter().map(|a| a * a).sum();
    sensitivity * p * (1.0 - p)
}
