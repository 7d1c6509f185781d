//! Data Sanitization
//!
//! Numerical stability utilities.
//!
//! Functions:
//! - Response time clamping
//! - Ability vector sanitization
//! - Time noise scale flooring

use crate::types::{EPSILON, MIN_TIME_TAKEN};

/// Largest absolute ability value carried between sampling runs
pub const MAX_ABILITY_ABS: f64 = 50.0;

/// Checks whether a slice contains NaN or infinite values
pub fn has_invalid_values(arr: &[f64]) -> bool {
    arr.iter().any(|&x| x.is_nan() || x.is_infinite())
}

/// Clamps a response time into `[1, max_time_taken]`.
///
/// Missing and non-finite values become the lower bound.
pub fn sanitize_time_taken(time_taken: Option<f64>, max_time_taken: f64) -> f64 {
    let upper = if max_time_taken.is_finite() {
        max_time_taken.max(MIN_TIME_TAKEN)
    } else {
        MIN_TIME_TAKEN
    };

    match time_taken {
        Some(t) if t.is_finite() => t.clamp(MIN_TIME_TAKEN, upper),
        _ => MIN_TIME_TAKEN,
    }
}

/// Log of the clamped response time, always finite and `>= 0`
pub fn log_time_taken(time_taken: Option<f64>, max_time_taken: f64) -> f64 {
    sanitize_time_taken(time_taken, max_time_taken).ln()
}

/// Replaces invalid entries with 0 and bounds the rest
pub fn sanitize_ability_vector(abilities: &mut [f64]) {
    for val in abilities.iter_mut() {
        if val.is_nan() || val.is_infinite() {
            *val = 0.0;
        } else {
            *val = val.clamp(-MAX_ABILITY_ABS, MAX_ABILITY_ABS);
        }
    }
}

/// Noise scale of the log response time, floored away from zero
pub fn sanitize_sigma(sigma: f64) -> f64 {
    if sigma.is_finite() {
        sigma.abs().max(EPSILON)
    } else {
        1.0
    }
}
