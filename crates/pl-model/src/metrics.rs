//! Classification scores reported per trial.

use pl_types::{validation_error, PlResult};

fn check_lengths(predicted: &[usize], truth: &[usize]) -> PlResult<()> {
    if predicted.len() != truth.len() {
        return Err(validation_error!(
            "prediction count {} does not match label count {}",
            predicted.len(),
            truth.len()
        ));
    }
    if truth.is_empty() {
        return Err(validation_error!("cannot score an empty prediction set"));
    }
    Ok(())
}

/// Fraction of predictions equal to the true label.
pub fn accuracy(predicted: &[usize], truth: &[usize]) -> PlResult<f64> {
    check_lengths(predicted, truth)?;
    let correct = predicted
        .iter()
        .zip(truth)
        .filter(|(p, t)| p == t)
        .count();
    Ok(correct as f64 / truth.len() as f64)
}

/// RMSE between predicted and true class indices, treated as numbers.
///
/// Only meaningful as an auxiliary signal; the champion comparison uses
/// accuracy.
pub fn root_mean_squared_error(predicted: &[usize], truth: &[usize]) -> PlResult<f64> {
    check_lengths(predicted, truth)?;
    let sum_sq: f64 = predicted
        .iter()
        .zip(truth)
        .map(|(p, t)| {
            let d = *p as f64 - *t as f64;
            d * d
        })
        .sum();
    Ok((sum_sq / truth.len() as f64).sqrt())
}
