//! Standardized forecast residuals
//!
//! Residuals `estimate - actual` are grouped by phase within the period.
//! Each group is standardized against its own mean and sample standard
//! deviation, so a value of 3 means "three deviations further from the
//! model than usual for this time of the period".

use crate::error::{QueryError, Result};

/// Standardize `estimate - correct` against the finite residuals
///
/// Slots where either input is NaN or infinite are excluded from the
/// statistics and produce a non-finite result themselves.
pub fn standard_deviations_from_expected(correct: &[f64], estimate: &[f64]) -> Result<Vec<f64>> {
    if correct.len() != estimate.len() {
        return Err(QueryError::assertion(
            "p-value calculation requires two lists of equal size",
        ));
    }
    let differences: Vec<f64> = correct
        .iter()
        .zip(estimate)
        .filter(|(c, e)| c.is_finite() && e.is_finite())
        .map(|(c, e)| e - c)
        .collect();
    let count = differences.len() as f64;
    let mean = differences.iter().sum::<f64>() / count;
    let variance = differences.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / (count - 1.0);
    let stddev = variance.sqrt();

    Ok(correct
        .iter()
        .zip(estimate)
        .map(|(c, e)| (e - c - mean) / stddev)
        .collect())
}

/// [`standard_deviations_from_expected`] applied to each phase of `period`
pub fn periodic_standard_deviations(correct: &[f64], estimate: &[f64], period: usize) -> Result<Vec<f64>> {
    if period == 0 {
        return Err(QueryError::invalid_argument("Period must be strictly positive"));
    }
    if correct.len() != estimate.len() {
        return Err(QueryError::assertion(
            "to estimate anomaly values, the ground truth and estimate slices must be the same length",
        ));
    }
    let mut answer = vec![f64::NAN; correct.len()];
    for phase in 0..period.min(correct.len()) {
        let indices: Vec<usize> = (phase..correct.len()).step_by(period).collect();
        let c: Vec<f64> = indices.iter().map(|&i| correct[i]).collect();
        let e: Vec<f64> = indices.iter().map(|&i| estimate[i]).collect();
        for (i, value) in indices.into_iter().zip(standard_deviations_from_expected(&c, &e)?) {
            answer[i] = value;
        }
    }
    Ok(answer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standardized_residuals() {
        // Residuals 1, 2, 3: mean 2, sample deviation 1
        let result = standard_deviations_from_expected(&[0.0, 0.0, 0.0, f64::NAN], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(&result[..3], &[-1.0, 0.0, 1.0]);
        assert!(result[3].is_nan());
    }

    #[test]
    fn test_periodic_groups_by_phase() {
        let correct = [0.0, 10.0, 0.0, 10.0, 0.0, 10.0];
        let estimate = [1.0, 10.0, 2.0, 20.0, 3.0, 30.0];
        let result = periodic_standard_deviations(&correct, &estimate, 2).unwrap();
        assert_eq!(result, vec![-1.0, -1.0, 0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(periodic_standard_deviations(&[1.0], &[1.0, 2.0], 1).is_err());
        assert!(periodic_standard_deviations(&[1.0], &[1.0], 0).is_err());
    }
}
