//! Simple exponential smoothing
//!
//! Recurrence `S_t = α·y_t + (1 - α)·S_{t-1}` with `S_0 = y_0`. The in-sample
//! fit is the one-step-ahead prediction `S_{t-1}` for `y_t`; forecasts are
//! flat at the final level.

use crate::diagnostics::Diagnostics;
use crate::error::{EngineError, Result};
use crate::forecast::model::ModelParameters;
use crate::forecast::regression::{performance, Fit};

/// Smoothed levels `S_0..S_{n-1}`.
pub fn smooth(values: &[f64], alpha: f64) -> Vec<f64> {
    let mut levels = Vec::with_capacity(values.len());
    let mut level = match values.first() {
        Some(&v) => v,
        None => return levels,
    };
    levels.push(level);
    for &y in &values[1..] {
        level = alpha * y + (1.0 - alpha) * level;
        levels.push(level);
    }
    levels
}

/// One-step-ahead mean squared error for `alpha`.
pub fn one_step_mse(values: &[f64], alpha: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let levels = smooth(values, alpha);
    let sse: f64 = values[1..]
        .iter()
        .zip(&levels[..levels.len() - 1])
        .map(|(y, prev)| (y - prev).powi(2))
        .sum();
    sse / (values.len() - 1) as f64
}

/// Alpha from `grid` with the lowest one-step MSE. First wins on ties.
pub fn select_alpha(values: &[f64], grid: &[f64]) -> f64 {
    let mut best_alpha = 0.5;
    let mut best_mse = f64::MAX;
    for &alpha in grid {
        if !(alpha > 0.0 && alpha <= 1.0) {
            continue;
        }
        let mse = one_step_mse(values, alpha);
        if mse < best_mse {
            best_mse = mse;
            best_alpha = alpha;
        }
    }
    best_alpha
}

/// Fit with a supplied alpha, or the best alpha from `grid`.
pub fn fit_exponential_smoothing(values: &[f64], alpha: Option<f64>, grid: &[f64]) -> Result<(Fit, f64)> {
    let alpha = match alpha {
        Some(a) if a > 0.0 && a <= 1.0 => a,
        Some(a) => {
            return Err(EngineError::validation(format!(
                "smoothing factor {} outside (0, 1]",
                a
            )))
        }
        None => select_alpha(values, grid),
    };

    let levels = smooth(values, alpha);
    let level = levels.last().copied().unwrap_or(0.0);

    // y_0 is predicted by S_0 = y_0 itself; score from t = 1 onwards
    let fitted: Vec<f64> = levels[..levels.len().saturating_sub(1)].to_vec();
    let actual = if values.len() > 1 { &values[1..] } else { values };

    Ok((
        Fit {
            parameters: ModelParameters::ExponentialSmoothing { level },
            performance: performance(actual, &fitted, 1),
            fitted,
            notes: Diagnostics::new(),
        },
        alpha,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recurrence_matches_definition() {
        let levels = smooth(&[10.0, 20.0, 30.0], 0.5);
        assert_eq!(levels, vec![10.0, 15.0, 22.5]);
    }

    #[test]
    fn test_alpha_search_prefers_responsive_alpha_for_trend() {
        let values: Vec<f64> = (0..12).map(|t| 10.0 + 3.0 * t as f64).collect();
        let grid: Vec<f64> = (1..=9).map(|i| i as f64 / 10.0).collect();
        assert_eq!(select_alpha(&values, &grid), 0.9);
    }

    #[test]
    fn test_alpha_search_prefers_smoothing_for_noise() {
        let values = vec![10.0, 14.0, 10.0, 14.0, 10.0, 14.0, 10.0, 14.0];
        let grid: Vec<f64> = (1..=9).map(|i| i as f64 / 10.0).collect();
        assert!(select_alpha(&values, &grid) <= 0.5);
    }

    #[test]
    fn test_invalid_alpha_rejected() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert!(fit_exponential_smoothing(&values, Some(0.0), &[]).is_err());
        assert!(fit_exponential_smoothing(&values, Some(1.5), &[]).is_err());
        let (fit, alpha) = fit_exponential_smoothing(&values, Some(1.0), &[]).unwrap();
        assert_eq!(alpha, 1.0);
        assert_eq!(fit.parameters, ModelParameters::ExponentialSmoothing { level: 6.0 });
    }
}
