//! Least-squares regression over the time index
//!
//! - Linear: normal equations `(XᵀX)β = Xᵀy`, LU solve
//! - Polynomial: SVD solve on `t / (n - 1)` to keep the Vandermonde matrix
//!   well conditioned
//!
//! Singular systems fall back to the mean model with a diagnostic note.

use nalgebra::{DMatrix, DVector};
use statrs::statistics::Statistics;

use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::forecast::model::{ModelParameters, ModelPerformance};

/// Result of fitting one model to a value vector.
#[derive(Debug, Clone)]
pub struct Fit {
    pub parameters: ModelParameters,
    /// In-sample fitted values aligned with the training data.
    pub fitted: Vec<f64>,
    pub performance: ModelPerformance,
    pub notes: Diagnostics,
}

/// Goodness-of-fit metrics for `fitted` against `actual`.
pub fn performance(actual: &[f64], fitted: &[f64], n_params: usize) -> ModelPerformance {
    let n = actual.len().min(fitted.len());
    if n == 0 {
        return ModelPerformance {
            r2: 0.0,
            mae: 0.0,
            residual_std_dev: 0.0,
        };
    }
    let actual = &actual[..n];
    let residuals: Vec<f64> = actual.iter().zip(fitted).map(|(y, f)| y - f).collect();

    let ss_res: f64 = residuals.iter().map(|r| r * r).sum();
    let mean = actual.iter().mean();
    let ss_tot: f64 = actual.iter().map(|y| (y - mean).powi(2)).sum();
    let r2 = if ss_tot > f64::EPSILON {
        1.0 - ss_res / ss_tot
    } else if ss_res <= 1e-12 {
        1.0
    } else {
        0.0
    };

    let mae = residuals.iter().map(|r| r.abs()).sum::<f64>() / n as f64;
    let dof = n.saturating_sub(n_params).max(1);
    let residual_std_dev = (ss_res / dof as f64).sqrt();

    ModelPerformance {
        r2: if r2.is_finite() { r2 } else { 0.0 },
        mae,
        residual_std_dev,
    }
}

fn mean_model(values: &[f64], notes: Diagnostics) -> Fit {
    let mean = values.iter().mean();
    let fitted = vec![mean; values.len()];
    Fit {
        parameters: ModelParameters::Linear {
            intercept: mean,
            slope: 0.0,
        },
        performance: performance(values, &fitted, 1),
        fitted,
        notes,
    }
}

/// Ordinary least squares `value = a + b·t` over `t = 0..n-1`.
pub fn fit_linear(values: &[f64], subject: &str) -> Fit {
    let n = values.len();
    let mut notes = Diagnostics::new();

    if values.iter().variance().abs() < f64::EPSILON || n < 2 {
        notes.push(
            DiagnosticKind::SingularMatrix,
            subject,
            "constant series, using mean as intercept with zero slope",
        );
        return mean_model(values, notes);
    }

    let x = DMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { i as f64 });
    let y = DVector::from_column_slice(values);
    let xt = x.transpose();
    let xtx = &xt * &x;
    let xty = &xt * &y;

    let beta = xtx.lu().solve(&xty).filter(|b| b.iter().all(|v| v.is_finite()));
    let beta = match beta {
        Some(b) => b,
        None => {
            notes.push(
                DiagnosticKind::SingularMatrix,
                subject,
                "singular normal equations, using mean as intercept with zero slope",
            );
            return mean_model(values, notes);
        }
    };

    let (intercept, slope) = (beta[0], beta[1]);
    let fitted: Vec<f64> = (0..n).map(|t| intercept + slope * t as f64).collect();
    Fit {
        parameters: ModelParameters::Linear { intercept, slope },
        performance: performance(values, &fitted, 2),
        fitted,
        notes,
    }
}

/// Highest order that keeps `n > order + 1`.
pub fn clamp_order(order: usize, n: usize) -> usize {
    order.max(1).min(n.saturating_sub(2).max(1))
}

/// Least-squares polynomial of degree `order` (clamped to the data size).
pub fn fit_polynomial(values: &[f64], order: usize, subject: &str) -> (Fit, usize) {
    let n = values.len();
    let order = clamp_order(order, n);
    let mut notes = Diagnostics::new();

    let time_scale = (n.saturating_sub(1)).max(1) as f64;
    let x = DMatrix::from_fn(n, order + 1, |i, j| (i as f64 / time_scale).powi(j as i32));
    let y = DVector::from_column_slice(values);

    let solved = x
        .svd(true, true)
        .solve(&y, 1e-12)
        .ok()
        .filter(|c| c.iter().all(|v| v.is_finite()));

    let coefficients: Vec<f64> = match solved {
        Some(c) => c.iter().copied().collect(),
        None => {
            notes.push(
                DiagnosticKind::SingularMatrix,
                subject,
                format!("polynomial order {} fit failed, using mean model", order),
            );
            return (mean_model(values, notes), order);
        }
    };

    let parameters = ModelParameters::Polynomial {
        coefficients,
        time_scale,
    };
    let fitted: Vec<f64> = (0..n)
        .map(|t| parameters.evaluate(t as f64).unwrap_or(0.0))
        .collect();
    (
        Fit {
            performance: performance(values, &fitted, order + 1),
            parameters,
            fitted,
            notes,
        },
        order,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_fit_recovers_exact_line() {
        let values: Vec<f64> = (0..8).map(|t| 50.0 + 5.0 * t as f64).collect();
        let fit = fit_linear(&values, "oee");
        match fit.parameters {
            ModelParameters::Linear { intercept, slope } => {
                assert!((intercept - 50.0).abs() < 1e-9);
                assert!((slope - 5.0).abs() < 1e-9);
            }
            other => panic!("unexpected parameters {:?}", other),
        }
        assert!(fit.performance.r2 > 0.999_999);
        assert!(fit.performance.mae < 1e-9);
        assert!(fit.notes.is_empty());
    }

    #[test]
    fn test_constant_series_falls_back_to_mean() {
        let values = vec![42.0; 7];
        let fit = fit_linear(&values, "scrap_rate");
        assert_eq!(
            fit.parameters,
            ModelParameters::Linear {
                intercept: 42.0,
                slope: 0.0
            }
        );
        assert!(fit.notes.has_kind(DiagnosticKind::SingularMatrix));
        assert_eq!(fit.performance.r2, 1.0);
    }

    #[test]
    fn test_polynomial_fit_recovers_quadratic() {
        let values: Vec<f64> = (0..10).map(|t| 3.0 + 0.5 * (t * t) as f64).collect();
        let (fit, order) = fit_polynomial(&values, 2, "throughput");
        assert_eq!(order, 2);
        for (actual, fitted) in values.iter().zip(&fit.fitted) {
            assert!((actual - fitted).abs() < 1e-6);
        }
        // Extrapolation follows the curve
        let next = fit.parameters.evaluate(10.0).unwrap();
        assert!((next - 53.0).abs() < 1e-5);
    }

    #[test]
    fn test_polynomial_order_is_clamped() {
        assert_eq!(clamp_order(5, 6), 4);
        assert_eq!(clamp_order(2, 6), 2);
        assert_eq!(clamp_order(0, 6), 1);
        let values = vec![1.0, 2.0, 4.0, 3.0, 5.0, 6.0];
        let (_, order) = fit_polynomial(&values, 9, "kpi");
        assert!(values.len() > order + 1);
    }

    #[test]
    fn test_performance_metrics() {
        let actual = [1.0, 2.0, 3.0, 4.0];
        let fitted = [1.5, 2.0, 3.0, 3.5];
        let perf = performance(&actual, &fitted, 2);
        assert!((perf.mae - 0.25).abs() < 1e-12);
        assert!(perf.r2 < 1.0 && perf.r2 > 0.8);
        assert!((perf.residual_std_dev - (0.5f64 / 2.0).sqrt()).abs() < 1e-12);
    }
}
