//! Classical additive seasonal decomposition
//!
//! - Trend: centered moving average of width `period` (2×`period` weighting
//!   when `period` is even), undefined where the window does not fit
//! - Seasonal: per-position mean of the defined detrended values
//! - Residual: detrended − seasonal
//!
//! `trend[i] + seasonal[i] + residual[i] == original[i]` at every index where
//! trend is defined.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::config::ForecastConfig;
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::error::{EngineError, Result};
use crate::models::{KpiSeries, Period};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonalDecomposition {
    pub period: usize,
    pub periods: Vec<Period>,
    pub original: Vec<f64>,
    /// `None` at the edges.
    pub trend: Vec<Option<f64>>,
    pub seasonal: Vec<f64>,
    /// One index per position within the cycle.
    pub seasonal_indices: Vec<f64>,
    /// `None` wherever trend is `None`.
    pub residual: Vec<Option<f64>>,
    pub seasonal_strength: f64,
    #[serde(default)]
    pub notes: Diagnostics,
}

impl SeasonalDecomposition {
    /// Seasonal index for time index `t`, including `t` beyond the data.
    pub fn index_at(&self, t: usize) -> f64 {
        self.seasonal_indices
            .get(t % self.period.max(1))
            .copied()
            .unwrap_or(0.0)
    }

    /// Indices where the centered window fits.
    pub fn interior(&self) -> impl Iterator<Item = usize> + '_ {
        self.trend
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.map(|_| i))
    }
}

/// Centered moving average. Even widths use half weights at both ends.
pub fn centered_moving_average(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let n = values.len();
    let half = period / 2;
    let mut trend = vec![None; n];
    if period == 0 || n < 2 * half + 1 {
        return trend;
    }

    for (i, slot) in trend.iter_mut().enumerate().take(n - half).skip(half) {
        let window = &values[i - half..=i + half];
        let avg = if period % 2 == 0 {
            let inner: f64 = window[1..window.len() - 1].iter().sum();
            (0.5 * window[0] + inner + 0.5 * window[window.len() - 1]) / period as f64
        } else {
            window.iter().sum::<f64>() / period as f64
        };
        *slot = Some(avg);
    }
    trend
}

pub(crate) fn decompose_values(values: &[f64], period: usize, subject: &str) -> Result<SeasonalDecomposition> {
    if period < 2 {
        return Err(EngineError::validation(format!(
            "seasonal period must be at least 2, got {}",
            period
        )));
    }
    if values.len() < 2 * period {
        return Err(EngineError::insufficient(
            "seasonal decomposition",
            2 * period,
            values.len(),
        ));
    }

    let mut notes = Diagnostics::new();
    let trend = centered_moving_average(values, period);
    let detrended: Vec<Option<f64>> = values
        .iter()
        .zip(&trend)
        .map(|(y, t)| t.map(|t| y - t))
        .collect();

    let mut sums = vec![0.0; period];
    let mut counts = vec![0usize; period];
    for (i, d) in detrended.iter().enumerate() {
        if let Some(d) = d {
            sums[i % period] += d;
            counts[i % period] += 1;
        }
    }
    let seasonal_indices: Vec<f64> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &c)| if c > 0 { s / c as f64 } else { 0.0 })
        .collect();

    let seasonal: Vec<f64> = (0..values.len()).map(|i| seasonal_indices[i % period]).collect();
    let residual: Vec<Option<f64>> = detrended
        .iter()
        .zip(&seasonal)
        .map(|(d, s)| d.map(|d| d - s))
        .collect();

    let defined_detrended: Vec<f64> = detrended.iter().flatten().copied().collect();
    let defined_residual: Vec<f64> = residual.iter().flatten().copied().collect();
    let var_detrended = defined_detrended.iter().variance();
    let var_residual = defined_residual.iter().variance();

    let seasonal_strength = if !var_detrended.is_finite() || var_detrended <= f64::EPSILON {
        notes.push(
            DiagnosticKind::ZeroVariance,
            subject,
            "detrended series has no variance, seasonal strength reported as 0",
        );
        0.0
    } else {
        let raw = 1.0 - var_residual / var_detrended;
        notes.guard(raw, 0.0, 1.0, subject)
    };

    Ok(SeasonalDecomposition {
        period,
        periods: Vec::new(),
        original: values.to_vec(),
        trend,
        seasonal,
        seasonal_indices,
        residual,
        seasonal_strength,
        notes,
    })
}

/// Decompose `series` with the given cycle length.
pub fn perform_seasonal_decomposition(series: &KpiSeries, period: usize) -> Result<SeasonalDecomposition> {
    let mut decomposition = decompose_values(&series.values(), period, series.kpi_id())?;
    decomposition.periods = series.points().iter().map(|p| p.period).collect();
    tracing::debug!(
        kpi = %series.key(),
        period,
        strength = decomposition.seasonal_strength,
        "Seasonal decomposition complete"
    );
    Ok(decomposition)
}

/// Decomposer bound to a configured default cycle length.
#[derive(Debug, Clone)]
pub struct SeasonalDecomposer {
    default_period: usize,
}

impl SeasonalDecomposer {
    pub fn new(config: &ForecastConfig) -> Self {
        Self {
            default_period: config.seasonal_period,
        }
    }

    pub fn default_period(&self) -> usize {
        self.default_period
    }

    pub fn decompose(&self, series: &KpiSeries, period: Option<usize>) -> Result<SeasonalDecomposition> {
        perform_seasonal_decomposition(series, period.unwrap_or(self.default_period))
    }
}

impl Default for SeasonalDecomposer {
    fn default() -> Self {
        Self::new(&ForecastConfig::default())
    }
}
