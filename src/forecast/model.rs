//! Fitted model representation
//!
//! A [`FittedModel`] is immutable once registered. Its [`ModelKind`] is the
//! tagged variant callers see; [`ModelParameters`] holds the fitted numbers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::diagnostics::Diagnostics;
use crate::error::{EngineError, Result};
use crate::models::{ModelId, Period, SeriesKey};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelKind {
    Linear,
    Polynomial { order: usize },
    ExponentialSmoothing { alpha: f64 },
    /// Combination of already-registered models, resolved by the forecaster.
    Ensemble { members: Vec<ModelId> },
}

impl ModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Polynomial { .. } => "polynomial",
            Self::ExponentialSmoothing { .. } => "exponential_smoothing",
            Self::Ensemble { .. } => "ensemble",
        }
    }

    /// Human-readable description.
    pub fn description(&self) -> String {
        match self {
            Self::Linear => "linear regression".to_string(),
            Self::Polynomial { order } => format!("polynomial regression (order {})", order),
            Self::ExponentialSmoothing { alpha } => {
                format!("exponential smoothing (alpha {:.2})", alpha)
            }
            Self::Ensemble { members } => format!("ensemble of {} models", members.len()),
        }
    }

    /// Rank used to prefer simpler models on ties.
    pub fn complexity(&self) -> usize {
        match self {
            Self::Linear => 1,
            Self::ExponentialSmoothing { .. } => 2,
            Self::Polynomial { order } => 1 + *order,
            Self::Ensemble { members } => 10 + members.len(),
        }
    }
}

/// Model family requested by name in a training payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    Linear,
    Polynomial,
    ExponentialSmoothing,
    Ensemble,
}

impl std::str::FromStr for ModelFamily {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "linear" | "linear_regression" => Ok(Self::Linear),
            "polynomial" | "polynomial_regression" => Ok(Self::Polynomial),
            "exponential_smoothing" | "exponential" | "ses" => Ok(Self::ExponentialSmoothing),
            "ensemble" => Ok(Self::Ensemble),
            _ => Err(EngineError::UnsupportedModel(s.to_string())),
        }
    }
}

/// Fitted coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelParameters {
    Linear { intercept: f64, slope: f64 },
    /// Coefficients in ascending order over `t / time_scale`.
    Polynomial { coefficients: Vec<f64>, time_scale: f64 },
    ExponentialSmoothing { level: f64 },
    /// Normalized member weights, same order as `ModelKind::Ensemble::members`.
    Ensemble { weights: Vec<f64> },
}

impl ModelParameters {
    /// Evaluate at time index `t`. Ensembles need the registry and return `None`.
    pub fn evaluate(&self, t: f64) -> Option<f64> {
        match self {
            Self::Linear { intercept, slope } => Some(intercept + slope * t),
            Self::Polynomial {
                coefficients,
                time_scale,
            } => {
                let x = t / time_scale;
                // Horner
                Some(coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c))
            }
            Self::ExponentialSmoothing { level } => Some(*level),
            Self::Ensemble { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPerformance {
    pub r2: f64,
    pub mae: f64,
    /// Standard deviation of in-sample residuals, drives prediction bands.
    pub residual_std_dev: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FittedModel {
    pub id: ModelId,
    pub kind: ModelKind,
    pub parameters: ModelParameters,
    pub performance: ModelPerformance,
    pub trained_at: DateTime<Utc>,
    /// Observations in the training window; time index of the last one is `len - 1`.
    pub training_len: usize,
    pub last_period: Option<Period>,
    pub series: Option<SeriesKey>,
    /// Fingerprint of the training series, for reuse lookups.
    #[serde(skip)]
    pub fingerprint: Option<u64>,
    /// Fallbacks taken while fitting.
    #[serde(default)]
    pub notes: Diagnostics,
}

impl FittedModel {
    pub fn is_ensemble(&self) -> bool {
        matches!(self.kind, ModelKind::Ensemble { .. })
    }
}
