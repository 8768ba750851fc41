//! Time series forecaster
//!
//! Trains regression and smoothing models on a single KPI series, registers
//! them in a caller-owned [`ModelRegistry`], and produces point predictions
//! and multi-period forecasts with confidence bands.
//!
//! - Training needs at least `min_training_points` observations
//! - Seasonal forecasts need `min_seasonal_points` and two full cycles
//! - Bands are `± z·σ_residual`, widened by `√h` in multi-period forecasts

use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::sync::Arc;

use crate::config::ForecastConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{EngineError, Result};
use crate::forecast::decomposition::{decompose_values, SeasonalDecomposition};
use crate::forecast::model::{FittedModel, ModelFamily, ModelKind, ModelParameters, ModelPerformance};
use crate::forecast::registry::ModelRegistry;
use crate::forecast::regression::{clamp_order, fit_linear, fit_polynomial, Fit};
use crate::forecast::smoothing::fit_exponential_smoothing;
use crate::models::{KpiPoint, KpiSeries, ModelId, Period};

// =============================================================================
// REQUEST / RESPONSE TYPES
// =============================================================================

/// Prediction inputs for a registered model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionFeatures {
    /// Periods past the last training observation (0 = in-sample end).
    pub steps_ahead: u32,
    /// Overrides the configured band confidence.
    #[serde(default)]
    pub confidence_level: Option<f64>,
}

impl PredictionFeatures {
    pub fn steps(steps_ahead: u32) -> Self {
        Self {
            steps_ahead,
            confidence_level: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub model_id: ModelId,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
    pub confidence_level: f64,
    #[serde(default)]
    pub notes: Diagnostics,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastOptions {
    /// Add the seasonal index to every forecast point.
    #[serde(default)]
    pub seasonal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastPoint {
    pub period: Period,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Forecast {
    pub points: Vec<ForecastPoint>,
    pub methodology: String,
    /// Confidence level of the bands.
    pub confidence: f64,
    pub model_id: ModelId,
    pub performance: ModelPerformance,
    #[serde(default)]
    pub seasonal_strength: Option<f64>,
    #[serde(default)]
    pub notes: Diagnostics,
}

impl Forecast {
    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn last(&self) -> Option<&ForecastPoint> {
        self.points.last()
    }
}

/// String-keyed training payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingRequest {
    pub kind: String,
    #[serde(default)]
    pub series: Option<KpiSeries>,
    #[serde(default)]
    pub order: Option<usize>,
    #[serde(default)]
    pub alpha: Option<f64>,
    #[serde(default)]
    pub members: Vec<ModelId>,
}

/// Two-sided standard normal quantile for `confidence_level`.
pub fn z_score(confidence_level: f64) -> Result<f64> {
    if !(confidence_level > 0.0 && confidence_level < 1.0) {
        return Err(EngineError::validation(format!(
            "confidence level {} outside (0, 1)",
            confidence_level
        )));
    }
    let normal = Normal::new(0.0, 1.0).map_err(|e| EngineError::degeneracy(e.to_string()))?;
    Ok(normal.inverse_cdf((1.0 + confidence_level) / 2.0))
}

// =============================================================================
// FORECASTER
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct TimeSeriesForecaster {
    config: ForecastConfig,
}

impl TimeSeriesForecaster {
    pub fn new(config: ForecastConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    fn require_points(&self, series: &KpiSeries, operation: &'static str) -> Result<()> {
        if series.len() < self.config.min_training_points {
            return Err(EngineError::insufficient(
                operation,
                self.config.min_training_points,
                series.len(),
            ));
        }
        Ok(())
    }

    fn register(&self, registry: &ModelRegistry, series: &KpiSeries, kind: ModelKind, fit: Fit) -> ModelId {
        let model = FittedModel {
            id: ModelId::new(),
            parameters: fit.parameters,
            performance: fit.performance,
            trained_at: Utc::now(),
            training_len: series.len(),
            last_period: series.last_period(),
            series: Some(series.key()),
            fingerprint: Some(series.fingerprint()),
            notes: fit.notes,
            kind,
        };
        counter!("kpi_engine.models.trained", 1, "kind" => model.kind.name());
        tracing::debug!(
            model = %model.id,
            kind = model.kind.name(),
            series = %series.key(),
            r2 = model.performance.r2,
            mae = model.performance.mae,
            "Model trained"
        );
        registry.insert(model)
    }

    /// OLS `value = a + b·t`.
    pub fn train_linear_regression(&self, registry: &ModelRegistry, series: &KpiSeries) -> Result<ModelId> {
        self.require_points(series, "linear regression")?;
        let fit = fit_linear(&series.values(), series.kpi_id());
        Ok(self.register(registry, series, ModelKind::Linear, fit))
    }

    /// Least-squares polynomial; `order` is clamped so that `n > order + 1`.
    pub fn train_polynomial_regression(
        &self,
        registry: &ModelRegistry,
        series: &KpiSeries,
        order: usize,
    ) -> Result<ModelId> {
        if order == 0 {
            return Err(EngineError::validation("polynomial order must be at least 1"));
        }
        self.require_points(series, "polynomial regression")?;
        let (fit, order) = fit_polynomial(&series.values(), order, series.kpi_id());
        Ok(self.register(registry, series, ModelKind::Polynomial { order }, fit))
    }

    /// Simple exponential smoothing; grid-searches alpha when not supplied.
    pub fn train_exponential_smoothing(
        &self,
        registry: &ModelRegistry,
        series: &KpiSeries,
        alpha: Option<f64>,
    ) -> Result<ModelId> {
        self.require_points(series, "exponential smoothing")?;
        let (fit, alpha) = fit_exponential_smoothing(&series.values(), alpha, &self.config.alpha_grid)?;
        Ok(self.register(registry, series, ModelKind::ExponentialSmoothing { alpha }, fit))
    }

    /// Combine registered models, weighted by inverse in-sample MAE.
    pub fn train_ensemble(&self, registry: &ModelRegistry, members: &[ModelId]) -> Result<ModelId> {
        if members.is_empty() {
            return Err(EngineError::validation("ensemble needs at least one member model"));
        }
        let resolved: Vec<Arc<FittedModel>> = members
            .iter()
            .map(|id| registry.get(id))
            .collect::<Result<_>>()?;
        if let Some(nested) = resolved.iter().find(|m| m.is_ensemble()) {
            return Err(EngineError::validation(format!(
                "ensemble member {} is itself an ensemble",
                nested.id
            )));
        }

        let raw: Vec<f64> = resolved
            .iter()
            .map(|m| 1.0 / m.performance.mae.max(1e-9))
            .collect();
        let total: f64 = raw.iter().sum();
        let weights: Vec<f64> = raw.iter().map(|w| w / total).collect();

        let blend = |f: fn(&ModelPerformance) -> f64| -> f64 {
            resolved
                .iter()
                .zip(&weights)
                .map(|(m, w)| w * f(&m.performance))
                .sum()
        };
        let performance = ModelPerformance {
            r2: blend(|p| p.r2),
            mae: blend(|p| p.mae),
            residual_std_dev: blend(|p| p.residual_std_dev),
        };

        let first = &resolved[0];
        let same_series = resolved.iter().all(|m| m.series == first.series);
        let model = FittedModel {
            id: ModelId::new(),
            kind: ModelKind::Ensemble {
                members: members.to_vec(),
            },
            parameters: ModelParameters::Ensemble { weights },
            performance,
            trained_at: Utc::now(),
            training_len: first.training_len,
            last_period: first.last_period,
            series: if same_series { first.series.clone() } else { None },
            fingerprint: None,
            notes: Diagnostics::new(),
        };
        counter!("kpi_engine.models.trained", 1, "kind" => "ensemble");
        tracing::debug!(model = %model.id, members = members.len(), "Ensemble registered");
        Ok(registry.insert(model))
    }

    /// Dispatch a training payload by model name.
    pub fn train_by_name(&self, registry: &ModelRegistry, request: &TrainingRequest) -> Result<ModelId> {
        let family: ModelFamily = request.kind.parse()?;
        if family == ModelFamily::Ensemble {
            return self.train_ensemble(registry, &request.members);
        }
        let series = request
            .series
            .as_ref()
            .ok_or_else(|| EngineError::validation(format!("{} training needs a series", request.kind)))?;
        match family {
            ModelFamily::Linear => self.train_linear_regression(registry, series),
            ModelFamily::Polynomial => self.train_polynomial_regression(
                registry,
                series,
                request.order.unwrap_or(self.config.polynomial_order),
            ),
            ModelFamily::ExponentialSmoothing => {
                self.train_exponential_smoothing(registry, series, request.alpha)
            }
            ModelFamily::Ensemble => self.train_ensemble(registry, &request.members),
        }
    }

    fn point_value(&self, registry: &ModelRegistry, model: &FittedModel, steps_ahead: u32) -> Result<f64> {
        match (&model.kind, &model.parameters) {
            (ModelKind::Ensemble { members }, ModelParameters::Ensemble { weights }) => {
                let mut value = 0.0;
                for (id, w) in members.iter().zip(weights) {
                    let member = registry.get(id)?;
                    value += w * self.point_value(registry, &member, steps_ahead)?;
                }
                Ok(value)
            }
            (_, params) => {
                let t = model.training_len.saturating_sub(1) as f64 + steps_ahead as f64;
                params
                    .evaluate(t)
                    .ok_or_else(|| EngineError::degeneracy(format!("model {} has mismatched parameters", model.id)))
            }
        }
    }

    /// Evaluate a registered model `steps_ahead` periods past its training window.
    pub fn predict(
        &self,
        registry: &ModelRegistry,
        model_id: &ModelId,
        features: &PredictionFeatures,
    ) -> Result<Prediction> {
        let model = registry.get(model_id)?;
        let confidence_level = features
            .confidence_level
            .unwrap_or(self.config.confidence_level);
        let z = z_score(confidence_level)?;

        let mut notes = Diagnostics::new();
        let subject = model.id.to_string();
        let raw = self.point_value(registry, &model, features.steps_ahead)?;
        let value = notes.finite_or(raw, 0.0, &subject);
        let half_width = notes.finite_or(z * model.performance.residual_std_dev, 0.0, &subject);

        Ok(Prediction {
            model_id: model.id,
            value,
            lower: value - half_width,
            upper: value + half_width,
            confidence_level,
            notes,
        })
    }

    /// Candidate models for `series`, reusing registered fits with the same fingerprint.
    fn candidates(&self, registry: &ModelRegistry, series: &KpiSeries) -> Result<Vec<Arc<FittedModel>>> {
        let existing = registry.models_for_fingerprint(series.fingerprint());
        let order = clamp_order(self.config.polynomial_order, series.len());

        let find = |pred: &dyn Fn(&ModelKind) -> bool| existing.iter().find(|m| pred(&m.kind)).cloned();

        let linear = match find(&|k| matches!(k, ModelKind::Linear)) {
            Some(m) => m,
            None => registry.get(&self.train_linear_regression(registry, series)?)?,
        };
        let smoothing = match find(&|k| matches!(k, ModelKind::ExponentialSmoothing { .. })) {
            Some(m) => m,
            None => registry.get(&self.train_exponential_smoothing(registry, series, None)?)?,
        };
        let polynomial = match find(&|k| matches!(k, ModelKind::Polynomial { order: o } if *o == order)) {
            Some(m) => m,
            None => registry.get(&self.train_polynomial_regression(registry, series, order)?)?,
        };

        let mut candidates = vec![linear, smoothing, polynomial];
        candidates.sort_by_key(|m| m.kind.complexity());
        Ok(candidates)
    }

    /// Lowest MAE; a more complex model must beat the incumbent by the tolerance
    /// (relative above an MAE of 1, absolute below).
    fn select_best(&self, candidates: Vec<Arc<FittedModel>>) -> Option<Arc<FittedModel>> {
        let tolerance = self.config.selection_tolerance;
        candidates.into_iter().fold(None, |best, candidate| match best {
            None => Some(candidate),
            Some(best) => {
                let margin = tolerance * best.performance.mae.max(1.0);
                if candidate.performance.mae + margin < best.performance.mae {
                    Some(candidate)
                } else {
                    Some(best)
                }
            }
        })
    }

    /// Train (or reuse) the best-fitting model and extrapolate `periods_ahead` points.
    pub fn generate_forecast(
        &self,
        registry: &ModelRegistry,
        series: &KpiSeries,
        periods_ahead: usize,
        options: &ForecastOptions,
    ) -> Result<Forecast> {
        if periods_ahead == 0 {
            return Err(EngineError::validation("periodsAhead must be at least 1"));
        }
        let last_period = series
            .last_period()
            .ok_or_else(|| EngineError::insufficient("forecast", self.config.min_training_points, 0))?;

        let mut notes = Diagnostics::new();
        let (training, seasonal) = if options.seasonal {
            let period = self.config.seasonal_period;
            let required = self.config.min_seasonal_points.max(2 * period);
            if series.len() < required {
                return Err(EngineError::insufficient("seasonal forecast", required, series.len()));
            }
            let decomposition = decompose_values(&series.values(), period, series.kpi_id())?;
            notes.extend(decomposition.notes.clone());
            (deseasonalize(series, &decomposition)?, Some(decomposition))
        } else {
            self.require_points(series, "forecast")?;
            (series.clone(), None)
        };

        let best = self
            .select_best(self.candidates(registry, &training)?)
            .ok_or_else(|| EngineError::degeneracy("no forecast candidate could be fitted"))?;
        notes.extend(best.notes.clone());

        let z = z_score(self.config.confidence_level)?;
        let sigma = best.performance.residual_std_dev;
        let n = series.len();
        let subject = series.kpi_id();

        let mut points = Vec::with_capacity(periods_ahead);
        for h in 1..=periods_ahead {
            let t = n - 1 + h;
            let mut value = self.point_value(registry, &best, h as u32)?;
            if let Some(d) = &seasonal {
                value += d.index_at(t);
            }
            let value = notes.finite_or(value, 0.0, subject);
            let value = notes.non_negative(value, subject);
            let half_width = notes.finite_or(z * sigma * (h as f64).sqrt(), 0.0, subject);
            points.push(ForecastPoint {
                period: last_period.advance(h as u32),
                value,
                lower: (value - half_width).max(0.0),
                upper: value + half_width,
            });
        }

        let mut methodology = best.kind.description();
        if let Some(d) = &seasonal {
            methodology.push_str(&format!(" with additive seasonal adjustment (period {})", d.period));
        }
        tracing::info!(
            series = %series.key(),
            periods_ahead,
            model = best.kind.name(),
            mae = best.performance.mae,
            "Forecast generated"
        );

        Ok(Forecast {
            points,
            methodology,
            confidence: self.config.confidence_level,
            model_id: best.id,
            performance: best.performance,
            seasonal_strength: seasonal.map(|d| d.seasonal_strength),
            notes,
        })
    }
}

fn deseasonalize(series: &KpiSeries, decomposition: &SeasonalDecomposition) -> Result<KpiSeries> {
    let points = series
        .points()
        .iter()
        .zip(&decomposition.seasonal)
        .map(|(p, s)| KpiPoint {
            period: p.period,
            value: p.value - s,
        })
        .collect();
    KpiSeries::new(series.kpi_id(), series.factory_id(), points)
}
