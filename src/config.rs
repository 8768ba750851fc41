//! Engine configuration
//!
//! Tunable constants for every component, loaded from TOML. Every field has a
//! serde default so a partial file only overrides what it names.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::PerturbationKind;

/// Engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub forecast: ForecastConfig,

    #[serde(default)]
    pub correlation: CorrelationConfig,

    #[serde(default)]
    pub monte_carlo: MonteCarloConfig,

    #[serde(default)]
    pub sensitivity: SensitivityConfig,

    #[serde(default)]
    pub optimizer: OptimizerConfig,

    #[serde(default)]
    pub guards: GuardConfig,
}

impl EngineConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load from environment or default path
    pub fn from_env() -> Self {
        let path =
            std::env::var("KPI_ENGINE_CONFIG_PATH").unwrap_or_else(|_| "kpi_engine.toml".to_string());

        Self::load(&path).unwrap_or_else(|e| {
            tracing::debug!("Using default engine config ({}): {}", path, e);
            Self::default()
        })
    }

    /// Save to TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Forecaster and decomposer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastConfig {
    /// Minimum observations to train any model
    #[serde(default = "default_min_training_points")]
    pub min_training_points: usize,

    /// Minimum observations for seasonal forecasts and decomposition
    #[serde(default = "default_min_seasonal_points")]
    pub min_seasonal_points: usize,

    /// Observations per seasonal cycle (4 = quarterly data, yearly cycle)
    #[serde(default = "default_seasonal_period")]
    pub seasonal_period: usize,

    /// Candidate smoothing factors searched when alpha is not supplied
    #[serde(default = "default_alpha_grid")]
    pub alpha_grid: Vec<f64>,

    /// Polynomial order tried by `generate_forecast`
    #[serde(default = "default_polynomial_order")]
    pub polynomial_order: usize,

    /// Confidence level of prediction bands
    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,

    /// Relative MAE margin under which the simpler model wins
    #[serde(default = "default_selection_tolerance")]
    pub selection_tolerance: f64,
}

fn default_min_training_points() -> usize {
    6
}

fn default_min_seasonal_points() -> usize {
    8
}

fn default_seasonal_period() -> usize {
    4
}

fn default_alpha_grid() -> Vec<f64> {
    (1..=9).map(|i| i as f64 / 10.0).collect()
}

fn default_polynomial_order() -> usize {
    2
}

fn default_confidence_level() -> f64 {
    0.95
}

fn default_selection_tolerance() -> f64 {
    1e-6
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            min_training_points: default_min_training_points(),
            min_seasonal_points: default_min_seasonal_points(),
            seasonal_period: default_seasonal_period(),
            alpha_grid: default_alpha_grid(),
            polynomial_order: default_polynomial_order(),
            confidence_level: default_confidence_level(),
            selection_tolerance: default_selection_tolerance(),
        }
    }
}

/// Correlation analysis settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// |r| at or above which a pair is strongly related
    #[serde(default = "default_strong_threshold")]
    pub strong_threshold: f64,

    /// |r| at or above which a pair is moderately related
    #[serde(default = "default_moderate_threshold")]
    pub moderate_threshold: f64,

    #[serde(default = "default_min_common_periods")]
    pub min_common_periods: usize,
}

fn default_strong_threshold() -> f64 {
    0.7
}

fn default_moderate_threshold() -> f64 {
    0.4
}

fn default_min_common_periods() -> usize {
    3
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            strong_threshold: default_strong_threshold(),
            moderate_threshold: default_moderate_threshold(),
            min_common_periods: default_min_common_periods(),
        }
    }
}

/// Monte Carlo execution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloConfig {
    /// Iterations per parallel batch (each batch owns one RNG stream)
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    /// Upper bound on requested iterations; every draw is kept in memory
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,

    /// Seed used when the request does not carry one; entropy when unset
    #[serde(default)]
    pub default_seed: Option<u64>,

    #[serde(default = "default_histogram_bins")]
    pub histogram_bins: usize,

    /// Perturbation used when the request does not choose one
    #[serde(default)]
    pub perturbation: PerturbationKind,
}

fn default_batch_size() -> u64 {
    512
}

fn default_max_iterations() -> u64 {
    10_000_000
}

fn default_histogram_bins() -> usize {
    20
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_iterations: default_max_iterations(),
            default_seed: None,
            histogram_bins: default_histogram_bins(),
            perturbation: PerturbationKind::default(),
        }
    }
}

/// Sensitivity analysis settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityConfig {
    /// Exponent `k` for exponential-impact parameters
    #[serde(default = "default_exponential_k")]
    pub exponential_k: f64,
}

fn default_exponential_k() -> f64 {
    2.0
}

impl Default for SensitivityConfig {
    fn default() -> Self {
        Self {
            exponential_k: default_exponential_k(),
        }
    }
}

/// Action sequencing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Concurrently active actions per interval; unbounded when unset
    #[serde(default)]
    pub max_concurrent: Option<usize>,

    /// Effort units one action burns down per interval
    #[serde(default = "default_interval_capacity")]
    pub interval_capacity: f64,
}

fn default_interval_capacity() -> f64 {
    1.0
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: None,
            interval_capacity: default_interval_capacity(),
        }
    }
}

/// Output guard rails
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Upper clamp for projected achievement rates (percent)
    #[serde(default = "default_achievement_ceiling")]
    pub achievement_ceiling: f64,
}

fn default_achievement_ceiling() -> f64 {
    200.0
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            achievement_ceiling: default_achievement_ceiling(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.forecast.min_training_points, 6);
        assert_eq!(config.forecast.min_seasonal_points, 8);
        assert_eq!(config.forecast.seasonal_period, 4);
        assert_eq!(config.forecast.alpha_grid.len(), 9);
        assert_eq!(config.correlation.strong_threshold, 0.7);
        assert_eq!(config.correlation.min_common_periods, 3);
        assert_eq!(config.optimizer.max_concurrent, None);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [monte_carlo]
            batch_size = 128
            default_seed = 7

            [optimizer]
            max_concurrent = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.monte_carlo.batch_size, 128);
        assert_eq!(config.monte_carlo.default_seed, Some(7));
        assert_eq!(config.monte_carlo.histogram_bins, 20);
        assert_eq!(config.monte_carlo.max_iterations, 10_000_000);
        assert_eq!(config.optimizer.max_concurrent, Some(2));
        assert_eq!(config.forecast, ForecastConfig::default());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kpi_engine.toml");
        let mut config = EngineConfig::default();
        config.sensitivity.exponential_k = 3.0;
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
