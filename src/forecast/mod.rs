//! Forecasting
//!
//! Model fitting, registry and seasonal decomposition for single KPI series.
//!
//! ```text
//! KpiSeries ──▶ TimeSeriesForecaster ──▶ ModelRegistry (caller-owned)
//!                 │   regression / smoothing fits
//!                 ▼
//!            SeasonalDecomposer (seasonal forecasts)
//! ```

pub mod decomposition;
pub mod forecaster;
pub mod model;
pub mod registry;
pub mod regression;
pub mod smoothing;

pub use decomposition::{perform_seasonal_decomposition, SeasonalDecomposer, SeasonalDecomposition};
pub use forecaster::{
    z_score, Forecast, ForecastOptions, ForecastPoint, Prediction, PredictionFeatures, TimeSeriesForecaster,
    TrainingRequest,
};
pub use model::{FittedModel, ModelFamily, ModelKind, ModelParameters, ModelPerformance};
pub use registry::ModelRegistry;
