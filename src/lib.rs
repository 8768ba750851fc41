//! KPI Scenario Simulation & Forecasting Engine
//!
//! Pure computation library for model-factory KPI tracking: forecasts KPI
//! baselines, simulates improvement scenarios with Monte Carlo, ranks
//! sensitivities and sequences actions over a time horizon.
//!
//! ```text
//! SimulationRequest
//!       │
//!       ▼
//! SimulationOrchestrator ── Validating ─▶ Forecasting ─▶ Simulating ─▶ AnalyzingSensitivity ─▶ Optimizing
//!                              │              │              │                 │                   │
//!                           models      forecast +      simulation         analysis            optimizer
//!                                      correlation
//! ```
//!
//! Hosting services own the [`forecast::ModelRegistry`] and call either the
//! orchestrator or the individual components.

pub mod analysis;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod forecast;
pub mod models;
pub mod optimizer;
pub mod orchestrator;
pub mod simulation;

pub use analysis::{CorrelationAnalyzer, CorrelationMatrix, SensitivityAnalysis, SensitivityAnalyzer};
pub use config::EngineConfig;
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
pub use error::{EngineError, Result};
pub use forecast::{
    perform_seasonal_decomposition, Forecast, ModelRegistry, SeasonalDecomposer, SeasonalDecomposition,
    TimeSeriesForecaster,
};
pub use models::{KpiProfile, KpiSeries, Period, Scenario, TimeHorizon};
pub use optimizer::{ActionSequenceOptimizer, ActionTimeline};
pub use orchestrator::{RunPhase, SimulationOrchestrator, SimulationRequest, SimulationResult};
pub use simulation::{CancellationToken, MonteCarloSimulator};
