//! Probabilistic scenario simulation
//!
//! - [`monte_carlo`]: scenario models, seeded batch sampling, projections
//! - [`distribution`]: outcome summaries and the weighted aggregate
//! - [`cancel`]: cooperative cancellation shared with the orchestrator

pub mod cancel;
pub mod distribution;
pub mod monte_carlo;

pub use cancel::CancellationToken;
pub use distribution::{HistogramBin, OutcomeDistribution, Percentiles};
pub use monte_carlo::{
    KpiBaseline, KpiProjection, MonteCarloRun, MonteCarloSimulator, RiskSummary, ScenarioModel, ScenarioOutcome,
    ScenarioSet,
};
