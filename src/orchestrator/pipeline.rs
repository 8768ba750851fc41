//! Simulation orchestrator
//!
//! Runs one request through the stage pipeline, advancing the
//! [`RunStateMachine`] at each stage boundary. A [`SimulationResult`] is only
//! built after the machine reaches `COMPLETED`; on any error the run moves to
//! `FAILED` and the error is returned with nothing else.

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::{CorrelationAnalyzer, CorrelationMatrix, RelatedKpi, SensitivityAnalysis, SensitivityAnalyzer};
use crate::config::EngineConfig;
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::error::{EngineError, Result};
use crate::forecast::{Forecast, ForecastOptions, ModelRegistry, TimeSeriesForecaster};
use crate::models::{
    ActionImpact, ActionPlan, KpiProfile, KpiSeries, MonteCarloSettings, Scenario, SensitivitySpec, TimeHorizon,
};
use crate::optimizer::{ActionSequenceOptimizer, ActionTimeline};
use crate::orchestrator::state::{PhaseRecord, RunPhase, RunStateMachine};
use crate::simulation::{
    CancellationToken, KpiBaseline, MonteCarloRun, MonteCarloSimulator, OutcomeDistribution, ScenarioModel,
    ScenarioOutcome, ScenarioSet,
};

// =============================================================================
// REQUEST / RESULT
// =============================================================================

/// Everything one simulation run needs, supplied up front by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationRequest {
    pub scenarios: Vec<Scenario>,
    #[serde(default)]
    pub monte_carlo: MonteCarloSettings,
    #[serde(default)]
    pub sensitivity: SensitivitySpec,
    pub time_horizon: TimeHorizon,
    #[serde(default)]
    pub kpis: Vec<KpiProfile>,
    #[serde(default)]
    pub impacts: Vec<ActionImpact>,
    /// Action catalog for the optimizer. When present, every scenario action
    /// must appear here.
    #[serde(default)]
    pub actions: Vec<ActionPlan>,
    #[serde(default)]
    pub max_concurrent: Option<usize>,
    /// Seasonally adjust baselines of series long enough to decompose.
    #[serde(default)]
    pub seasonal_baselines: bool,
}

/// Where a KPI is heading without any action, and how that was derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineForecast {
    pub kpi_id: String,
    pub baseline: KpiBaseline,
    /// `None` when the baseline fell back to the last observation.
    #[serde(default)]
    pub forecast: Option<Forecast>,
}

/// Per-KPI view across all scenarios.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiOutlook {
    pub kpi_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub target: f64,
    pub current_achievement: f64,
    pub baseline_achievement: f64,
    /// Probability-weighted projected achievement.
    pub expected_achievement: f64,
    pub expected_uplift: f64,
    pub related: Vec<RelatedKpi>,
}

/// Output of a completed run. Built once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub seed: u64,
    pub scenarios: Vec<ScenarioOutcome>,
    pub aggregate: OutcomeDistribution,
    pub baselines: Vec<BaselineForecast>,
    pub kpi_outlook: Vec<KpiOutlook>,
    pub correlations: CorrelationMatrix,
    pub sensitivity: SensitivityAnalysis,
    pub timeline: ActionTimeline,
    pub phases: Vec<PhaseRecord>,
    #[serde(default)]
    pub notes: Diagnostics,
}

impl SimulationResult {
    pub fn scenario(&self, scenario_id: &str) -> Option<&ScenarioOutcome> {
        self.scenarios.iter().find(|s| s.scenario_id == scenario_id)
    }

    pub fn outlook(&self, kpi_id: &str) -> Option<&KpiOutlook> {
        self.kpi_outlook.iter().find(|k| k.kpi_id == kpi_id)
    }

    /// Scenario ids from best to worst expected outcome.
    pub fn ranking(&self) -> Vec<&str> {
        let mut ranked: Vec<&ScenarioOutcome> = self.scenarios.iter().collect();
        ranked.sort_by_key(|s| s.risk.rank);
        ranked.into_iter().map(|s| s.scenario_id.as_str()).collect()
    }
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

#[derive(Debug, Clone)]
pub struct SimulationOrchestrator {
    config: EngineConfig,
    /// Caller-owned registry; without one each run fits into its own.
    registry: Option<Arc<ModelRegistry>>,
    forecaster: TimeSeriesForecaster,
    correlation: CorrelationAnalyzer,
    simulator: MonteCarloSimulator,
    sensitivity: SensitivityAnalyzer,
    optimizer: ActionSequenceOptimizer,
}

impl Default for SimulationOrchestrator {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl SimulationOrchestrator {
    pub fn new(config: EngineConfig) -> Self {
        Self::build(config, None)
    }

    /// Share a registry with other forecasting callers. Baseline models
    /// fitted by every run stay in it until the caller evicts them.
    pub fn with_registry(config: EngineConfig, registry: Arc<ModelRegistry>) -> Self {
        Self::build(config, Some(registry))
    }

    fn build(config: EngineConfig, registry: Option<Arc<ModelRegistry>>) -> Self {
        Self {
            forecaster: TimeSeriesForecaster::new(config.forecast.clone()),
            correlation: CorrelationAnalyzer::new(config.correlation.clone()),
            simulator: MonteCarloSimulator::new(config.monte_carlo.clone(), config.guards.clone()),
            sensitivity: SensitivityAnalyzer::new(config.sensitivity.clone()),
            optimizer: ActionSequenceOptimizer::new(config.optimizer.clone()),
            config,
            registry,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> Option<&Arc<ModelRegistry>> {
        self.registry.as_ref()
    }

    /// Run the full pipeline synchronously on the calling thread (stage
    /// internals still fan out on rayon).
    pub fn run_advanced_simulation(
        &self,
        request: &SimulationRequest,
        cancel: &CancellationToken,
    ) -> Result<SimulationResult> {
        let started = Instant::now();
        let mut fsm = RunStateMachine::new();
        counter!("kpi_engine.runs.started", 1);

        match self.execute(&mut fsm, request, cancel) {
            Ok(result) => {
                counter!("kpi_engine.runs.completed", 1);
                histogram!("kpi_engine.run.seconds", started.elapsed().as_secs_f64());
                info!(
                    run_id = %result.run_id,
                    scenarios = result.scenarios.len(),
                    seed = result.seed,
                    aggregate_mean = result.aggregate.mean,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Simulation run completed"
                );
                Ok(result)
            }
            Err(e) => {
                let failed_in = fsm.phase();
                fsm.fail();
                counter!("kpi_engine.runs.failed", 1, "phase" => failed_in.as_str());
                warn!(phase = %failed_in, error = %e, "Simulation run failed");
                Err(e)
            }
        }
    }

    /// Run the pipeline on tokio's blocking pool.
    pub async fn run_advanced_simulation_async(
        &self,
        request: SimulationRequest,
        cancel: CancellationToken,
    ) -> Result<SimulationResult> {
        let orchestrator = self.clone();
        tokio::task::spawn_blocking(move || orchestrator.run_advanced_simulation(&request, &cancel))
            .await
            .map_err(|e| EngineError::TaskFailed(e.to_string()))?
    }

    fn execute(
        &self,
        fsm: &mut RunStateMachine,
        request: &SimulationRequest,
        cancel: &CancellationToken,
    ) -> Result<SimulationResult> {
        self.validate(request)?;
        cancel.check("validating")?;

        fsm.transition(RunPhase::Forecasting)?;
        let mut notes = Diagnostics::new();
        let run_registry;
        let registry: &ModelRegistry = match &self.registry {
            Some(shared) => shared,
            None => {
                run_registry = ModelRegistry::new();
                &run_registry
            }
        };
        let baselines = self.forecast_baselines(registry, request, &mut notes)?;
        let series: Vec<KpiSeries> = request.kpis.iter().map(|k| k.series.clone()).collect();
        let correlations = self.correlation.analyze_correlations(&series);
        cancel.check("forecasting")?;

        fsm.transition(RunPhase::Simulating)?;
        let kpi_baselines: Vec<KpiBaseline> = baselines.iter().map(|b| b.baseline.clone()).collect();
        let models: Vec<ScenarioModel> = request
            .scenarios
            .iter()
            .map(|s| ScenarioModel::build(s, &kpi_baselines, &request.impacts))
            .collect();
        let run = self
            .simulator
            .run(&request.scenarios, &models, &request.monte_carlo, cancel)?;

        fsm.transition(RunPhase::AnalyzingSensitivity)?;
        let set = ScenarioSet::new(
            request
                .scenarios
                .iter()
                .map(|s| s.probability)
                .zip(models)
                .collect(),
        );
        let sensitivity = self.sensitivity.analyze_sensitivity(&set, &request.sensitivity)?;
        cancel.check("analyzing sensitivity")?;

        fsm.transition(RunPhase::Optimizing)?;
        let timeline =
            self.optimizer
                .optimize_sequence(&request.actions, &request.time_horizon, request.max_concurrent)?;
        cancel.check("optimizing")?;

        let kpi_outlook = self.kpi_outlook(request, &baselines, &run, &correlations, &mut notes);

        fsm.transition(RunPhase::Completed)?;
        let MonteCarloRun {
            seed,
            scenarios,
            aggregate,
        } = run;

        Ok(SimulationResult {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            seed,
            scenarios,
            aggregate,
            baselines,
            kpi_outlook,
            correlations,
            sensitivity,
            timeline,
            phases: fsm.history().to_vec(),
            notes,
        })
    }

    // =========================================================================
    // VALIDATING
    // =========================================================================

    fn validate(&self, request: &SimulationRequest) -> Result<()> {
        if request.scenarios.is_empty() {
            return Err(EngineError::validation("at least one scenario is required"));
        }
        request.time_horizon.validate()?;
        self.simulator.validate_settings(&request.monte_carlo)?;
        request.sensitivity.validate()?;

        let mut scenario_ids = HashSet::new();
        for scenario in &request.scenarios {
            scenario.validate()?;
            if !scenario_ids.insert(scenario.id.as_str()) {
                return Err(EngineError::validation(format!("scenario {} listed twice", scenario.id)));
            }
        }

        let mut kpi_ids = HashSet::new();
        for kpi in &request.kpis {
            if !(kpi.target > 0.0 && kpi.target.is_finite()) {
                return Err(EngineError::validation(format!(
                    "KPI {} target {} must be positive",
                    kpi.kpi_id(),
                    kpi.target
                )));
            }
            if kpi.series.is_empty() {
                return Err(EngineError::validation(format!("KPI {} has no observations", kpi.kpi_id())));
            }
            if !kpi_ids.insert(kpi.kpi_id()) {
                return Err(EngineError::validation(format!("KPI {} listed twice", kpi.kpi_id())));
            }
        }

        let planned: HashSet<&str> = request.actions.iter().map(|a| a.action_id.as_str()).collect();
        let mut assumed: HashSet<&str> = HashSet::new();
        for scenario in &request.scenarios {
            for action in &scenario.actions {
                if !planned.is_empty() && !planned.contains(action.action_id.as_str()) {
                    return Err(EngineError::validation(format!(
                        "scenario {} references unknown action {}",
                        scenario.id, action.action_id
                    )));
                }
                assumed.insert(action.action_id.as_str());
            }
        }

        for impact in &request.impacts {
            if !(0.0..=1.0).contains(&impact.impact_score) {
                return Err(EngineError::validation(format!(
                    "impact score {} of action {} on KPI {} outside [0, 1]",
                    impact.impact_score, impact.action_id, impact.kpi_id
                )));
            }
            if !kpi_ids.contains(impact.kpi_id.as_str()) {
                return Err(EngineError::validation(format!(
                    "impact of action {} references unknown KPI {}",
                    impact.action_id, impact.kpi_id
                )));
            }
            let action = impact.action_id.as_str();
            if !assumed.contains(action) && !planned.contains(action) {
                return Err(EngineError::validation(format!(
                    "impact references unknown action {}",
                    impact.action_id
                )));
            }
        }
        Ok(())
    }

    // =========================================================================
    // FORECASTING
    // =========================================================================

    fn forecast_baselines(
        &self,
        registry: &ModelRegistry,
        request: &SimulationRequest,
        notes: &mut Diagnostics,
    ) -> Result<Vec<BaselineForecast>> {
        let quarters = request.time_horizon.quarters_spanned();
        let results: Vec<(BaselineForecast, Diagnostics)> = request
            .kpis
            .par_iter()
            .map(|profile| self.forecast_baseline(registry, profile, quarters, request.seasonal_baselines))
            .collect::<Result<Vec<_>>>()?;

        let mut baselines = Vec::with_capacity(results.len());
        for (baseline, kpi_notes) in results {
            notes.extend(kpi_notes);
            baselines.push(baseline);
        }
        Ok(baselines)
    }

    fn forecast_baseline(
        &self,
        registry: &ModelRegistry,
        profile: &KpiProfile,
        quarters: usize,
        seasonal: bool,
    ) -> Result<(BaselineForecast, Diagnostics)> {
        let series = &profile.series;
        let periods_ahead = match series.last_period() {
            Some(p) if !p.is_quarterly() => quarters * 3,
            _ => quarters,
        };
        let config = self.forecaster.config();
        let options = ForecastOptions {
            seasonal: seasonal && series.len() >= config.min_seasonal_points.max(2 * config.seasonal_period),
        };

        let mut notes = Diagnostics::new();
        let forecast = match self
            .forecaster
            .generate_forecast(registry, series, periods_ahead, &options)
        {
            Ok(forecast) => Some(forecast),
            Err(e @ (EngineError::InsufficientData { .. } | EngineError::NumericDegeneracy(_))) => {
                notes.push(
                    DiagnosticKind::ForecastFallback,
                    profile.kpi_id(),
                    format!("baseline held at last observation: {}", e),
                );
                None
            }
            Err(e) => return Err(e),
        };

        let end_value = forecast.as_ref().and_then(|f| f.last()).map(|p| p.value);
        if let Some(f) = &forecast {
            notes.extend(f.notes.clone());
        }
        Ok((
            BaselineForecast {
                kpi_id: profile.kpi_id().to_string(),
                baseline: KpiBaseline::from_profile(profile, end_value),
                forecast,
            },
            notes,
        ))
    }

    // =========================================================================
    // OUTLOOK
    // =========================================================================

    fn kpi_outlook(
        &self,
        request: &SimulationRequest,
        baselines: &[BaselineForecast],
        run: &MonteCarloRun,
        correlations: &CorrelationMatrix,
        notes: &mut Diagnostics,
    ) -> Vec<KpiOutlook> {
        let total: f64 = run.scenarios.iter().map(|s| s.probability.max(0.0)).sum();
        let n = run.scenarios.len().max(1) as f64;
        let weight = |p: f64| if total > f64::EPSILON { p.max(0.0) / total } else { 1.0 / n };
        let ceiling = self.config.guards.achievement_ceiling;

        request
            .kpis
            .iter()
            .zip(baselines)
            .map(|(profile, b)| {
                let mut expected_achievement = 0.0;
                let mut expected_uplift = 0.0;
                for outcome in &run.scenarios {
                    if let Some(p) = outcome.kpi_projections.iter().find(|p| p.kpi_id == b.kpi_id) {
                        let w = weight(outcome.probability);
                        expected_achievement += w * p.projected_achievement;
                        expected_uplift += w * p.expected_uplift;
                    }
                }
                KpiOutlook {
                    kpi_id: b.kpi_id.clone(),
                    name: profile.name.clone(),
                    target: b.baseline.target,
                    current_achievement: b.baseline.current_achievement,
                    baseline_achievement: b.baseline.baseline_achievement,
                    expected_achievement: notes.guard(expected_achievement, 0.0, ceiling, &b.kpi_id),
                    expected_uplift: notes.finite_or(expected_uplift, 0.0, &b.kpi_id),
                    related: correlations.related_to(&b.kpi_id),
                }
            })
            .collect()
    }
}
