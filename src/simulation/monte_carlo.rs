//! Monte Carlo scenario simulation
//!
//! Each scenario is compiled into a [`ScenarioModel`] once, then sampled in
//! fixed-size batches on the rayon pool. Every batch owns a `ChaCha8Rng`
//! seeded with the run seed and streamed by `(scenario index, batch index)`,
//! so a seeded run produces identical output regardless of thread count.
//!
//! Per draw and per action the completion rate is perturbed inside a window
//! symmetric around the assumed value, `± min(variability, c, 100 - c)`, which
//! keeps the perturbation zero-mean and inside `[0, 100]`.
//!
//! Contribution of an action to a KPI:
//! `impactScore × completion / 100 × max(0, 100 - currentAchievement)`.
//! The scenario outcome is the mean uplift (percentage points) over the KPIs
//! the scenario touches.

use metrics::{counter, histogram};
use rand::distributions::Distribution;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;
use std::collections::HashMap;
use std::time::Instant;

use crate::analysis::sensitivity::{OutcomeModel, ParameterBinding};
use crate::config::{GuardConfig, MonteCarloConfig};
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::error::{EngineError, Result};
use crate::models::{achievement_rate, ActionImpact, KpiProfile, MonteCarloSettings, PerturbationKind, Scenario};
use crate::simulation::cancel::CancellationToken;
use crate::simulation::distribution::{percentile, OutcomeDistribution};

// =============================================================================
// SCENARIO MODEL
// =============================================================================

/// Starting point of one KPI: where it is now and where it heads without actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiBaseline {
    pub kpi_id: String,
    pub target: f64,
    pub current_value: f64,
    pub current_achievement: f64,
    /// Forecast value at the end of the horizon (current value when unforecast).
    pub baseline_value: f64,
    pub baseline_achievement: f64,
}

impl KpiBaseline {
    pub fn from_profile(profile: &KpiProfile, baseline_value: Option<f64>) -> Self {
        let current_value = profile.current_value().unwrap_or(0.0);
        let baseline_value = baseline_value.unwrap_or(current_value);
        Self {
            kpi_id: profile.kpi_id().to_string(),
            target: profile.target,
            current_value,
            current_achievement: achievement_rate(current_value, profile.target),
            baseline_value,
            baseline_achievement: achievement_rate(baseline_value, profile.target),
        }
    }

    /// Achievement still available below 100%.
    pub fn headroom(&self) -> f64 {
        (100.0 - self.current_achievement).max(0.0)
    }
}

#[derive(Debug, Clone)]
struct ModelAction {
    action_id: String,
    completion: f64,
    /// `(kpi index, impact score)`
    links: Vec<(usize, f64)>,
}

/// A scenario resolved against KPI baselines and action impacts.
#[derive(Debug, Clone)]
pub struct ScenarioModel {
    scenario_id: String,
    kpis: Vec<KpiBaseline>,
    headroom: Vec<f64>,
    actions: Vec<ModelAction>,
    impacted: Vec<bool>,
}

impl ScenarioModel {
    /// Links every scenario action to the KPIs it impacts. Impacts on
    /// unknown KPIs or on actions outside the scenario are ignored.
    pub fn build(scenario: &Scenario, kpis: &[KpiBaseline], impacts: &[ActionImpact]) -> Self {
        let kpi_index: HashMap<&str, usize> = kpis
            .iter()
            .enumerate()
            .map(|(i, k)| (k.kpi_id.as_str(), i))
            .collect();

        let mut impacted = vec![false; kpis.len()];
        let actions = scenario
            .actions
            .iter()
            .map(|a| {
                let links: Vec<(usize, f64)> = impacts
                    .iter()
                    .filter(|imp| imp.action_id == a.action_id)
                    .filter_map(|imp| kpi_index.get(imp.kpi_id.as_str()).map(|&k| (k, imp.impact_score)))
                    .collect();
                for &(k, _) in &links {
                    impacted[k] = true;
                }
                ModelAction {
                    action_id: a.action_id.clone(),
                    completion: a.assumed_completion,
                    links,
                }
            })
            .collect();

        Self {
            scenario_id: scenario.id.clone(),
            headroom: kpis.iter().map(KpiBaseline::headroom).collect(),
            kpis: kpis.to_vec(),
            actions,
            impacted,
        }
    }

    pub fn scenario_id(&self) -> &str {
        &self.scenario_id
    }

    pub fn kpis(&self) -> &[KpiBaseline] {
        &self.kpis
    }

    pub fn impacted_kpi_count(&self) -> usize {
        self.impacted.iter().filter(|i| **i).count()
    }

    pub fn has_action(&self, action_id: &str) -> bool {
        self.actions.iter().any(|a| a.action_id == action_id)
    }

    /// Per-KPI uplift for the given per-action completions.
    fn uplifts_with(&self, completions: &[f64], impact_scale: Option<(usize, f64)>, uplifts: &mut [f64]) {
        uplifts.iter_mut().for_each(|u| *u = 0.0);
        for (i, (action, &completion)) in self.actions.iter().zip(completions).enumerate() {
            let scale = match impact_scale {
                Some((target, factor)) if target == i => factor,
                _ => 1.0,
            };
            for &(k, score) in &action.links {
                let score = (score * scale).clamp(0.0, 1.0);
                uplifts[k] += score * (completion / 100.0) * self.headroom[k];
            }
        }
    }

    /// Mean uplift over impacted KPIs; zero when nothing is impacted.
    fn outcome_of(&self, uplifts: &[f64]) -> f64 {
        let count = self.impacted_kpi_count();
        if count == 0 {
            return 0.0;
        }
        uplifts
            .iter()
            .zip(&self.impacted)
            .filter(|(_, hit)| **hit)
            .map(|(u, _)| u)
            .sum::<f64>()
            / count as f64
    }

    fn assumed_completions(&self) -> Vec<f64> {
        self.actions.iter().map(|a| a.completion).collect()
    }

    /// Per-KPI uplift with every action at its assumed completion.
    pub fn expected_uplifts(&self) -> Vec<f64> {
        let mut uplifts = vec![0.0; self.kpis.len()];
        self.uplifts_with(&self.assumed_completions(), None, &mut uplifts);
        uplifts
    }

    /// Outcome with every action at its assumed completion.
    pub fn expected_outcome(&self) -> f64 {
        self.outcome_of(&self.expected_uplifts())
    }
}

impl OutcomeModel for ScenarioModel {
    fn baseline_outcome(&self) -> f64 {
        self.expected_outcome()
    }

    fn shifted_outcome(&self, binding: &ParameterBinding, factor: f64) -> Option<f64> {
        let mut completions = self.assumed_completions();
        let mut uplifts = vec![0.0; self.kpis.len()];
        match binding {
            ParameterBinding::Completion(action_id) => {
                let i = self.actions.iter().position(|a| &a.action_id == action_id)?;
                completions[i] = (completions[i] * factor).clamp(0.0, 100.0);
                self.uplifts_with(&completions, None, &mut uplifts);
            }
            ParameterBinding::Impact(action_id) => {
                let i = self.actions.iter().position(|a| &a.action_id == action_id)?;
                self.uplifts_with(&completions, Some((i, factor)), &mut uplifts);
            }
            ParameterBinding::Free => return Some(self.expected_outcome() * factor),
        }
        Some(self.outcome_of(&uplifts))
    }
}

/// Probability-weighted set of scenario models, evaluated as one outcome.
#[derive(Debug, Clone)]
pub struct ScenarioSet {
    members: Vec<(f64, ScenarioModel)>,
}

impl ScenarioSet {
    /// Weights are normalized; all-zero probabilities mean equal weights.
    pub fn new(members: Vec<(f64, ScenarioModel)>) -> Self {
        let total: f64 = members.iter().map(|(p, _)| p.max(0.0)).sum();
        let n = members.len().max(1) as f64;
        let members = members
            .into_iter()
            .map(|(p, m)| {
                let w = if total > f64::EPSILON { p.max(0.0) / total } else { 1.0 / n };
                (w, m)
            })
            .collect();
        Self { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl OutcomeModel for ScenarioSet {
    fn baseline_outcome(&self) -> f64 {
        self.members.iter().map(|(w, m)| w * m.expected_outcome()).sum()
    }

    fn shifted_outcome(&self, binding: &ParameterBinding, factor: f64) -> Option<f64> {
        let mut bound = false;
        let mut total = 0.0;
        for (w, m) in &self.members {
            let outcome = match m.shifted_outcome(binding, factor) {
                Some(o) => {
                    bound = true;
                    o
                }
                None => m.expected_outcome(),
            };
            total += w * outcome;
        }
        bound.then_some(total)
    }
}

// =============================================================================
// PERTURBATION
// =============================================================================

/// Sampler for one action's completion rate.
#[derive(Debug, Clone)]
struct CompletionSampler {
    center: f64,
    half_width: f64,
    kind: PerturbationKind,
    normal: Option<Normal>,
}

const MAX_REJECTIONS: usize = 64;

impl CompletionSampler {
    fn new(center: f64, variability: f64, kind: PerturbationKind) -> Self {
        let half_width = variability.min(center).min(100.0 - center).max(0.0);
        let normal = match kind {
            PerturbationKind::TruncatedNormal if half_width > 0.0 => Normal::new(center, half_width / 2.0).ok(),
            _ => None,
        };
        Self {
            center,
            half_width,
            kind,
            normal,
        }
    }

    fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        if self.half_width <= 0.0 {
            return self.center;
        }
        match (self.kind, &self.normal) {
            (PerturbationKind::TruncatedNormal, Some(normal)) => {
                for _ in 0..MAX_REJECTIONS {
                    let x = normal.sample(rng);
                    if (x - self.center).abs() <= self.half_width {
                        return x;
                    }
                }
                self.center
            }
            _ => rng.gen_range(self.center - self.half_width..=self.center + self.half_width),
        }
    }
}

// =============================================================================
// RESULTS
// =============================================================================

/// A KPI's baseline versus with-actions projection under one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiProjection {
    pub kpi_id: String,
    pub target: f64,
    pub current_achievement: f64,
    pub baseline_value: f64,
    pub baseline_achievement: f64,
    /// Mean with-actions achievement over all draws.
    pub projected_achievement: f64,
    pub projected_value: f64,
    pub lower: f64,
    pub upper: f64,
    pub expected_uplift: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskSummary {
    pub probability_positive: f64,
    /// Lower bound of the outcome interval.
    pub downside: f64,
    pub upside: f64,
    /// 1 = best expected outcome among the run's scenarios.
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioOutcome {
    pub scenario_id: String,
    pub name: String,
    pub probability: f64,
    pub iterations: u64,
    pub seed: u64,
    /// Outcome with every action exactly at its assumed completion.
    pub expected_outcome: f64,
    pub distribution: OutcomeDistribution,
    pub kpi_projections: Vec<KpiProjection>,
    pub risk: RiskSummary,
    #[serde(default)]
    pub notes: Diagnostics,
    /// Raw per-draw outcomes in batch order.
    #[serde(skip)]
    pub samples: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloRun {
    pub seed: u64,
    pub scenarios: Vec<ScenarioOutcome>,
    /// Scenario distributions combined by scenario probability.
    pub aggregate: OutcomeDistribution,
}

#[derive(Debug, Default)]
struct BatchResult {
    outcomes: Vec<f64>,
    /// With-actions achievement per KPI, one entry per draw.
    kpi_samples: Vec<Vec<f64>>,
    clamped: usize,
}

// =============================================================================
// SIMULATOR
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct MonteCarloSimulator {
    config: MonteCarloConfig,
    guards: GuardConfig,
}

impl MonteCarloSimulator {
    pub fn new(config: MonteCarloConfig, guards: GuardConfig) -> Self {
        Self { config, guards }
    }

    /// Request seed, then configured default, then entropy.
    pub fn resolve_seed(&self, settings: &MonteCarloSettings) -> u64 {
        settings
            .seed
            .or(self.config.default_seed)
            .unwrap_or_else(rand::random)
    }

    fn batch_rng(seed: u64, scenario_index: usize, batch_index: usize) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(((scenario_index as u64) << 32) | batch_index as u64);
        rng
    }

    fn run_batch(
        &self,
        model: &ScenarioModel,
        samplers: &[CompletionSampler],
        draws: u64,
        mut rng: ChaCha8Rng,
    ) -> BatchResult {
        let kpi_count = model.kpis.len();
        let ceiling = self.guards.achievement_ceiling;
        let mut result = BatchResult {
            outcomes: Vec::with_capacity(draws as usize),
            kpi_samples: vec![Vec::with_capacity(draws as usize); kpi_count],
            clamped: 0,
        };
        let mut completions = vec![0.0; samplers.len()];
        let mut uplifts = vec![0.0; kpi_count];

        for _ in 0..draws {
            for (c, sampler) in completions.iter_mut().zip(samplers) {
                *c = sampler.sample(&mut rng);
            }
            model.uplifts_with(&completions, None, &mut uplifts);
            let outcome = model.outcome_of(&uplifts);
            result.outcomes.push(if outcome.is_finite() { outcome } else { 0.0 });

            for (k, kpi) in model.kpis.iter().enumerate() {
                let raw = kpi.baseline_achievement + uplifts[k];
                let projected = if raw.is_finite() { raw } else { 0.0 };
                let guarded = projected.clamp(0.0, ceiling);
                if guarded != raw {
                    result.clamped += 1;
                }
                result.kpi_samples[k].push(guarded);
            }
        }
        result
    }

    /// Request settings plus the configured iteration ceiling.
    pub fn validate_settings(&self, settings: &MonteCarloSettings) -> Result<()> {
        settings.validate()?;
        if settings.iterations > self.config.max_iterations {
            return Err(EngineError::validation(format!(
                "iterations {} exceed the configured maximum of {}",
                settings.iterations, self.config.max_iterations
            )));
        }
        Ok(())
    }

    /// Simulate one scenario. Cancellation is checked before every batch.
    pub fn simulate_scenario(
        &self,
        scenario: &Scenario,
        scenario_index: usize,
        model: &ScenarioModel,
        settings: &MonteCarloSettings,
        seed: u64,
        cancel: &CancellationToken,
    ) -> Result<ScenarioOutcome> {
        self.validate_settings(settings)?;
        let started = Instant::now();
        let batch_size = self.config.batch_size.max(1);
        let batch_count = settings.iterations.div_ceil(batch_size);
        let perturbation = settings.perturbation.unwrap_or(self.config.perturbation);

        let samplers: Vec<CompletionSampler> = model
            .actions
            .iter()
            .map(|a| CompletionSampler::new(a.completion, settings.variability_factor, perturbation))
            .collect();

        let batches: Vec<BatchResult> = (0..batch_count)
            .into_par_iter()
            .map(|b| -> Result<BatchResult> {
                cancel.check("simulating")?;
                let draws = batch_size.min(settings.iterations - b * batch_size);
                let rng = Self::batch_rng(seed, scenario_index, b as usize);
                Ok(self.run_batch(model, &samplers, draws, rng))
            })
            .collect::<Result<Vec<_>>>()?;

        let kpi_count = model.kpis.len();
        let mut samples = Vec::with_capacity(settings.iterations as usize);
        let mut kpi_samples: Vec<Vec<f64>> = vec![Vec::with_capacity(settings.iterations as usize); kpi_count];
        let mut clamped = 0usize;
        for batch in batches {
            samples.extend(batch.outcomes);
            for (all, part) in kpi_samples.iter_mut().zip(batch.kpi_samples) {
                all.extend(part);
            }
            clamped += batch.clamped;
        }

        let mut notes = Diagnostics::new();
        if clamped > 0 {
            notes.push(
                DiagnosticKind::ClampedValue,
                &scenario.id,
                format!(
                    "{} projected achievement values clamped to [0, {}]",
                    clamped, self.guards.achievement_ceiling
                ),
            );
        }
        if model.impacted_kpi_count() == 0 {
            notes.push(
                DiagnosticKind::SkippedInput,
                &scenario.id,
                "no scenario action impacts a supplied KPI, outcome is 0",
            );
        }

        let distribution =
            OutcomeDistribution::from_samples(&samples, settings.confidence_level, self.config.histogram_bins);
        let expected = model.expected_uplifts();
        let tail = (1.0 - settings.confidence_level) / 2.0;
        let kpi_projections = model
            .kpis
            .iter()
            .zip(kpi_samples.iter_mut())
            .zip(&expected)
            .map(|((kpi, draws), uplift)| {
                draws.sort_by(|a, b| a.total_cmp(b));
                let mean = if draws.is_empty() {
                    kpi.baseline_achievement
                } else {
                    draws.iter().sum::<f64>() / draws.len() as f64
                };
                KpiProjection {
                    kpi_id: kpi.kpi_id.clone(),
                    target: kpi.target,
                    current_achievement: kpi.current_achievement,
                    baseline_value: kpi.baseline_value,
                    baseline_achievement: kpi.baseline_achievement,
                    projected_achievement: mean,
                    projected_value: mean / 100.0 * kpi.target,
                    lower: percentile(draws, tail),
                    upper: percentile(draws, 1.0 - tail),
                    expected_uplift: *uplift,
                }
            })
            .collect();

        let elapsed = started.elapsed().as_secs_f64();
        counter!("kpi_engine.monte_carlo.draws", settings.iterations);
        histogram!("kpi_engine.monte_carlo.scenario_seconds", elapsed);
        tracing::debug!(
            scenario = %scenario.id,
            iterations = settings.iterations,
            batches = batch_count,
            mean = distribution.mean,
            elapsed_ms = elapsed * 1_000.0,
            "Scenario simulated"
        );

        Ok(ScenarioOutcome {
            scenario_id: scenario.id.clone(),
            name: scenario.name.clone(),
            probability: scenario.probability,
            iterations: settings.iterations,
            seed,
            expected_outcome: model.expected_outcome(),
            risk: RiskSummary {
                probability_positive: distribution.probability_positive,
                downside: distribution.lower,
                upside: distribution.upper,
                rank: 0,
            },
            distribution,
            kpi_projections,
            notes,
            samples,
        })
    }

    /// Simulate every scenario concurrently and build the weighted aggregate.
    pub fn run(
        &self,
        scenarios: &[Scenario],
        models: &[ScenarioModel],
        settings: &MonteCarloSettings,
        cancel: &CancellationToken,
    ) -> Result<MonteCarloRun> {
        if scenarios.is_empty() {
            return Err(EngineError::validation("at least one scenario is required"));
        }
        if scenarios.len() != models.len() {
            return Err(EngineError::validation(format!(
                "{} scenarios but {} scenario models",
                scenarios.len(),
                models.len()
            )));
        }
        let seed = self.resolve_seed(settings);

        let mut outcomes: Vec<ScenarioOutcome> = scenarios
            .par_iter()
            .zip(models.par_iter())
            .enumerate()
            .map(|(i, (scenario, model))| self.simulate_scenario(scenario, i, model, settings, seed, cancel))
            .collect::<Result<Vec<_>>>()?;

        let mut order: Vec<usize> = (0..outcomes.len()).collect();
        order.sort_by(|&a, &b| outcomes[b].distribution.mean.total_cmp(&outcomes[a].distribution.mean));
        for (rank, &i) in order.iter().enumerate() {
            outcomes[i].risk.rank = rank + 1;
        }

        let groups: Vec<(f64, &[f64])> = outcomes
            .iter()
            .map(|o| (o.probability, o.samples.as_slice()))
            .collect();
        let aggregate =
            OutcomeDistribution::mixture(&groups, settings.confidence_level, self.config.histogram_bins);

        Ok(MonteCarloRun {
            seed,
            scenarios: outcomes,
            aggregate,
        })
    }
}
