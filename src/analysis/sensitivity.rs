//! Sensitivity / elasticity analysis
//!
//! Shifts one parameter at a time by each declared variation `v` (percent),
//! so the parameter always moves by factor `1 + v`, and measures the outcome
//! response:
//!
//! - **Linear**: the outcome follows the shift as is (free parameters scale
//!   the baseline by `1 + v`, bound ones are recomputed through the model)
//! - **Exponential**: the outcome ratio is raised to `k` (free parameters
//!   scale the baseline by `(1 + v)^k`)
//!
//! Elasticity is `%Δoutcome / v`. Results are ranked by `|elasticity|`
//! descending and summarized as tornado bars.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::SensitivityConfig;
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::error::Result;
use crate::models::{ImpactKind, SensitivityParameter, SensitivitySpec};

// =============================================================================
// PARAMETER BINDING
// =============================================================================

/// What a parameter name refers to in the outcome model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParameterBinding {
    /// `<actionId>.completion`: assumed completion of one action.
    Completion(String),
    /// `<actionId>.impact`: every impact score of one action.
    Impact(String),
    /// Anything else scales the baseline outcome directly.
    Free,
}

impl ParameterBinding {
    pub fn parse(name: &str) -> Self {
        match name.rsplit_once('.') {
            Some((action, "completion")) if !action.is_empty() => Self::Completion(action.to_string()),
            Some((action, "impact")) if !action.is_empty() => Self::Impact(action.to_string()),
            _ => Self::Free,
        }
    }
}

/// Outcome function the analyzer perturbs.
pub trait OutcomeModel: Sync {
    /// Outcome with every parameter at baseline.
    fn baseline_outcome(&self) -> f64;

    /// Outcome with `binding` scaled by `factor`. `None` when the model has
    /// nothing bound to that name.
    fn shifted_outcome(&self, binding: &ParameterBinding, factor: f64) -> Option<f64>;
}

// =============================================================================
// RESULTS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitivityEntry {
    pub parameter: String,
    /// Variation in percent.
    pub variation: f64,
    pub parameter_value: f64,
    pub outcome: f64,
    pub outcome_change_pct: f64,
    pub elasticity: f64,
}

/// One tornado-chart bar: the outcome range a parameter spans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TornadoBar {
    pub parameter: String,
    pub low_outcome: f64,
    pub high_outcome: f64,
    pub swing: f64,
    pub max_abs_elasticity: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitivityAnalysis {
    pub baseline_outcome: f64,
    /// Ranked by `|elasticity|` descending, ties in declaration order.
    pub entries: Vec<SensitivityEntry>,
    /// Sorted by swing descending.
    pub tornado: Vec<TornadoBar>,
    #[serde(default)]
    pub notes: Diagnostics,
}

impl SensitivityAnalysis {
    /// Parameters in ranking order, each listed once.
    pub fn ranked_parameters(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for e in &self.entries {
            if !seen.contains(&e.parameter.as_str()) {
                seen.push(&e.parameter);
            }
        }
        seen
    }

    /// Format as a text table.
    pub fn format_text(&self) -> String {
        let mut out = String::new();
        out.push_str("=== SENSITIVITY (TORNADO) ===\n\n");
        out.push_str(&format!("Baseline outcome: {:.4}\n\n", self.baseline_outcome));
        out.push_str(&format!(
            "{:<32} {:>12} {:>12} {:>10} {:>12}\n",
            "Parameter", "Low", "High", "Swing", "|Elasticity|"
        ));
        for bar in &self.tornado {
            out.push_str(&format!(
                "{:<32} {:>12.4} {:>12.4} {:>10.4} {:>12.4}\n",
                bar.parameter, bar.low_outcome, bar.high_outcome, bar.swing, bar.max_abs_elasticity
            ));
        }
        out
    }
}

// =============================================================================
// ANALYZER
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct SensitivityAnalyzer {
    config: SensitivityConfig,
}

enum Evaluation {
    Entry(SensitivityEntry),
    Skipped(String),
}

impl SensitivityAnalyzer {
    pub fn new(config: SensitivityConfig) -> Self {
        Self { config }
    }

    /// Outcome multiplier for a free parameter shifted by `variation_pct`.
    pub fn shift_factor(&self, impact: ImpactKind, variation_pct: f64) -> f64 {
        let v = variation_pct / 100.0;
        match impact {
            ImpactKind::Linear => 1.0 + v,
            ImpactKind::Exponential => (1.0 + v).max(0.0).powf(self.config.exponential_k),
        }
    }

    /// Outcome of a bound parameter given the model's recomputed outcome.
    fn respond(&self, impact: ImpactKind, baseline: f64, shifted: f64) -> f64 {
        match impact {
            ImpactKind::Linear => shifted,
            ImpactKind::Exponential if baseline.abs() > f64::EPSILON => {
                baseline * (shifted / baseline).max(0.0).powf(self.config.exponential_k)
            }
            ImpactKind::Exponential => shifted,
        }
    }

    fn evaluate<M: OutcomeModel + ?Sized>(
        &self,
        model: &M,
        baseline: f64,
        parameter: &SensitivityParameter,
        binding: &ParameterBinding,
        variation: f64,
    ) -> Evaluation {
        let parameter_factor = (1.0 + variation / 100.0).max(0.0);
        let outcome = match binding {
            ParameterBinding::Free => baseline * self.shift_factor(parameter.impact, variation),
            bound => match model.shifted_outcome(bound, parameter_factor) {
                Some(shifted) => self.respond(parameter.impact, baseline, shifted),
                None => {
                    return Evaluation::Skipped(format!(
                        "parameter {} is not bound to any scenario action",
                        parameter.name
                    ))
                }
            },
        };

        let outcome_change_pct = if baseline.abs() > f64::EPSILON {
            (outcome - baseline) / baseline * 100.0
        } else {
            0.0
        };
        let elasticity = if variation == 0.0 || baseline.abs() <= f64::EPSILON {
            0.0
        } else {
            outcome_change_pct / variation
        };

        Evaluation::Entry(SensitivityEntry {
            parameter: parameter.name.clone(),
            variation,
            parameter_value: parameter.baseline * parameter_factor,
            outcome,
            outcome_change_pct,
            elasticity,
        })
    }

    /// Evaluate every parameter × variation combination in parallel.
    pub fn analyze_sensitivity<M: OutcomeModel + ?Sized>(
        &self,
        model: &M,
        spec: &SensitivitySpec,
    ) -> Result<SensitivityAnalysis> {
        spec.validate()?;
        let mut notes = Diagnostics::new();
        let baseline = notes.finite_or(model.baseline_outcome(), 0.0, "sensitivity baseline");

        if baseline.abs() <= f64::EPSILON && !spec.parameters.is_empty() {
            notes.push(
                DiagnosticKind::ZeroBaseline,
                "sensitivity baseline",
                "baseline outcome is zero, elasticities reported as 0",
            );
        }

        let mut combos: Vec<(usize, f64)> = Vec::new();
        for (i, p) in spec.parameters.iter().enumerate() {
            for &v in &p.variations {
                if spec.ranges.contains(v) {
                    combos.push((i, v));
                } else {
                    notes.push(
                        DiagnosticKind::SkippedInput,
                        &p.name,
                        format!(
                            "variation {}% outside [{}, {}]",
                            v, spec.ranges.min_pct, spec.ranges.max_pct
                        ),
                    );
                }
            }
        }

        let bindings: Vec<ParameterBinding> = spec
            .parameters
            .iter()
            .map(|p| ParameterBinding::parse(&p.name))
            .collect();

        let evaluations: Vec<(usize, Evaluation)> = combos
            .par_iter()
            .map(|&(i, v)| (i, self.evaluate(model, baseline, &spec.parameters[i], &bindings[i], v)))
            .collect();

        let mut entries = Vec::with_capacity(evaluations.len());
        let mut skipped_params: Vec<usize> = Vec::new();
        for (i, evaluation) in evaluations {
            match evaluation {
                Evaluation::Entry(mut e) => {
                    let subject = e.parameter.clone();
                    e.outcome = notes.finite_or(e.outcome, baseline, &subject);
                    e.elasticity = notes.finite_or(e.elasticity, 0.0, &subject);
                    entries.push(e);
                }
                Evaluation::Skipped(message) => {
                    if !skipped_params.contains(&i) {
                        skipped_params.push(i);
                        notes.push(DiagnosticKind::SkippedInput, &spec.parameters[i].name, message);
                    }
                }
            }
        }

        let tornado = tornado_bars(&spec.parameters, &entries, baseline);
        entries.sort_by(|a, b| b.elasticity.abs().total_cmp(&a.elasticity.abs()));

        tracing::debug!(
            parameters = spec.parameters.len(),
            entries = entries.len(),
            baseline,
            "Sensitivity analysis complete"
        );

        Ok(SensitivityAnalysis {
            baseline_outcome: baseline,
            entries,
            tornado,
            notes,
        })
    }
}

fn tornado_bars(parameters: &[SensitivityParameter], entries: &[SensitivityEntry], baseline: f64) -> Vec<TornadoBar> {
    let mut bars: Vec<TornadoBar> = parameters
        .iter()
        .filter_map(|p| {
            let own: Vec<&SensitivityEntry> = entries.iter().filter(|e| e.parameter == p.name).collect();
            if own.is_empty() {
                return None;
            }
            let low = own.iter().map(|e| e.outcome).fold(baseline, f64::min);
            let high = own.iter().map(|e| e.outcome).fold(baseline, f64::max);
            let max_abs_elasticity = own.iter().map(|e| e.elasticity.abs()).fold(0.0, f64::max);
            Some(TornadoBar {
                parameter: p.name.clone(),
                low_outcome: low,
                high_outcome: high,
                swing: high - low,
                max_abs_elasticity,
            })
        })
        .collect();
    bars.sort_by(|a, b| b.swing.total_cmp(&a.swing));
    bars
}
