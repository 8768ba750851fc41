//! Sensitivity Analysis Tests
//!
//! - Elasticity zero-guards (zero variation, zero baseline)
//! - Linear and exponential responses, free and bound
//! - Binding of `<action>.completion` / `<action>.impact` to scenario models
//! - Ranking and tornado ordering

use crate::analysis::sensitivity::*;
use crate::config::SensitivityConfig;
use crate::diagnostics::DiagnosticKind;
use crate::models::{
    ActionAssumption, ActionImpact, ImpactKind, KpiProfile, KpiSeries, Period, Scenario, SensitivityParameter,
    SensitivityRanges, SensitivitySpec,
};
use crate::simulation::{KpiBaseline, ScenarioModel};

/// Outcome fixed at a constant, nothing bound.
struct ConstantOutcome(f64);

impl OutcomeModel for ConstantOutcome {
    fn baseline_outcome(&self) -> f64 {
        self.0
    }

    fn shifted_outcome(&self, _binding: &ParameterBinding, _factor: f64) -> Option<f64> {
        None
    }
}

fn param(name: &str, variations: &[f64], impact: ImpactKind) -> SensitivityParameter {
    SensitivityParameter {
        name: name.to_string(),
        baseline: 1.0,
        variations: variations.to_vec(),
        impact,
    }
}

fn spec(parameters: Vec<SensitivityParameter>) -> SensitivitySpec {
    SensitivitySpec {
        parameters,
        ranges: SensitivityRanges::default(),
    }
}

fn scenario_model() -> ScenarioModel {
    let series = KpiSeries::from_values("oee", Period::quarter(2024, 1).unwrap(), &[60.0]).unwrap();
    let kpis = vec![KpiBaseline::from_profile(&KpiProfile::new(series, 100.0), None)];
    let scenario = Scenario {
        id: "s1".to_string(),
        name: "Lean rollout".to_string(),
        probability: 1.0,
        actions: vec![
            ActionAssumption {
                action_id: "smed".to_string(),
                assumed_completion: 50.0,
                estimated_impact: 0.0,
                category: "setup".to_string(),
            },
            ActionAssumption {
                action_id: "tpm".to_string(),
                assumed_completion: 50.0,
                estimated_impact: 0.0,
                category: "maintenance".to_string(),
            },
        ],
    };
    let impacts = vec![
        ActionImpact {
            action_id: "smed".to_string(),
            kpi_id: "oee".to_string(),
            impact_score: 0.6,
        },
        ActionImpact {
            action_id: "tpm".to_string(),
            kpi_id: "oee".to_string(),
            impact_score: 0.2,
        },
    ];
    ScenarioModel::build(&scenario, &kpis, &impacts)
}

// =============================================================================
// ZERO GUARDS
// =============================================================================

#[test]
fn test_zero_variation_yields_zero_elasticity() {
    let analyzer = SensitivityAnalyzer::default();
    let result = analyzer
        .analyze_sensitivity(
            &ConstantOutcome(10.0),
            &spec(vec![
                param("budget", &[-10.0, 0.0, 10.0], ImpactKind::Linear),
                param("headcount", &[0.0, 25.0], ImpactKind::Exponential),
            ]),
        )
        .unwrap();
    let zero_entries: Vec<_> = result.entries.iter().filter(|e| e.variation == 0.0).collect();
    assert_eq!(zero_entries.len(), 2);
    assert!(zero_entries.iter().all(|e| e.elasticity == 0.0));
}

#[test]
fn test_zero_baseline_reports_zero_with_note() {
    let result = SensitivityAnalyzer::default()
        .analyze_sensitivity(
            &ConstantOutcome(0.0),
            &spec(vec![param("budget", &[-10.0, 10.0], ImpactKind::Linear)]),
        )
        .unwrap();
    assert!(result.entries.iter().all(|e| e.elasticity == 0.0));
    assert!(result.notes.has_kind(DiagnosticKind::ZeroBaseline));
}

// =============================================================================
// SHIFT FACTORS
// =============================================================================

#[test]
fn test_free_linear_parameter_has_unit_elasticity() {
    let result = SensitivityAnalyzer::default()
        .analyze_sensitivity(
            &ConstantOutcome(20.0),
            &spec(vec![param("budget", &[-20.0, 10.0], ImpactKind::Linear)]),
        )
        .unwrap();
    for e in &result.entries {
        assert!((e.elasticity - 1.0).abs() < 1e-9, "{:?}", e);
    }
    let down = result.entries.iter().find(|e| e.variation == -20.0).unwrap();
    assert!((down.outcome - 16.0).abs() < 1e-9);
}

#[test]
fn test_exponential_factor_uses_configured_exponent() {
    let analyzer = SensitivityAnalyzer::new(SensitivityConfig { exponential_k: 2.0 });
    assert!((analyzer.shift_factor(ImpactKind::Exponential, 10.0) - 1.21).abs() < 1e-12);
    assert!((analyzer.shift_factor(ImpactKind::Linear, 10.0) - 1.1).abs() < 1e-12);

    let result = analyzer
        .analyze_sensitivity(
            &ConstantOutcome(100.0),
            &spec(vec![param("yield", &[10.0], ImpactKind::Exponential)]),
        )
        .unwrap();
    // (1.21 - 1) * 100 / 10
    assert!((result.entries[0].elasticity - 2.1).abs() < 1e-9);
    assert!((result.entries[0].parameter_value - 1.1).abs() < 1e-12);
}

#[test]
fn test_exponential_bound_parameter_moves_by_variation() {
    let model = scenario_model();
    let analyzer = SensitivityAnalyzer::new(SensitivityConfig { exponential_k: 2.0 });
    let result = analyzer
        .analyze_sensitivity(
            &model,
            &spec(vec![
                param("smed.completion", &[10.0], ImpactKind::Exponential),
                param("tpm.completion", &[10.0], ImpactKind::Linear),
            ]),
        )
        .unwrap();

    let smed = result.entries.iter().find(|e| e.parameter == "smed.completion").unwrap();
    // completion 50 -> 55 lifts the outcome 16 -> 17.2, a ratio of 1.075 squared
    assert!((smed.parameter_value - 1.1).abs() < 1e-12);
    assert!((smed.outcome - 16.0 * 1.075 * 1.075).abs() < 1e-9);
    assert!((smed.elasticity - (1.075f64.powi(2) - 1.0) * 100.0 / 10.0).abs() < 1e-9);

    // tpm: 4 * 1.1 + 12 = 16.4, a 2.5% move on a 10% shift
    let tpm = result.entries.iter().find(|e| e.parameter == "tpm.completion").unwrap();
    assert!((tpm.outcome - 16.4).abs() < 1e-9);
    assert!((tpm.elasticity - 0.25).abs() < 1e-9);
}

#[test]
fn test_out_of_range_variations_are_skipped() {
    let mut s = spec(vec![param("budget", &[-50.0, 10.0, 80.0], ImpactKind::Linear)]);
    s.ranges = SensitivityRanges {
        min_pct: -30.0,
        max_pct: 30.0,
    };
    let result = SensitivityAnalyzer::default()
        .analyze_sensitivity(&ConstantOutcome(5.0), &s)
        .unwrap();
    assert_eq!(result.entries.len(), 1);
    assert!(result.notes.has_kind(DiagnosticKind::SkippedInput));
}

// =============================================================================
// BINDING
// =============================================================================

#[test]
fn test_binding_parse() {
    assert_eq!(
        ParameterBinding::parse("smed.completion"),
        ParameterBinding::Completion("smed".to_string())
    );
    assert_eq!(
        ParameterBinding::parse("line.4.impact"),
        ParameterBinding::Impact("line.4".to_string())
    );
    assert_eq!(ParameterBinding::parse("budget"), ParameterBinding::Free);
    assert_eq!(ParameterBinding::parse(".completion"), ParameterBinding::Free);
}

#[test]
fn test_bound_parameters_rank_by_contribution() {
    let model = scenario_model();
    // smed: 0.6*0.5*40 = 12, tpm: 0.2*0.5*40 = 4, baseline 16
    assert!((model.expected_outcome() - 16.0).abs() < 1e-9);

    let result = SensitivityAnalyzer::default()
        .analyze_sensitivity(
            &model,
            &spec(vec![
                param("tpm.completion", &[-10.0, 10.0], ImpactKind::Linear),
                param("smed.completion", &[-10.0, 10.0], ImpactKind::Linear),
            ]),
        )
        .unwrap();

    // smed carries 12/16 of the outcome, tpm 4/16
    assert_eq!(result.ranked_parameters(), vec!["smed.completion", "tpm.completion"]);
    assert!((result.entries[0].elasticity.abs() - 0.75).abs() < 1e-9);
    assert_eq!(result.tornado[0].parameter, "smed.completion");
    assert!(result.tornado[0].swing > result.tornado[1].swing);
}

#[test]
fn test_impact_binding_clamps_scores() {
    let model = scenario_model();
    let result = SensitivityAnalyzer::default()
        .analyze_sensitivity(&model, &spec(vec![param("smed.impact", &[100.0], ImpactKind::Linear)]))
        .unwrap();
    // 0.6 doubled clamps at 1.0: 1.0*0.5*40 + 4 = 24
    assert!((result.entries[0].outcome - 24.0).abs() < 1e-9);
}

#[test]
fn test_unbound_action_parameter_is_skipped() {
    let model = scenario_model();
    let result = SensitivityAnalyzer::default()
        .analyze_sensitivity(&model, &spec(vec![param("kaizen.completion", &[10.0], ImpactKind::Linear)]))
        .unwrap();
    assert!(result.entries.is_empty());
    assert!(result.notes.has_kind(DiagnosticKind::SkippedInput));
}

#[test]
fn test_tornado_text_lists_parameters() {
    let result = SensitivityAnalyzer::default()
        .analyze_sensitivity(
            &ConstantOutcome(8.0),
            &spec(vec![param("budget", &[-10.0, 10.0], ImpactKind::Linear)]),
        )
        .unwrap();
    let text = result.format_text();
    assert!(text.contains("TORNADO"));
    assert!(text.contains("budget"));
}
