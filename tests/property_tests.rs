//! Property-based tests for the engine's numeric invariants.
//!
//! These tests use proptest to check invariants across generated series,
//! variation lists and action catalogs.

use chrono::NaiveDate;
use proptest::prelude::*;

use kpi_scenario_engine::analysis::{OutcomeModel, ParameterBinding};
use kpi_scenario_engine::forecast::ModelParameters;
use kpi_scenario_engine::models::{
    ActionPlan, ImpactKind, IntervalKind, SensitivityParameter, SensitivityRanges, SensitivitySpec,
};
use kpi_scenario_engine::{
    perform_seasonal_decomposition, ActionSequenceOptimizer, CorrelationAnalyzer, KpiSeries, ModelRegistry, Period,
    SensitivityAnalyzer, TimeHorizon, TimeSeriesForecaster,
};

fn series(kpi_id: &str, values: &[f64]) -> KpiSeries {
    KpiSeries::from_values(kpi_id, Period::quarter(2020, 1).unwrap(), values).unwrap()
}

fn values_strategy(min_len: usize, max_len: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(0.0f64..1_000.0, min_len..max_len)
}

struct FixedOutcome(f64);

impl OutcomeModel for FixedOutcome {
    fn baseline_outcome(&self) -> f64 {
        self.0
    }

    fn shifted_outcome(&self, _binding: &ParameterBinding, _factor: f64) -> Option<f64> {
        None
    }
}

// Property: correlation is symmetric and bounded
proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn correlation_is_symmetric_and_bounded(
        pairs in prop::collection::vec((0.0f64..1_000.0, 0.0f64..1_000.0), 3..24)
    ) {
        let (xs, ys): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();
        let a = series("a", &xs);
        let b = series("b", &ys);
        let analyzer = CorrelationAnalyzer::default();

        let ab = analyzer.analyze_correlations(&[a.clone(), b.clone()]);
        let ba = analyzer.analyze_correlations(&[b, a]);
        let r_ab = ab.get("a", "b").unwrap();
        let r_ba = ba.get("b", "a").unwrap();

        prop_assert!((r_ab - r_ba).abs() < 1e-12, "{} vs {}", r_ab, r_ba);
        prop_assert!(r_ab.abs() <= 1.0);
    }
}

// Property: seasonal components add back up to the original series
proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn seasonal_components_round_trip(values in values_strategy(8, 40)) {
        let d = perform_seasonal_decomposition(&series("oee", &values), 4).unwrap();
        let interior: Vec<usize> = d.interior().collect();
        prop_assert!(!interior.is_empty());
        for i in interior {
            let trend = d.trend[i].unwrap();
            let residual = d.residual[i].unwrap();
            let rebuilt = trend + d.seasonal[i] + residual;
            prop_assert!((rebuilt - values[i]).abs() < 1e-6, "index {}: {} vs {}", i, rebuilt, values[i]);
        }
        prop_assert!((0.0..=1.0).contains(&d.seasonal_strength));
    }
}

// Property: a zero variation never reports a non-zero elasticity
proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn zero_variation_has_zero_elasticity(
        baseline in -500.0f64..500.0,
        mut variations in prop::collection::vec(-90.0f64..200.0, 0..6),
        exponential in any::<bool>(),
    ) {
        variations.push(0.0);
        let spec = SensitivitySpec {
            parameters: vec![SensitivityParameter {
                name: "budget".to_string(),
                baseline: 1.0,
                variations,
                impact: if exponential { ImpactKind::Exponential } else { ImpactKind::Linear },
            }],
            ranges: SensitivityRanges::default(),
        };
        let result = SensitivityAnalyzer::default()
            .analyze_sensitivity(&FixedOutcome(baseline), &spec)
            .unwrap();
        for entry in result.entries.iter().filter(|e| e.variation == 0.0) {
            prop_assert_eq!(entry.elasticity, 0.0);
        }
        prop_assert!(result.entries.iter().all(|e| e.elasticity.is_finite()));
    }
}

// Property: increasing history never yields a falling linear trend
proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn increasing_series_has_non_negative_slope(
        start in 0.0f64..100.0,
        steps in prop::collection::vec(0.01f64..20.0, 5..30),
    ) {
        let mut values = vec![start];
        for s in steps {
            let next = values[values.len() - 1] + s;
            values.push(next);
        }
        let registry = ModelRegistry::new();
        let id = TimeSeriesForecaster::default()
            .train_linear_regression(&registry, &series("oee", &values))
            .unwrap();
        match registry.get(&id).unwrap().parameters {
            ModelParameters::Linear { slope, .. } => prop_assert!(slope >= 0.0, "slope {}", slope),
            ref other => prop_assert!(false, "unexpected parameters {:?}", other),
        }
    }
}

// Property: the optimizer is deterministic and places higher scores first
proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn optimizer_is_deterministic(
        plans in prop::collection::vec((0.0f64..10.0, 0.5f64..6.0), 1..12),
        max_concurrent in prop::option::of(1usize..4),
    ) {
        let plans: Vec<ActionPlan> = plans
            .into_iter()
            .enumerate()
            .map(|(i, (priority, effort))| ActionPlan::new(format!("a{}", i), priority, effort))
            .collect();
        let horizon = TimeHorizon::new(
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            IntervalKind::Monthly,
        )
        .unwrap();
        let optimizer = ActionSequenceOptimizer::default();

        let first = optimizer.optimize_sequence(&plans, &horizon, max_concurrent).unwrap();
        let second = optimizer.optimize_sequence(&plans, &horizon, max_concurrent).unwrap();
        prop_assert_eq!(&first, &second);

        prop_assert_eq!(first.scheduled.len() + first.unscheduled.len(), plans.len());
        prop_assert!(first.scheduled.windows(2).all(|w| w[0].score >= w[1].score));
        if let Some(limit) = max_concurrent {
            prop_assert!(first.utilization.iter().all(|&load| load <= limit));
        }
    }
}
