//! Benchmark suite for Monte Carlo throughput and the full pipeline.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kpi_scenario_engine::config::{GuardConfig, MonteCarloConfig};
use kpi_scenario_engine::models::{
    ActionAssumption, ActionImpact, KpiProfile, MonteCarloSettings, Scenario,
};
use kpi_scenario_engine::simulation::{KpiBaseline, ScenarioModel};
use kpi_scenario_engine::{CancellationToken, KpiSeries, MonteCarloSimulator, Period};

fn create_fixture(actions: usize, kpis: usize) -> (Scenario, ScenarioModel) {
    let baselines: Vec<KpiBaseline> = (0..kpis)
        .map(|k| {
            let values: Vec<f64> = (0..8).map(|i| 40.0 + k as f64 + i as f64 * 2.0).collect();
            let series = KpiSeries::from_values(format!("kpi{}", k), Period::quarter(2023, 1).unwrap(), &values)
                .unwrap();
            KpiBaseline::from_profile(&KpiProfile::new(series, 100.0), None)
        })
        .collect();

    let scenario = Scenario {
        id: "bench".to_string(),
        name: "Bench".to_string(),
        probability: 1.0,
        actions: (0..actions)
            .map(|a| ActionAssumption {
                action_id: format!("a{}", a),
                assumed_completion: 30.0 + (a * 7 % 60) as f64,
                estimated_impact: 0.0,
                category: "process".to_string(),
            })
            .collect(),
    };

    let impacts: Vec<ActionImpact> = (0..actions)
        .flat_map(|a| {
            (0..kpis).filter(move |k| (a + k) % 2 == 0).map(move |k| ActionImpact {
                action_id: format!("a{}", a),
                kpi_id: format!("kpi{}", k),
                impact_score: 0.1 + (a % 5) as f64 * 0.1,
            })
        })
        .collect();

    let model = ScenarioModel::build(&scenario, &baselines, &impacts);
    (scenario, model)
}

fn bench_simulate_scenario(c: &mut Criterion) {
    let (scenario, model) = create_fixture(10, 6);
    let simulator = MonteCarloSimulator::new(MonteCarloConfig::default(), GuardConfig::default());
    let cancel = CancellationToken::new();

    let mut group = c.benchmark_group("MonteCarlo");

    for iterations in [1_000u64, 10_000, 50_000].iter() {
        let settings = MonteCarloSettings {
            iterations: *iterations,
            seed: Some(42),
            ..Default::default()
        };
        group.bench_with_input(BenchmarkId::new("simulate_scenario", iterations), &settings, |b, settings| {
            b.iter(|| {
                simulator
                    .simulate_scenario(black_box(&scenario), 0, black_box(&model), settings, 42, &cancel)
                    .unwrap()
            });
        });
    }

    group.finish();
}

fn bench_batch_size(c: &mut Criterion) {
    let (scenario, model) = create_fixture(10, 6);
    let cancel = CancellationToken::new();
    let settings = MonteCarloSettings {
        iterations: 20_000,
        seed: Some(42),
        ..Default::default()
    };

    let mut group = c.benchmark_group("BatchSize");

    for batch_size in [64u64, 512, 4_096].iter() {
        let simulator = MonteCarloSimulator::new(
            MonteCarloConfig {
                batch_size: *batch_size,
                ..Default::default()
            },
            GuardConfig::default(),
        );
        group.bench_with_input(BenchmarkId::from_parameter(batch_size), &simulator, |b, simulator| {
            b.iter(|| {
                simulator
                    .simulate_scenario(&scenario, 0, &model, black_box(&settings), 42, &cancel)
                    .unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_simulate_scenario, bench_batch_size);
criterion_main!(benches);
