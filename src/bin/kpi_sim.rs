//! KPI Simulation CLI
//!
//! Runs the engine on JSON payloads from disk.
//!
//! # Usage
//!
//! ```bash
//! kpi-sim simulate  --request request.json --output result.json
//! kpi-sim forecast  --series oee.json --periods 4 --seasonal
//! kpi-sim decompose --series oee.json --period 4
//! kpi-sim correlate --series oee.json scrap.json
//! ```
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 2: Configuration or validation error
//! - 3: Runtime error (I/O, cancelled run, numeric failure)
//!
//! Environment:
//!   KPI_ENGINE_CONFIG_PATH - Engine config TOML (default: kpi_engine.toml)
//!   RUST_LOG - Log filter (default: kpi_scenario_engine=info)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kpi_scenario_engine::forecast::ForecastOptions;
use kpi_scenario_engine::{
    CancellationToken, CorrelationAnalyzer, EngineConfig, EngineError, KpiSeries, ModelRegistry,
    SeasonalDecomposer, SimulationOrchestrator, SimulationRequest, TimeSeriesForecaster,
};

// =============================================================================
// CLI ARGUMENTS
// =============================================================================

#[derive(Parser, Debug)]
#[command(name = "kpi-sim")]
#[command(about = "KPI scenario simulation and forecasting engine", version)]
struct Args {
    /// Engine config TOML; falls back to KPI_ENGINE_CONFIG_PATH, then defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full scenario pipeline on a request payload
    Simulate {
        #[arg(long)]
        request: PathBuf,

        /// Write the result here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Forecast one KPI series
    Forecast {
        #[arg(long)]
        series: PathBuf,

        #[arg(long, default_value = "4")]
        periods: usize,

        #[arg(long, default_value = "false")]
        seasonal: bool,
    },

    /// Split one KPI series into trend, seasonal and residual parts
    Decompose {
        #[arg(long)]
        series: PathBuf,

        #[arg(long)]
        period: Option<usize>,
    },

    /// Pairwise correlation across KPI series
    Correlate {
        /// Files holding one series or an array of series
        #[arg(long, num_args = 1.., required = true)]
        series: Vec<PathBuf>,
    },
}

/// A file holding either one series or several.
#[derive(Deserialize)]
#[serde(untagged)]
enum SeriesFile {
    One(KpiSeries),
    Many(Vec<KpiSeries>),
}

// =============================================================================
// COMMANDS
// =============================================================================

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let value = serde_json::from_str(&contents).map_err(EngineError::from)?;
    Ok(value)
}

fn emit<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), "Result written");
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn simulate(config: EngineConfig, request: &Path, output: Option<&Path>) -> Result<()> {
    let request: SimulationRequest = read_json(request)?;
    let orchestrator = SimulationOrchestrator::new(config);
    let result = orchestrator
        .run_advanced_simulation_async(request, CancellationToken::new())
        .await?;
    emit(&result, output)
}

fn forecast(config: EngineConfig, series: &Path, periods: usize, seasonal: bool) -> Result<()> {
    let series: KpiSeries = read_json(series)?;
    let registry = ModelRegistry::new();
    let forecaster = TimeSeriesForecaster::new(config.forecast);
    let forecast = forecaster.generate_forecast(&registry, &series, periods, &ForecastOptions { seasonal })?;
    emit(&forecast, None)
}

fn decompose(config: EngineConfig, series: &Path, period: Option<usize>) -> Result<()> {
    let series: KpiSeries = read_json(series)?;
    let decomposition = SeasonalDecomposer::new(&config.forecast).decompose(&series, period)?;
    emit(&decomposition, None)
}

fn correlate(config: EngineConfig, paths: &[PathBuf]) -> Result<()> {
    let mut all = Vec::new();
    for path in paths {
        match read_json::<SeriesFile>(path)? {
            SeriesFile::One(s) => all.push(s),
            SeriesFile::Many(many) => all.extend(many),
        }
    }
    let matrix = CorrelationAnalyzer::new(config.correlation).analyze_correlations(&all);
    emit(&matrix, None)
}

/// 2 for bad input or config, 3 for everything else.
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<EngineError>() {
        Some(EngineError::Serialization(_)) => 2,
        Some(e) if e.is_input_error() => 2,
        _ => 3,
    }
}

/// Initialize tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kpi_scenario_engine=info,kpi_sim=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() {
    let _ = dotenv::dotenv();
    init_tracing();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match EngineConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config {}: {:#}", path.display(), e);
                std::process::exit(2);
            }
        },
        None => EngineConfig::from_env(),
    };

    let result = match args.command {
        Command::Simulate { request, output } => simulate(config, &request, output.as_deref()).await,
        Command::Forecast {
            series,
            periods,
            seasonal,
        } => forecast(config, &series, periods, seasonal),
        Command::Decompose { series, period } => decompose(config, &series, period),
        Command::Correlate { series } => correlate(config, &series),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(exit_code(&e));
    }
}
