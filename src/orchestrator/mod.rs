//! Simulation orchestration
//!
//! - [`state`]: run phases and the transition rules between them
//! - [`pipeline`]: request validation, stage execution, result assembly

pub mod pipeline;
pub mod state;

pub use pipeline::{BaselineForecast, KpiOutlook, SimulationOrchestrator, SimulationRequest, SimulationResult};
pub use state::{PhaseRecord, RunPhase, RunStateMachine};
