//! Run state machine
//!
//! ```text
//! VALIDATING ─▶ FORECASTING ─▶ SIMULATING ─▶ ANALYZING_SENSITIVITY ─▶ OPTIMIZING ─▶ COMPLETED
//!      └──────────────┴──────────────┴──────────────────┴────────────────┴──────▶ FAILED
//! ```
//!
//! Forward moves go one stage at a time. Any non-terminal phase may fail.
//! `COMPLETED` and `FAILED` accept nothing.

use chrono::{DateTime, Utc};
use metrics::histogram;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

use crate::error::{EngineError, Result};

// =============================================================================
// PHASES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Request checks before any computation
    Validating,
    /// Baseline forecasts and KPI correlations
    Forecasting,
    /// Monte Carlo over every scenario
    Simulating,
    AnalyzingSensitivity,
    /// Action timeline
    Optimizing,
    Completed,
    Failed,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validating => "VALIDATING",
            Self::Forecasting => "FORECASTING",
            Self::Simulating => "SIMULATING",
            Self::AnalyzingSensitivity => "ANALYZING_SENSITIVITY",
            Self::Optimizing => "OPTIMIZING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(&self, next: RunPhase) -> bool {
        use RunPhase::*;
        match (*self, next) {
            (Completed | Failed, _) => false,
            (_, Failed) => true,
            (Validating, Forecasting)
            | (Forecasting, Simulating)
            | (Simulating, AnalyzingSensitivity)
            | (AnalyzingSensitivity, Optimizing)
            | (Optimizing, Completed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a run's phase log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseRecord {
    pub phase: RunPhase,
    pub entered_at: DateTime<Utc>,
    /// Time spent in the phase; `None` for the phase the run ended in.
    #[serde(default)]
    pub duration_ms: Option<f64>,
}

// =============================================================================
// STATE MACHINE
// =============================================================================

#[derive(Debug)]
pub struct RunStateMachine {
    phase: RunPhase,
    entered: Instant,
    history: Vec<PhaseRecord>,
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateMachine {
    /// Starts in `VALIDATING`.
    pub fn new() -> Self {
        Self {
            phase: RunPhase::Validating,
            entered: Instant::now(),
            history: vec![PhaseRecord {
                phase: RunPhase::Validating,
                entered_at: Utc::now(),
                duration_ms: None,
            }],
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn history(&self) -> &[PhaseRecord] {
        &self.history
    }

    pub fn into_history(self) -> Vec<PhaseRecord> {
        self.history
    }

    pub fn transition(&mut self, next: RunPhase) -> Result<()> {
        let from = self.phase;
        if !from.can_transition_to(next) {
            return Err(EngineError::IllegalTransition {
                from: from.as_str(),
                to: next.as_str(),
            });
        }

        let elapsed = self.entered.elapsed();
        histogram!("kpi_engine.phase.seconds", elapsed.as_secs_f64(), "phase" => from.as_str());
        if let Some(current) = self.history.last_mut() {
            current.duration_ms = Some(elapsed.as_secs_f64() * 1_000.0);
        }

        self.phase = next;
        self.entered = Instant::now();
        self.history.push(PhaseRecord {
            phase: next,
            entered_at: Utc::now(),
            duration_ms: None,
        });

        info!(from = %from, to = %next, "simulation_phase");
        Ok(())
    }

    /// Move to `FAILED` unless already terminal.
    pub fn fail(&mut self) {
        if !self.phase.is_terminal() {
            // never rejected from a non-terminal phase
            let _ = self.transition(RunPhase::Failed);
        }
    }
}
