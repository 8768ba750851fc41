//! Diagnostic notes attached to engine outputs
//!
//! Every numeric value that leaves the engine passes through the guards in
//! this module. A non-finite or out-of-range value is replaced, never
//! propagated, and a [`Diagnostic`] records what happened.

use serde::{Deserialize, Serialize};

/// What kind of correction or fallback was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// NaN or infinity replaced by a fallback value.
    NonFiniteValue,
    /// Finite value pulled back into its allowed range.
    ClampedValue,
    /// Singular regression system, mean-model used instead.
    SingularMatrix,
    /// Series without variance, correlation or strength reported as zero.
    ZeroVariance,
    /// Elasticity undefined because the baseline outcome is zero.
    ZeroBaseline,
    /// Input entry ignored (out-of-range variation, missing mapping, ...).
    SkippedInput,
    /// Baseline fell back to the last observation instead of a forecast.
    ForecastFallback,
}

impl DiagnosticKind {
    /// An output value was altered rather than an input skipped or a
    /// fallback chosen. These log at warn.
    pub fn is_correction(self) -> bool {
        matches!(self, Self::NonFiniteValue | Self::ClampedValue | Self::SingularMatrix)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// Component or subject the note is about (KPI id, parameter name, ...).
    pub subject: String,
    pub message: String,
}

/// Append-only collection of diagnostics for one computation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics {
    notes: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: DiagnosticKind, subject: impl Into<String>, message: impl Into<String>) {
        let note = Diagnostic {
            kind,
            subject: subject.into(),
            message: message.into(),
        };
        if note.kind.is_correction() {
            tracing::warn!(kind = ?note.kind, subject = %note.subject, "{}", note.message);
        } else {
            tracing::debug!(kind = ?note.kind, subject = %note.subject, "{}", note.message);
        }
        self.notes.push(note);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.notes.extend(other.notes);
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.notes.iter()
    }

    pub fn has_kind(&self, kind: DiagnosticKind) -> bool {
        self.notes.iter().any(|n| n.kind == kind)
    }

    /// Replace NaN/Inf with `fallback`, noting the substitution.
    pub fn finite_or(&mut self, value: f64, fallback: f64, subject: &str) -> f64 {
        if value.is_finite() {
            value
        } else {
            self.push(
                DiagnosticKind::NonFiniteValue,
                subject,
                format!("non-finite value {} replaced by {}", value, fallback),
            );
            fallback
        }
    }

    /// Guard a value and clamp it into `[min, max]`, noting any change.
    pub fn guard(&mut self, value: f64, min: f64, max: f64, subject: &str) -> f64 {
        let value = self.finite_or(value, min.max(0.0).min(max), subject);
        if value < min || value > max {
            let clamped = value.clamp(min, max);
            self.push(
                DiagnosticKind::ClampedValue,
                subject,
                format!("value {:.6} clamped to {:.6}", value, clamped),
            );
            clamped
        } else {
            value
        }
    }

    /// KPI values are non-negative.
    pub fn non_negative(&mut self, value: f64, subject: &str) -> f64 {
        self.guard(value, 0.0, f64::MAX, subject)
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.notes.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finite_values_pass_untouched() {
        let mut diag = Diagnostics::new();
        assert_eq!(diag.guard(42.0, 0.0, 100.0, "kpi"), 42.0);
        assert!(diag.is_empty());
    }

    #[test]
    fn test_nan_is_replaced_and_noted() {
        let mut diag = Diagnostics::new();
        let v = diag.guard(f64::NAN, 0.0, 100.0, "kpi");
        assert_eq!(v, 0.0);
        assert!(diag.has_kind(DiagnosticKind::NonFiniteValue));
    }

    #[test]
    fn test_negative_kpi_value_clamped_to_zero() {
        let mut diag = Diagnostics::new();
        assert_eq!(diag.non_negative(-3.5, "oee"), 0.0);
        assert!(diag.has_kind(DiagnosticKind::ClampedValue));
        assert_eq!(diag.len(), 1);
    }

    #[test]
    fn test_infinity_clamped_into_range() {
        let mut diag = Diagnostics::new();
        let v = diag.guard(f64::INFINITY, 0.0, 150.0, "achievement");
        assert_eq!(v, 0.0);
        assert_eq!(diag.len(), 1);
    }

    #[test]
    fn test_guard_corrections_are_warn_level() {
        let mut diag = Diagnostics::new();
        diag.guard(f64::NAN, 0.0, 100.0, "kpi");
        diag.guard(120.0, 0.0, 100.0, "kpi");
        diag.push(DiagnosticKind::ForecastFallback, "scrap", "held at last observation");
        let corrections: Vec<bool> = diag.iter().map(|n| n.kind.is_correction()).collect();
        assert_eq!(corrections, vec![true, true, false]);
    }
}
