//! Cross-KPI and cross-parameter analysis
//!
//! - [`correlation`]: pairwise Pearson correlation, related-KPI lookup
//! - [`sensitivity`]: elasticity ranking and tornado bars

pub mod correlation;
pub mod sensitivity;
#[cfg(test)]
mod sensitivity_tests;

pub use correlation::{
    CorrelationAnalyzer, CorrelationMatrix, CorrelationPair, RelatedKpi, RelationDirection, RelationStrength,
};
pub use sensitivity::{
    OutcomeModel, ParameterBinding, SensitivityAnalysis, SensitivityAnalyzer, SensitivityEntry, TornadoBar,
};
