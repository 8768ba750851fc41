//! Pairwise KPI correlation
//!
//! Pearson r over the periods two series have in common. Pairs with fewer
//! than `min_common_periods` shared periods are not reported. Each unordered
//! pair is computed once, so `corr(A, B) == corr(B, A)` exactly.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::CorrelationConfig;
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::models::{KpiSeries, Period};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationStrength {
    Strong,
    Moderate,
    Weak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationDirection {
    Positive,
    Negative,
    None,
}

impl RelationDirection {
    fn of(r: f64) -> Self {
        if r > 0.0 {
            Self::Positive
        } else if r < 0.0 {
            Self::Negative
        } else {
            Self::None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationPair {
    pub kpi_a: String,
    pub kpi_b: String,
    pub coefficient: f64,
    pub common_periods: usize,
    pub strength: RelationStrength,
    pub direction: RelationDirection,
}

impl CorrelationPair {
    pub fn involves(&self, kpi_id: &str) -> bool {
        self.kpi_a == kpi_id || self.kpi_b == kpi_id
    }

    /// The other side of the pair, if `kpi_id` is one side.
    pub fn partner(&self, kpi_id: &str) -> Option<&str> {
        if self.kpi_a == kpi_id {
            Some(&self.kpi_b)
        } else if self.kpi_b == kpi_id {
            Some(&self.kpi_a)
        } else {
            None
        }
    }
}

/// KPI strongly related to another one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedKpi {
    pub kpi_id: String,
    pub coefficient: f64,
    pub direction: RelationDirection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationMatrix {
    pub pairs: Vec<CorrelationPair>,
    #[serde(default)]
    pub notes: Diagnostics,
}

impl CorrelationMatrix {
    /// Coefficient for an unordered pair.
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        self.pairs
            .iter()
            .find(|p| (p.kpi_a == a && p.kpi_b == b) || (p.kpi_a == b && p.kpi_b == a))
            .map(|p| p.coefficient)
    }

    pub fn strongly_related(&self) -> impl Iterator<Item = &CorrelationPair> {
        self.pairs
            .iter()
            .filter(|p| p.strength == RelationStrength::Strong)
    }

    /// Strongly related KPIs for `kpi_id`, strongest first.
    pub fn related_to(&self, kpi_id: &str) -> Vec<RelatedKpi> {
        let mut related: Vec<RelatedKpi> = self
            .strongly_related()
            .filter_map(|p| {
                p.partner(kpi_id).map(|other| RelatedKpi {
                    kpi_id: other.to_string(),
                    coefficient: p.coefficient,
                    direction: p.direction,
                })
            })
            .collect();
        related.sort_by(|a, b| b.coefficient.abs().total_cmp(&a.coefficient.abs()));
        related
    }
}

/// Pearson r, `None` when either side has no variance.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len().min(y.len());
    if n < 2 {
        return None;
    }
    let (x, y) = (&x[..n], &y[..n]);
    let mean_x = x.iter().sum::<f64>() / n as f64;
    let mean_y = y.iter().sum::<f64>() / n as f64;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx <= f64::EPSILON || syy <= f64::EPSILON {
        return None;
    }
    let r = sxy / (sxx * syy).sqrt();
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}

/// Values of `a` and `b` at their shared periods, in chronological order.
fn align(a: &KpiSeries, b: &KpiSeries) -> (Vec<f64>, Vec<f64>) {
    let lookup: HashMap<Period, f64> = b.points().iter().map(|p| (p.period, p.value)).collect();
    a.points()
        .iter()
        .filter_map(|p| lookup.get(&p.period).map(|v| (p.value, *v)))
        .unzip()
}

#[derive(Debug, Clone, Default)]
pub struct CorrelationAnalyzer {
    config: CorrelationConfig,
}

impl CorrelationAnalyzer {
    pub fn new(config: CorrelationConfig) -> Self {
        Self { config }
    }

    fn classify(&self, r: f64) -> RelationStrength {
        let abs = r.abs();
        if abs >= self.config.strong_threshold {
            RelationStrength::Strong
        } else if abs >= self.config.moderate_threshold {
            RelationStrength::Moderate
        } else {
            RelationStrength::Weak
        }
    }

    fn correlate_pair(&self, a: &KpiSeries, b: &KpiSeries) -> Option<(CorrelationPair, Diagnostics)> {
        let (xa, xb) = align(a, b);
        if xa.len() < self.config.min_common_periods {
            return None;
        }
        let mut notes = Diagnostics::new();
        let coefficient = match pearson(&xa, &xb) {
            Some(r) => r,
            None => {
                notes.push(
                    DiagnosticKind::ZeroVariance,
                    format!("{}~{}", a.kpi_id(), b.kpi_id()),
                    "zero variance over common periods, correlation reported as 0",
                );
                0.0
            }
        };
        Some((
            CorrelationPair {
                kpi_a: a.kpi_id().to_string(),
                kpi_b: b.kpi_id().to_string(),
                coefficient,
                common_periods: xa.len(),
                strength: self.classify(coefficient),
                direction: RelationDirection::of(coefficient),
            },
            notes,
        ))
    }

    /// Correlate every distinct pair of series in parallel.
    pub fn analyze_correlations(&self, series: &[KpiSeries]) -> CorrelationMatrix {
        let index_pairs: Vec<(usize, usize)> = (0..series.len())
            .flat_map(|i| (i + 1..series.len()).map(move |j| (i, j)))
            .filter(|&(i, j)| series[i].key() != series[j].key())
            .collect();

        let results: Vec<Option<(CorrelationPair, Diagnostics)>> = index_pairs
            .par_iter()
            .map(|&(i, j)| self.correlate_pair(&series[i], &series[j]))
            .collect();

        let mut matrix = CorrelationMatrix::default();
        for (pair, notes) in results.into_iter().flatten() {
            matrix.notes.extend(notes);
            matrix.pairs.push(pair);
        }
        tracing::debug!(
            series = series.len(),
            pairs = matrix.pairs.len(),
            strong = matrix.strongly_related().count(),
            "Correlation analysis complete"
        );
        matrix
    }
}
