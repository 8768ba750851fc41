//! Outcome distributions
//!
//! Summaries of Monte Carlo draws: moments, standard error, a percentile
//! confidence interval and an equal-width histogram. Samples may carry
//! weights, which is how scenario distributions are combined into the
//! probability-weighted aggregate.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    /// Sum of sample weights in the bin (sample count when unweighted).
    pub weight: f64,
    pub probability: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p5: f64,
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeDistribution {
    pub samples: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub std_error: f64,
    pub min: f64,
    pub max: f64,
    pub confidence_level: f64,
    pub lower: f64,
    pub upper: f64,
    pub percentiles: Percentiles,
    /// Probability mass strictly above zero.
    pub probability_positive: f64,
    pub histogram: Vec<HistogramBin>,
}

/// Weighted nearest-rank percentile over `(value, weight)` sorted by value.
/// `p` in `[0, 1]`.
fn weighted_percentile(sorted: &[(f64, f64)], total: f64, p: f64) -> f64 {
    let target = p.clamp(0.0, 1.0) * total;
    let tolerance = total * 1e-12;
    let mut cumulative = 0.0;
    for &(value, weight) in sorted {
        cumulative += weight;
        if cumulative + tolerance >= target {
            return value;
        }
    }
    sorted.last().map(|(v, _)| *v).unwrap_or(0.0)
}

/// Nearest-rank percentile of an ascending slice, `p` in `[0, 1]`.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p.clamp(0.0, 1.0) * sorted.len() as f64 - 1e-9).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

impl OutcomeDistribution {
    /// Unweighted summary of raw draws.
    pub fn from_samples(samples: &[f64], confidence_level: f64, bins: usize) -> Self {
        let weighted: Vec<(f64, f64)> = samples.iter().map(|&v| (v, 1.0)).collect();
        Self::from_weighted(weighted, confidence_level, bins)
    }

    /// Mixture of several sample sets, each group scaled to its weight.
    /// Groups with zero total weight are ignored; all-zero weights fall back
    /// to equal weighting.
    pub fn mixture(groups: &[(f64, &[f64])], confidence_level: f64, bins: usize) -> Self {
        let total_weight: f64 = groups.iter().map(|(w, _)| w.max(0.0)).sum();
        let equal = total_weight <= f64::EPSILON;

        let mut weighted = Vec::with_capacity(groups.iter().map(|(_, s)| s.len()).sum());
        for (weight, samples) in groups {
            if samples.is_empty() {
                continue;
            }
            let group_weight = if equal { 1.0 } else { weight.max(0.0) };
            let per_sample = group_weight / samples.len() as f64;
            if per_sample <= 0.0 {
                continue;
            }
            weighted.extend(samples.iter().map(|&v| (v, per_sample)));
        }
        Self::from_weighted(weighted, confidence_level, bins)
    }

    fn from_weighted(mut points: Vec<(f64, f64)>, confidence_level: f64, bins: usize) -> Self {
        points.retain(|(v, w)| v.is_finite() && w.is_finite() && *w > 0.0);
        if points.is_empty() {
            return Self {
                confidence_level,
                ..Default::default()
            };
        }
        points.sort_by(|a, b| a.0.total_cmp(&b.0));

        let total: f64 = points.iter().map(|(_, w)| w).sum();
        let mean = points.iter().map(|(v, w)| v * w).sum::<f64>() / total;
        let variance = points.iter().map(|(v, w)| w * (v - mean).powi(2)).sum::<f64>() / total;
        let std_dev = variance.max(0.0).sqrt();

        // Kish effective sample size; equals n for unit weights
        let sum_sq: f64 = points.iter().map(|(_, w)| w * w).sum();
        let effective_n = total * total / sum_sq;
        let std_error = if effective_n > 0.0 {
            std_dev / effective_n.sqrt()
        } else {
            0.0
        };

        let tail = (1.0 - confidence_level) / 2.0;
        let q = |p: f64| weighted_percentile(&points, total, p);

        let min = points[0].0;
        let max = points[points.len() - 1].0;
        let probability_positive = points
            .iter()
            .filter(|(v, _)| *v > 0.0)
            .map(|(_, w)| w)
            .sum::<f64>()
            / total;

        Self {
            samples: points.len(),
            mean,
            std_dev,
            std_error,
            min,
            max,
            confidence_level,
            lower: q(tail),
            upper: q(1.0 - tail),
            percentiles: Percentiles {
                p5: q(0.05),
                p10: q(0.10),
                p25: q(0.25),
                p50: q(0.50),
                p75: q(0.75),
                p90: q(0.90),
                p95: q(0.95),
            },
            probability_positive,
            histogram: histogram(&points, total, min, max, bins),
        }
    }

    /// Fraction of `samples` inside `[lower, upper]`.
    pub fn coverage(&self, samples: &[f64]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let inside = samples
            .iter()
            .filter(|v| **v >= self.lower && **v <= self.upper)
            .count();
        inside as f64 / samples.len() as f64
    }
}

fn histogram(points: &[(f64, f64)], total: f64, min: f64, max: f64, bins: usize) -> Vec<HistogramBin> {
    let bins = bins.max(1);
    let span = max - min;
    if span <= f64::EPSILON {
        return vec![HistogramBin {
            lower: min,
            upper: max,
            weight: total,
            probability: 1.0,
        }];
    }
    let width = span / bins as f64;
    let mut weights = vec![0.0; bins];
    for &(v, w) in points {
        let idx = (((v - min) / width) as usize).min(bins - 1);
        weights[idx] += w;
    }
    weights
        .into_iter()
        .enumerate()
        .map(|(i, weight)| HistogramBin {
            lower: min + width * i as f64,
            upper: if i + 1 == bins { max } else { min + width * (i + 1) as f64 },
            weight,
            probability: weight / total,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_grid_summary() {
        let samples: Vec<f64> = (1..=100).map(|i| i as f64).collect();
        let d = OutcomeDistribution::from_samples(&samples, 0.9, 10);
        assert_eq!(d.samples, 100);
        assert!((d.mean - 50.5).abs() < 1e-9);
        assert_eq!(d.lower, 5.0);
        assert_eq!(d.upper, 95.0);
        assert_eq!(d.percentiles.p50, 50.0);
        assert_eq!(d.histogram.len(), 10);
        let mass: f64 = d.histogram.iter().map(|b| b.probability).sum();
        assert!((mass - 1.0).abs() < 1e-9);
        assert_eq!(d.histogram[0].weight, 10.0);
    }

    #[test]
    fn test_degenerate_samples_collapse_to_point() {
        let d = OutcomeDistribution::from_samples(&[4.0; 20], 0.95, 20);
        assert_eq!(d.std_dev, 0.0);
        assert_eq!(d.lower, 4.0);
        assert_eq!(d.upper, 4.0);
        assert_eq!(d.histogram.len(), 1);
        assert_eq!(d.probability_positive, 1.0);
    }

    #[test]
    fn test_mixture_respects_weights() {
        let low = vec![0.0; 100];
        let high = vec![10.0; 50];
        let d = OutcomeDistribution::mixture(&[(0.75, &low[..]), (0.25, &high[..])], 0.95, 5);
        assert!((d.mean - 2.5).abs() < 1e-9);
        assert!((d.probability_positive - 0.25).abs() < 1e-9);
        assert_eq!(d.percentiles.p50, 0.0);
        assert_eq!(d.percentiles.p90, 10.0);
    }

    #[test]
    fn test_mixture_with_zero_weights_is_equal_weighted() {
        let a = vec![1.0; 10];
        let b = vec![3.0; 10];
        let d = OutcomeDistribution::mixture(&[(0.0, &a[..]), (0.0, &b[..])], 0.95, 5);
        assert!((d.mean - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_input() {
        let d = OutcomeDistribution::from_samples(&[], 0.95, 10);
        assert_eq!(d.samples, 0);
        assert_eq!(d.mean, 0.0);
        assert!(d.histogram.is_empty());
    }

    #[test]
    fn test_percentile_helper() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&sorted, 0.5), 2.0);
        assert_eq!(percentile(&sorted, 1.0), 4.0);
        assert_eq!(percentile(&sorted, 0.0), 1.0);
    }
}
