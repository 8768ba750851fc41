//! Data model shared by every engine component
//!
//! Series, scenarios and settings arrive from the hosting service as JSON
//! payloads (camelCase). Constructors and `validate()` methods enforce the
//! invariants the numeric components rely on, so the components themselves
//! never re-check ordering or ranges.

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{EngineError, Result};

// =============================================================================
// PERIODS
// =============================================================================

/// Reporting period of a KPI observation, `YYYY-Qn` or `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Period {
    Quarter { year: i32, quarter: u8 },
    Month { year: i32, month: u8 },
}

impl Period {
    pub fn quarter(year: i32, quarter: u8) -> Result<Self> {
        if !(1..=4).contains(&quarter) {
            return Err(EngineError::validation(format!("quarter {} out of range 1-4", quarter)));
        }
        Ok(Self::Quarter { year, quarter })
    }

    pub fn month(year: i32, month: u8) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(EngineError::validation(format!("month {} out of range 1-12", month)));
        }
        Ok(Self::Month { year, month })
    }

    /// Periods elapsed since year 0 at this granularity.
    pub fn ordinal(&self) -> i64 {
        match *self {
            Self::Quarter { year, quarter } => year as i64 * 4 + (quarter as i64 - 1),
            Self::Month { year, month } => year as i64 * 12 + (month as i64 - 1),
        }
    }

    pub fn is_quarterly(&self) -> bool {
        matches!(self, Self::Quarter { .. })
    }

    pub fn same_granularity(&self, other: &Period) -> bool {
        self.is_quarterly() == other.is_quarterly()
    }

    /// The period immediately following this one.
    pub fn next(&self) -> Self {
        self.advance(1)
    }

    pub fn advance(&self, steps: u32) -> Self {
        match *self {
            Self::Quarter { .. } => {
                let ord = self.ordinal() + steps as i64;
                Self::Quarter {
                    year: ord.div_euclid(4) as i32,
                    quarter: (ord.rem_euclid(4) + 1) as u8,
                }
            }
            Self::Month { .. } => {
                let ord = self.ordinal() + steps as i64;
                Self::Month {
                    year: ord.div_euclid(12) as i32,
                    month: (ord.rem_euclid(12) + 1) as u8,
                }
            }
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quarter { year, quarter } => write!(f, "{:04}-Q{}", year, quarter),
            Self::Month { year, month } => write!(f, "{:04}-{:02}", year, month),
        }
    }
}

impl FromStr for Period {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let (year, rest) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| EngineError::validation(format!("invalid period '{}'", s)))?;
        let year: i32 = year
            .parse()
            .map_err(|_| EngineError::validation(format!("invalid year in period '{}'", s)))?;

        if let Some(q) = rest.strip_prefix('Q').or_else(|| rest.strip_prefix('q')) {
            let quarter: u8 = q
                .parse()
                .map_err(|_| EngineError::validation(format!("invalid quarter in period '{}'", s)))?;
            Self::quarter(year, quarter)
        } else {
            let month: u8 = rest
                .parse()
                .map_err(|_| EngineError::validation(format!("invalid month in period '{}'", s)))?;
            Self::month(year, month)
        }
    }
}

impl TryFrom<String> for Period {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(p: Period) -> Self {
        p.to_string()
    }
}

// =============================================================================
// KPI SERIES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KpiPoint {
    pub period: Period,
    pub value: f64,
}

/// Identity of a series: one KPI at one factory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesKey {
    pub kpi_id: String,
    pub factory_id: String,
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.kpi_id, self.factory_id)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawKpiSeries {
    kpi_id: String,
    #[serde(default)]
    factory_id: String,
    points: Vec<KpiPoint>,
}

/// Chronologically ordered KPI observations with unique periods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawKpiSeries")]
pub struct KpiSeries {
    kpi_id: String,
    factory_id: String,
    points: Vec<KpiPoint>,
}

impl TryFrom<RawKpiSeries> for KpiSeries {
    type Error = EngineError;

    fn try_from(raw: RawKpiSeries) -> Result<Self> {
        Self::new(raw.kpi_id, raw.factory_id, raw.points)
    }
}

impl KpiSeries {
    pub fn new(kpi_id: impl Into<String>, factory_id: impl Into<String>, points: Vec<KpiPoint>) -> Result<Self> {
        let kpi_id = kpi_id.into();
        if kpi_id.trim().is_empty() {
            return Err(EngineError::validation("series kpiId must not be empty"));
        }
        for pair in points.windows(2) {
            if !pair[0].period.same_granularity(&pair[1].period) {
                return Err(EngineError::validation(format!(
                    "series {} mixes quarterly and monthly periods ({} / {})",
                    kpi_id, pair[0].period, pair[1].period
                )));
            }
            if pair[1].period <= pair[0].period {
                return Err(EngineError::validation(format!(
                    "series {} is not strictly chronological at {} -> {}",
                    kpi_id, pair[0].period, pair[1].period
                )));
            }
        }
        if let Some(bad) = points.iter().find(|p| !p.value.is_finite()) {
            return Err(EngineError::validation(format!(
                "series {} has a non-finite value at {}",
                kpi_id, bad.period
            )));
        }
        Ok(Self {
            kpi_id,
            factory_id: factory_id.into(),
            points,
        })
    }

    /// Build a quarterly series starting at `start`, one value per quarter.
    pub fn from_values(kpi_id: impl Into<String>, start: Period, values: &[f64]) -> Result<Self> {
        let points = values
            .iter()
            .enumerate()
            .map(|(i, &value)| KpiPoint {
                period: start.advance(i as u32),
                value,
            })
            .collect();
        Self::new(kpi_id, "", points)
    }

    pub fn kpi_id(&self) -> &str {
        &self.kpi_id
    }

    pub fn factory_id(&self) -> &str {
        &self.factory_id
    }

    pub fn key(&self) -> SeriesKey {
        SeriesKey {
            kpi_id: self.kpi_id.clone(),
            factory_id: self.factory_id.clone(),
        }
    }

    pub fn points(&self) -> &[KpiPoint] {
        &self.points
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<&KpiPoint> {
        self.points.last()
    }

    pub fn last_period(&self) -> Option<Period> {
        self.points.last().map(|p| p.period)
    }

    /// Identifies this exact set of observations, used to reuse fitted models.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.kpi_id.hash(&mut hasher);
        self.factory_id.hash(&mut hasher);
        for p in &self.points {
            p.period.hash(&mut hasher);
            p.value.to_bits().hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// Achievement rate `value / target × 100`, clamped non-negative.
pub fn achievement_rate(value: f64, target: f64) -> f64 {
    if target <= 0.0 || !target.is_finite() || !value.is_finite() {
        return 0.0;
    }
    (value / target * 100.0).max(0.0)
}

/// A KPI's history together with its target value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiProfile {
    pub series: KpiSeries,
    pub target: f64,
    #[serde(default)]
    pub name: Option<String>,
}

impl KpiProfile {
    pub fn new(series: KpiSeries, target: f64) -> Self {
        Self {
            series,
            target,
            name: None,
        }
    }

    pub fn kpi_id(&self) -> &str {
        self.series.kpi_id()
    }

    pub fn current_value(&self) -> Option<f64> {
        self.series.last().map(|p| p.value)
    }

    pub fn current_achievement(&self) -> f64 {
        self.current_value()
            .map(|v| achievement_rate(v, self.target))
            .unwrap_or(0.0)
    }
}

/// Weight of one action on one KPI, resolved by the calling layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionImpact {
    pub action_id: String,
    pub kpi_id: String,
    /// In `[0, 1]`.
    pub impact_score: f64,
}

// =============================================================================
// MODEL IDS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(Uuid);

impl ModelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ModelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ModelId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| EngineError::validation(format!("invalid model id '{}': {}", s, e)))
    }
}

// =============================================================================
// SCENARIOS
// =============================================================================

/// Assumed execution of one improvement action within a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionAssumption {
    pub action_id: String,
    /// Percent complete, `0..=100`.
    pub assumed_completion: f64,
    #[serde(default)]
    pub estimated_impact: f64,
    #[serde(default)]
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub id: String,
    pub name: String,
    pub probability: f64,
    pub actions: Vec<ActionAssumption>,
}

impl Scenario {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(EngineError::validation("scenario id must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.probability) {
            return Err(EngineError::validation(format!(
                "scenario {} probability {} outside [0, 1]",
                self.id, self.probability
            )));
        }
        let mut seen = HashSet::new();
        for action in &self.actions {
            if !(0.0..=100.0).contains(&action.assumed_completion) {
                return Err(EngineError::validation(format!(
                    "scenario {} action {} assumedCompletion {} outside [0, 100]",
                    self.id, action.action_id, action.assumed_completion
                )));
            }
            if !seen.insert(action.action_id.as_str()) {
                return Err(EngineError::validation(format!(
                    "scenario {} lists action {} twice",
                    self.id, action.action_id
                )));
            }
        }
        Ok(())
    }
}

/// Distribution used to perturb assumed completion rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerturbationKind {
    /// Normal with σ = half-width / 2, rejected outside the symmetric window.
    #[default]
    TruncatedNormal,
    Uniform,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloSettings {
    pub iterations: u64,
    pub confidence_level: f64,
    /// Maximum deviation from the assumed completion, in percentage points.
    pub variability_factor: f64,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Falls back to the engine's configured perturbation when absent.
    #[serde(default)]
    pub perturbation: Option<PerturbationKind>,
}

impl Default for MonteCarloSettings {
    fn default() -> Self {
        Self {
            iterations: 1_000,
            confidence_level: 0.95,
            variability_factor: 10.0,
            seed: None,
            perturbation: None,
        }
    }
}

impl MonteCarloSettings {
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(EngineError::validation("iterations must be at least 1"));
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(EngineError::validation(format!(
                "confidenceLevel {} outside (0, 1)",
                self.confidence_level
            )));
        }
        if !(self.variability_factor >= 0.0 && self.variability_factor.is_finite()) {
            return Err(EngineError::validation(format!(
                "variabilityFactor {} must be a finite non-negative number",
                self.variability_factor
            )));
        }
        Ok(())
    }
}

// =============================================================================
// SENSITIVITY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactKind {
    /// Outcome moves proportionally with the parameter.
    Linear,
    /// Parameter shift enters as `(1 + v)^k`.
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitivityParameter {
    /// `<actionId>.completion`, `<actionId>.impact`, or a free-form name.
    pub name: String,
    pub baseline: f64,
    /// Percent shifts, e.g. `[-20, -10, 0, 10, 20]`.
    pub variations: Vec<f64>,
    pub impact: ImpactKind,
}

/// Accepted variation window in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitivityRanges {
    pub min_pct: f64,
    pub max_pct: f64,
}

impl Default for SensitivityRanges {
    fn default() -> Self {
        Self {
            min_pct: -100.0,
            max_pct: 1_000.0,
        }
    }
}

impl SensitivityRanges {
    pub fn contains(&self, pct: f64) -> bool {
        pct >= self.min_pct && pct <= self.max_pct
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitivitySpec {
    pub parameters: Vec<SensitivityParameter>,
    #[serde(default)]
    pub ranges: SensitivityRanges,
}

impl SensitivitySpec {
    pub fn validate(&self) -> Result<()> {
        if self.ranges.min_pct > self.ranges.max_pct {
            return Err(EngineError::validation(format!(
                "sensitivity range [{}, {}] is inverted",
                self.ranges.min_pct, self.ranges.max_pct
            )));
        }
        for p in &self.parameters {
            if p.name.trim().is_empty() {
                return Err(EngineError::validation("sensitivity parameter name must not be empty"));
            }
            if !p.baseline.is_finite() || p.variations.iter().any(|v| !v.is_finite()) {
                return Err(EngineError::validation(format!(
                    "sensitivity parameter {} has non-finite values",
                    p.name
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// TIME HORIZON AND ACTION PLANS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalKind {
    Monthly,
    Quarterly,
}

impl IntervalKind {
    pub fn months(&self) -> u32 {
        match self {
            Self::Monthly => 1,
            Self::Quarterly => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeHorizon {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub intervals: IntervalKind,
}

impl TimeHorizon {
    pub fn new(start: NaiveDate, end: NaiveDate, intervals: IntervalKind) -> Result<Self> {
        let horizon = Self { start, end, intervals };
        horizon.validate()?;
        Ok(horizon)
    }

    pub fn validate(&self) -> Result<()> {
        if self.start >= self.end {
            return Err(EngineError::validation(format!(
                "time horizon start {} must be before end {}",
                self.start, self.end
            )));
        }
        Ok(())
    }

    /// Start dates of every interval beginning before `end`.
    pub fn interval_starts(&self) -> Vec<NaiveDate> {
        let step = self.intervals.months();
        let mut starts = Vec::new();
        let mut i = 0u32;
        while let Some(date) = self.start.checked_add_months(Months::new(step * i)) {
            if date >= self.end {
                break;
            }
            starts.push(date);
            i += 1;
        }
        starts
    }

    pub fn interval_count(&self) -> usize {
        self.interval_starts().len()
    }

    /// Exclusive end of interval `index`, capped at the horizon end.
    pub fn interval_end(&self, index: usize) -> NaiveDate {
        self.start
            .checked_add_months(Months::new(self.intervals.months() * (index as u32 + 1)))
            .map(|d| d.min(self.end))
            .unwrap_or(self.end)
    }

    /// Quarters covered by the horizon, used as the baseline forecast length.
    pub fn quarters_spanned(&self) -> usize {
        let months = (self.end.year() - self.start.year()) * 12 + self.end.month() as i32
            - self.start.month() as i32;
        ((months.max(1) as f64) / 3.0).ceil() as usize
    }
}

/// Action metadata handed to the sequence optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionPlan {
    pub action_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub priority: f64,
    pub estimated_effort: f64,
    /// Falls back to `priority` when absent.
    #[serde(default)]
    pub estimated_impact: Option<f64>,
}

impl ActionPlan {
    pub fn new(action_id: impl Into<String>, priority: f64, estimated_effort: f64) -> Self {
        Self {
            action_id: action_id.into(),
            name: None,
            priority,
            estimated_effort,
            estimated_impact: None,
        }
    }

    pub fn with_impact(mut self, impact: f64) -> Self {
        self.estimated_impact = Some(impact);
        self
    }

    pub fn impact(&self) -> f64 {
        self.estimated_impact.unwrap_or(self.priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(year: i32, quarter: u8) -> Period {
        Period::quarter(year, quarter).unwrap()
    }

    #[test]
    fn test_period_parse_and_display() {
        let p: Period = "2024-Q3".parse().unwrap();
        assert_eq!(p, q(2024, 3));
        assert_eq!(p.to_string(), "2024-Q3");

        let m: Period = "2024-07".parse().unwrap();
        assert_eq!(m.to_string(), "2024-07");
        assert!(!m.is_quarterly());

        assert!("2024-Q5".parse::<Period>().is_err());
        assert!("2024".parse::<Period>().is_err());
        assert!("2024-13".parse::<Period>().is_err());
    }

    #[test]
    fn test_period_next_rolls_over_year() {
        assert_eq!(q(2023, 4).next(), q(2024, 1));
        assert_eq!(q(2023, 2).advance(5), q(2024, 3));
        let dec = Period::month(2023, 12).unwrap();
        assert_eq!(dec.next(), Period::month(2024, 1).unwrap());
    }

    #[test]
    fn test_series_rejects_unordered_periods() {
        let points = vec![
            KpiPoint { period: q(2024, 2), value: 1.0 },
            KpiPoint { period: q(2024, 1), value: 2.0 },
        ];
        assert!(KpiSeries::new("oee", "f1", points).is_err());
    }

    #[test]
    fn test_series_rejects_duplicate_periods() {
        let points = vec![
            KpiPoint { period: q(2024, 1), value: 1.0 },
            KpiPoint { period: q(2024, 1), value: 2.0 },
        ];
        assert!(KpiSeries::new("oee", "f1", points).is_err());
    }

    #[test]
    fn test_series_deserialize_enforces_invariants() {
        let ok = r#"{"kpiId":"oee","factoryId":"f1","points":[{"period":"2024-Q1","value":1.0},{"period":"2024-Q2","value":2.0}]}"#;
        let series: KpiSeries = serde_json::from_str(ok).unwrap();
        assert_eq!(series.len(), 2);

        let bad = r#"{"kpiId":"oee","factoryId":"f1","points":[{"period":"2024-Q2","value":1.0},{"period":"2024-Q1","value":2.0}]}"#;
        assert!(serde_json::from_str::<KpiSeries>(bad).is_err());
    }

    #[test]
    fn test_achievement_rate_clamped_non_negative() {
        assert_eq!(achievement_rate(80.0, 100.0), 80.0);
        assert_eq!(achievement_rate(-5.0, 100.0), 0.0);
        assert_eq!(achievement_rate(5.0, 0.0), 0.0);
        assert_eq!(achievement_rate(120.0, 100.0), 120.0);
    }

    #[test]
    fn test_time_horizon_intervals() {
        let h = TimeHorizon::new(
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
            IntervalKind::Quarterly,
        )
        .unwrap();
        assert_eq!(h.interval_count(), 4);
        assert_eq!(h.interval_end(3), NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());
        assert_eq!(h.quarters_spanned(), 4);
    }

    #[test]
    fn test_time_horizon_rejects_inverted_range() {
        let d = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        assert!(TimeHorizon::new(d, d, IntervalKind::Monthly).is_err());
    }

    #[test]
    fn test_monte_carlo_settings_validation() {
        assert!(MonteCarloSettings::default().validate().is_ok());
        let zero = MonteCarloSettings {
            iterations: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
        let bad_cl = MonteCarloSettings {
            confidence_level: 1.0,
            ..Default::default()
        };
        assert!(bad_cl.validate().is_err());
    }

    #[test]
    fn test_action_plan_impact_defaults_to_priority() {
        let plan = ActionPlan::new("a1", 9.0, 3.0);
        assert_eq!(plan.impact(), 9.0);
        assert_eq!(plan.with_impact(4.0).impact(), 4.0);
    }
}
