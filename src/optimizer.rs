//! Action sequencing across a time horizon
//!
//! Actions are scored by `impact / effort`, stable-sorted descending and
//! placed greedily at the earliest run of intervals with free capacity. An
//! action occupies `ceil(effort / interval_capacity)` consecutive intervals.
//! Ties keep input order, so identical input always yields the same timeline.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::config::OptimizerConfig;
use crate::error::{EngineError, Result};
use crate::models::{ActionPlan, TimeHorizon};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledAction {
    pub action_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub score: f64,
    /// Position in the ranked order, 1 = highest score.
    pub sequence: usize,
    pub start_interval: usize,
    pub duration_intervals: usize,
    pub start_date: NaiveDate,
    /// Last day of the final occupied interval.
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnscheduledReason {
    /// Needs more intervals than the horizon has.
    ExceedsHorizon,
    /// Every long-enough window is at the concurrency limit.
    NoCapacity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnscheduledAction {
    pub action_id: String,
    pub score: f64,
    pub duration_intervals: usize,
    pub reason: UnscheduledReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionTimeline {
    /// In placement order (ranked order).
    pub scheduled: Vec<ScheduledAction>,
    pub unscheduled: Vec<UnscheduledAction>,
    pub interval_starts: Vec<NaiveDate>,
    /// Active actions per interval.
    pub utilization: Vec<usize>,
    #[serde(default)]
    pub max_concurrent: Option<usize>,
}

impl ActionTimeline {
    pub fn get(&self, action_id: &str) -> Option<&ScheduledAction> {
        self.scheduled.iter().find(|a| a.action_id == action_id)
    }

    pub fn is_complete(&self) -> bool {
        self.unscheduled.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActionSequenceOptimizer {
    config: OptimizerConfig,
}

impl ActionSequenceOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    fn validate(&self, actions: &[ActionPlan], max_concurrent: Option<usize>) -> Result<()> {
        if !(self.config.interval_capacity > 0.0 && self.config.interval_capacity.is_finite()) {
            return Err(EngineError::validation(format!(
                "interval capacity {} must be positive",
                self.config.interval_capacity
            )));
        }
        if max_concurrent == Some(0) {
            return Err(EngineError::validation("maxConcurrent must be at least 1"));
        }
        let mut seen = HashSet::new();
        for a in actions {
            if !seen.insert(a.action_id.as_str()) {
                return Err(EngineError::validation(format!("action {} listed twice", a.action_id)));
            }
            if !(a.estimated_effort > 0.0 && a.estimated_effort.is_finite()) {
                return Err(EngineError::validation(format!(
                    "action {} estimatedEffort {} must be positive",
                    a.action_id, a.estimated_effort
                )));
            }
            if !a.impact().is_finite() {
                return Err(EngineError::validation(format!(
                    "action {} has a non-finite impact",
                    a.action_id
                )));
            }
        }
        Ok(())
    }

    /// Intervals an action occupies, at least one.
    pub fn duration_intervals(&self, effort: f64) -> usize {
        ((effort / self.config.interval_capacity).ceil() as usize).max(1)
    }

    /// Rank and place `actions` on `horizon`. `max_concurrent` overrides the
    /// configured limit; `None` on both means unbounded.
    pub fn optimize_sequence(
        &self,
        actions: &[ActionPlan],
        horizon: &TimeHorizon,
        max_concurrent: Option<usize>,
    ) -> Result<ActionTimeline> {
        horizon.validate()?;
        let max_concurrent = max_concurrent.or(self.config.max_concurrent);
        self.validate(actions, max_concurrent)?;

        let interval_starts = horizon.interval_starts();
        let intervals = interval_starts.len();
        let limit = max_concurrent.unwrap_or(usize::MAX);

        let mut ranked: Vec<(&ActionPlan, f64)> = actions
            .iter()
            .map(|a| (a, a.impact() / a.estimated_effort))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut utilization = vec![0usize; intervals];
        let mut scheduled = Vec::new();
        let mut unscheduled = Vec::new();

        for (sequence, (action, score)) in ranked.into_iter().enumerate() {
            let duration = self.duration_intervals(action.estimated_effort);
            if duration > intervals {
                unscheduled.push(UnscheduledAction {
                    action_id: action.action_id.clone(),
                    score,
                    duration_intervals: duration,
                    reason: UnscheduledReason::ExceedsHorizon,
                });
                continue;
            }

            let start = (0..=intervals - duration)
                .find(|&s| utilization[s..s + duration].iter().all(|&load| load < limit));
            match start {
                Some(s) => {
                    utilization[s..s + duration].iter_mut().for_each(|load| *load += 1);
                    let last_end = horizon.interval_end(s + duration - 1);
                    scheduled.push(ScheduledAction {
                        action_id: action.action_id.clone(),
                        name: action.name.clone(),
                        score,
                        sequence: sequence + 1,
                        start_interval: s,
                        duration_intervals: duration,
                        start_date: interval_starts[s],
                        end_date: last_end.pred_opt().unwrap_or(last_end),
                    });
                }
                None => unscheduled.push(UnscheduledAction {
                    action_id: action.action_id.clone(),
                    score,
                    duration_intervals: duration,
                    reason: UnscheduledReason::NoCapacity,
                }),
            }
        }

        tracing::debug!(
            actions = actions.len(),
            scheduled = scheduled.len(),
            unscheduled = unscheduled.len(),
            intervals,
            "Action sequence optimized"
        );

        Ok(ActionTimeline {
            scheduled,
            unscheduled,
            interval_starts,
            utilization,
            max_concurrent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IntervalKind;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn three_quarters() -> TimeHorizon {
        TimeHorizon::new(date(2025, 1, 1), date(2025, 10, 1), IntervalKind::Quarterly).unwrap()
    }

    fn plans() -> Vec<ActionPlan> {
        vec![
            ActionPlan::new("a", 9.0, 3.0),
            ActionPlan::new("b", 6.0, 2.0),
            ActionPlan::new("c", 3.0, 1.0),
        ]
    }

    #[test]
    fn test_equal_scores_keep_input_order_and_repeat_identically() {
        let optimizer = ActionSequenceOptimizer::default();
        let first = optimizer.optimize_sequence(&plans(), &three_quarters(), None).unwrap();
        for _ in 0..5 {
            assert_eq!(optimizer.optimize_sequence(&plans(), &three_quarters(), None).unwrap(), first);
        }
        let order: Vec<&str> = first.scheduled.iter().map(|a| a.action_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(first.scheduled[0].sequence, 1);
        assert_eq!(first.scheduled[0].duration_intervals, 3);
        assert_eq!(first.scheduled[0].start_date, date(2025, 1, 1));
        assert_eq!(first.scheduled[0].end_date, date(2025, 9, 30));
        assert_eq!(first.utilization, vec![3, 2, 1]);
    }

    #[test]
    fn test_single_lane_places_best_first_and_defers_rest() {
        let optimizer = ActionSequenceOptimizer::default();
        let plans = vec![
            ActionPlan::new("slow", 4.0, 2.0),
            ActionPlan::new("quick", 3.0, 1.0),
        ];
        let timeline = optimizer.optimize_sequence(&plans, &three_quarters(), Some(1)).unwrap();
        // quick scores 3, slow scores 2
        assert_eq!(timeline.scheduled[0].action_id, "quick");
        assert_eq!(timeline.scheduled[0].start_interval, 0);
        assert_eq!(timeline.scheduled[1].action_id, "slow");
        assert_eq!(timeline.scheduled[1].start_interval, 1);
        assert_eq!(timeline.scheduled[1].start_date, date(2025, 4, 1));
        assert!(timeline.is_complete());
    }

    #[test]
    fn test_actions_that_do_not_fit_are_listed() {
        let optimizer = ActionSequenceOptimizer::default();
        let timeline = optimizer.optimize_sequence(&plans(), &three_quarters(), Some(1)).unwrap();
        assert_eq!(timeline.scheduled.len(), 1);
        assert_eq!(timeline.scheduled[0].action_id, "a");
        assert_eq!(timeline.unscheduled.len(), 2);
        assert!(timeline
            .unscheduled
            .iter()
            .all(|u| u.reason == UnscheduledReason::NoCapacity));

        let long = vec![ActionPlan::new("epic", 5.0, 7.0)];
        let timeline = optimizer.optimize_sequence(&long, &three_quarters(), None).unwrap();
        assert_eq!(timeline.unscheduled[0].reason, UnscheduledReason::ExceedsHorizon);
    }

    #[test]
    fn test_explicit_impact_overrides_priority() {
        let optimizer = ActionSequenceOptimizer::default();
        let plans = vec![
            ActionPlan::new("x", 9.0, 3.0).with_impact(1.0),
            ActionPlan::new("y", 1.0, 1.0),
        ];
        let timeline = optimizer.optimize_sequence(&plans, &three_quarters(), None).unwrap();
        assert_eq!(timeline.scheduled[0].action_id, "y");
    }

    #[test]
    fn test_interval_capacity_scales_duration() {
        let optimizer = ActionSequenceOptimizer::new(OptimizerConfig {
            interval_capacity: 2.0,
            ..Default::default()
        });
        assert_eq!(optimizer.duration_intervals(3.0), 2);
        assert_eq!(optimizer.duration_intervals(0.5), 1);
    }

    #[test]
    fn test_non_positive_effort_rejected() {
        let optimizer = ActionSequenceOptimizer::default();
        let plans = vec![ActionPlan::new("bad", 5.0, 0.0)];
        assert!(matches!(
            optimizer.optimize_sequence(&plans, &three_quarters(), None),
            Err(EngineError::Validation(_))
        ));
    }
}
