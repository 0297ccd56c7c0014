//! Multi-task sweeps.
//!
//! Tasks run in order over one shared [`OptimizationSetting`]. Each task adds
//! its parameter ranges, runs the grid, picks one value per parameter and pins
//! it, so later tasks optimize with earlier picks held fixed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use replaylab_core::data::SnapshotSource;
use replaylab_core::strategy::ParamSet;

use crate::config::{BacktestConfig, ConfigError, SweepConfig};
use crate::optimizer::{
    run_optimization, run_parallel_optimization, OptimizationError, OptimizationOutcome,
    OptimizationResult, OptimizationSetting,
};

/// Top-N cuts counted by [`PickRule::MostFrequent`].
pub const FREQUENCY_CUTS: [usize; 3] = [20, 10, 5];

/// How a task turns its ranked results into one value per parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickRule {
    /// The value seen most often among the top 20, top 10 and top 5 results,
    /// counted across all three cuts. Ties go to the better-ranked value.
    #[default]
    MostFrequent,
    /// The value of the single best result.
    Best,
}

/// Candidates for one parameter: an explicit list, or `start..=end` by `step`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    pub name: String,
    #[serde(default)]
    pub values: Option<Vec<Value>>,
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub end: Option<f64>,
    #[serde(default)]
    pub step: Option<f64>,
}

impl ParamRange {
    pub fn apply(&self, setting: &mut OptimizationSetting) -> Result<(), OptimizationError> {
        match (&self.values, self.start) {
            (Some(values), _) => {
                setting.add_params(&self.name, values.clone());
                Ok(())
            }
            (None, Some(start)) => setting.add_parameter(&self.name, start, self.end, self.step),
            (None, None) => Err(OptimizationError::InvalidRange {
                name: self.name.clone(),
                reason: "needs either values or start".into(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepTask {
    pub name: String,
    #[serde(default)]
    pub pick: PickRule,
    pub params: Vec<ParamRange>,
}

impl SweepTask {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.params.is_empty() {
            return Err(ConfigError::Invalid(format!("task '{}' has no params", self.name)));
        }
        let mut scratch = OptimizationSetting::new();
        for range in &self.params {
            if matches!(&range.values, Some(v) if v.is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "task '{}': parameter '{}' has an empty value list",
                    self.name, range.name
                )));
            }
            range
                .apply(&mut scratch)
                .map_err(|e| ConfigError::Invalid(format!("task '{}': {e}", self.name)))?;
        }
        Ok(())
    }
}

// ── Picking ──────────────────────────────────────────────────────────

/// Most frequent value of `name` across the top-N cuts of `results`.
pub fn pick_most_frequent(results: &[OptimizationResult], name: &str) -> Option<Value> {
    // (value, count, best rank)
    let mut counts: Vec<(Value, usize, usize)> = Vec::new();
    for cut in FREQUENCY_CUTS {
        for (rank, result) in results.iter().take(cut).enumerate() {
            let Some(value) = result.setting.get(name) else {
                continue;
            };
            match counts.iter_mut().find(|(v, _, _)| v == value) {
                Some(entry) => {
                    entry.1 += 1;
                    entry.2 = entry.2.min(rank);
                }
                None => counts.push((value.clone(), 1, rank)),
            }
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.2.cmp(&a.2)))
        .map(|(value, _, _)| value)
}

pub fn pick_best(results: &[OptimizationResult], name: &str) -> Option<Value> {
    results.first().and_then(|r| r.setting.get(name).cloned())
}

impl PickRule {
    pub fn pick(&self, results: &[OptimizationResult], name: &str) -> Option<Value> {
        match self {
            Self::MostFrequent => pick_most_frequent(results, name),
            Self::Best => pick_best(results, name),
        }
    }
}

// ── Sweep ────────────────────────────────────────────────────────────

/// One finished task: its full ranked outcome and what it pinned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task: String,
    pub rule: PickRule,
    /// Parameter names this task swept, in declaration order.
    pub swept: Vec<String>,
    pub picks: ParamSet,
    pub outcome: OptimizationOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPick {
    pub task: String,
    pub rule: PickRule,
    pub picks: ParamSet,
    pub runs: usize,
    pub failures: usize,
    pub best_target: Option<f64>,
}

/// What a sweep decided, written to `sweep_summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub strategy: String,
    pub target: String,
    pub tasks: Vec<TaskPick>,
    /// Every parameter pinned after the last task.
    pub final_params: ParamSet,
}

impl SweepSummary {
    pub fn from_outcomes(
        strategy: &str,
        target: &str,
        outcomes: &[TaskOutcome],
        final_params: ParamSet,
    ) -> Self {
        Self {
            strategy: strategy.to_string(),
            target: target.to_string(),
            tasks: outcomes
                .iter()
                .map(|t| TaskPick {
                    task: t.task.clone(),
                    rule: t.rule,
                    picks: t.picks.clone(),
                    runs: t.outcome.results.len(),
                    failures: t.outcome.failures.len(),
                    best_target: t.outcome.best().map(|r| r.target),
                })
                .collect(),
            final_params,
        }
    }
}

/// Run every task of `sweep` in order against `source`.
///
/// `on_task` sees each task as soon as it finishes, before the next starts.
pub fn run_sweep(
    base: &BacktestConfig,
    sweep: &SweepConfig,
    source: &dyn SnapshotSource,
    mut on_task: impl FnMut(&TaskOutcome),
) -> Result<(Vec<TaskOutcome>, SweepSummary), OptimizationError> {
    let mut setting = OptimizationSetting::new();
    setting.set_target(sweep.target.clone());
    for (name, value) in &sweep.constants {
        setting.pin(name, value.clone());
    }

    let mut outcomes = Vec::with_capacity(sweep.tasks.len());
    for task in &sweep.tasks {
        for range in &task.params {
            range.apply(&mut setting)?;
        }
        info!(task = %task.name, combinations = setting.combinations(), "task starting");

        let outcome = if sweep.parallel {
            run_parallel_optimization(base, &setting, source)?
        } else {
            run_optimization(base, &setting, source)?
        };
        if outcome.results.is_empty() {
            return Err(OptimizationError::NoResults(task.name.clone()));
        }

        let mut picks = ParamSet::new();
        for range in &task.params {
            match task.pick.pick(&outcome.results, &range.name) {
                Some(value) => {
                    setting.pin(&range.name, value.clone());
                    picks.insert(range.name.clone(), value);
                }
                None => warn!(task = %task.name, param = %range.name, "no value to pick"),
            }
        }
        info!(task = %task.name, picks = ?picks, "task finished");

        let done = TaskOutcome {
            task: task.name.clone(),
            rule: task.pick,
            swept: task.params.iter().map(|r| r.name.clone()).collect(),
            picks,
            outcome,
        };
        on_task(&done);
        outcomes.push(done);
    }

    let summary =
        SweepSummary::from_outcomes(&base.strategy.name, &sweep.target, &outcomes, setting.pinned());
    Ok((outcomes, summary))
}

/// Parameters a task's results are keyed by: `swept` first, then the rest
/// of the first result's setting.
pub fn result_columns(outcome: &TaskOutcome) -> Vec<String> {
    let mut columns = outcome.swept.clone();
    if let Some(first) = outcome.outcome.results.first() {
        for name in first.setting.keys() {
            if !columns.contains(name) {
                columns.push(name.clone());
            }
        }
    }
    columns
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ranked(values: &[i64]) -> Vec<OptimizationResult> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| OptimizationResult {
                setting: ParamSet::from([("w".to_string(), json!(v))]),
                target: 100.0 - i as f64,
                stats: BTreeMap::new(),
                fingerprint: format!("{i}"),
            })
            .collect()
    }

    #[test]
    fn most_frequent_weights_the_top_ranks() {
        // 7 dominates the top 10 even though 3 is more common overall.
        let mut values = vec![7, 7, 7, 7, 7, 3, 7, 7, 7, 3];
        values.extend([3; 10]);
        assert_eq!(pick_most_frequent(&ranked(&values), "w"), Some(json!(7)));
    }

    #[test]
    fn most_frequent_ties_go_to_the_better_rank() {
        assert_eq!(pick_most_frequent(&ranked(&[4, 9]), "w"), Some(json!(4)));
        assert_eq!(pick_most_frequent(&ranked(&[9, 4]), "w"), Some(json!(9)));
    }

    #[test]
    fn best_takes_the_top_result() {
        assert_eq!(pick_best(&ranked(&[5, 1, 1, 1]), "w"), Some(json!(5)));
        assert_eq!(pick_best(&[], "w"), None);
        assert_eq!(pick_best(&ranked(&[5]), "missing"), None);
    }

    #[test]
    fn ranges_need_values_or_start() {
        let range = ParamRange {
            name: "w".into(),
            values: None,
            start: None,
            end: None,
            step: None,
        };
        assert!(range.apply(&mut OptimizationSetting::new()).is_err());

        let task = SweepTask {
            name: "t".into(),
            pick: PickRule::Best,
            params: vec![ParamRange {
                name: "w".into(),
                values: Some(vec![]),
                start: None,
                end: None,
                step: None,
            }],
        };
        assert!(task.validate().is_err());
    }

    #[test]
    fn pick_rule_parses_from_snake_case() {
        let rule: PickRule = serde_json::from_value(json!("most_frequent")).unwrap();
        assert_eq!(rule, PickRule::MostFrequent);
        let rule: PickRule = serde_json::from_value(json!("best")).unwrap();
        assert_eq!(rule, PickRule::Best);
    }
}
