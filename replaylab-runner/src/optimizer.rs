//! Parameter optimizer: cartesian grid over strategy parameters, one
//! independent engine per combination.
//!
//! Sequential and parallel modes produce the same output. The parallel mode
//! runs on a dedicated rayon pool of `cores - 1` workers, waits for every
//! worker, then sorts. A worker that errors or panics is reported in
//! `failures`; the other results are kept.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use replaylab_core::data::SnapshotSource;
use replaylab_core::strategy::ParamSet;

use crate::config::BacktestConfig;
use crate::fitness::{is_known_target, MISSING_TARGET};
use crate::runner::run_one_configuration;

#[derive(Debug, Error, PartialEq)]
pub enum OptimizationError {
    #[error("parameter grid is empty")]
    EmptyGrid,
    #[error("no optimization target set")]
    NoTarget,
    #[error("parameter '{name}': {reason}")]
    InvalidRange { name: String, reason: String },
    #[error("failed to build worker pool: {0}")]
    Pool(String),
    #[error("every run of task '{0}' failed; nothing to pick from")]
    NoResults(String),
}

// ── Setting ──────────────────────────────────────────────────────────

/// Ordered parameter candidates plus the metric to rank by.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSetting {
    params: Vec<(String, Vec<Value>)>,
    target: Option<String>,
}

impl OptimizationSetting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Candidates `start, start + step, ...` up to and including `end`.
    /// With neither `end` nor `step`, the single value `start`.
    pub fn add_parameter(
        &mut self,
        name: &str,
        start: f64,
        end: Option<f64>,
        step: Option<f64>,
    ) -> Result<(), OptimizationError> {
        let invalid = |reason: &str| OptimizationError::InvalidRange {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        let values = match (end, step) {
            (None, None) => vec![start],
            (Some(end), Some(step)) => {
                if end < start {
                    return Err(invalid("end must not be below start"));
                }
                if step.is_nan() || step <= 0.0 {
                    return Err(invalid("step must be positive"));
                }
                let count = ((end - start) / step + 1e-9).floor() as usize + 1;
                (0..count).map(|i| start + step * i as f64).collect()
            }
            _ => return Err(invalid("end and step must be given together")),
        };
        self.add_params(name, values.into_iter().map(number).collect());
        Ok(())
    }

    /// Explicit candidates. Re-adding a name replaces its candidates in place.
    pub fn add_params(&mut self, name: &str, values: Vec<Value>) {
        match self.params.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = values,
            None => self.params.push((name.to_string(), values)),
        }
    }

    /// Pin a parameter to one value for every later combination.
    pub fn pin(&mut self, name: &str, value: Value) {
        self.add_params(name, vec![value]);
    }

    pub fn set_target(&mut self, name: impl Into<String>) {
        self.target = Some(name.into());
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn parameters(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.params.iter().map(|(n, v)| (n.as_str(), v.as_slice()))
    }

    /// Number of combinations `generate_setting` will yield.
    pub fn combinations(&self) -> usize {
        if self.params.is_empty() {
            return 0;
        }
        self.params.iter().map(|(_, v)| v.len()).product()
    }

    /// Cartesian product of all candidates; the last parameter varies fastest.
    pub fn generate_setting(&self) -> Vec<ParamSet> {
        let total = self.combinations();
        let mut settings = Vec::with_capacity(total);
        for mut index in 0..total {
            let mut setting = ParamSet::new();
            for (name, values) in self.params.iter().rev() {
                setting.insert(name.clone(), values[index % values.len()].clone());
                index /= values.len();
            }
            settings.push(setting);
        }
        settings
    }

    /// The current single values, for parameters pinned to exactly one.
    pub fn pinned(&self) -> ParamSet {
        self.params
            .iter()
            .filter(|(_, v)| v.len() == 1)
            .map(|(n, v)| (n.clone(), v[0].clone()))
            .collect()
    }

    fn checked_target(&self) -> Result<&str, OptimizationError> {
        let target = self.target().ok_or(OptimizationError::NoTarget)?;
        if self.combinations() == 0 {
            return Err(OptimizationError::EmptyGrid);
        }
        Ok(target)
    }
}

/// Integral floats become JSON integers so parameter values print as `10`, not `10.0`.
fn number(v: f64) -> Value {
    if v.fract() == 0.0 && v.abs() < 9.0e15 {
        Value::from(v as i64)
    } else {
        Value::from(v)
    }
}

/// Stable blake3 fingerprint of a strategy name and parameter combination.
pub fn fingerprint(strategy: &str, setting: &ParamSet) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(strategy.as_bytes());
    for (name, value) in setting {
        hasher.update(b"\x1f");
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.to_string().as_bytes());
    }
    hasher.finalize().to_hex()[..16].to_string()
}

// ── Results ──────────────────────────────────────────────────────────

/// One completed combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub setting: ParamSet,
    pub target: f64,
    pub stats: BTreeMap<String, Value>,
    pub fingerprint: String,
}

/// A combination whose run errored or panicked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerFailure {
    pub setting: ParamSet,
    pub fingerprint: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    pub target: String,
    /// Descending by target; ties keep grid order.
    pub results: Vec<OptimizationResult>,
    pub failures: Vec<WorkerFailure>,
}

impl OptimizationOutcome {
    pub fn best(&self) -> Option<&OptimizationResult> {
        self.results.first()
    }
}

enum RunOutcome {
    Done(OptimizationResult),
    Failed(WorkerFailure),
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

fn run_setting(
    base: &BacktestConfig,
    setting: &ParamSet,
    target: &str,
    source: &dyn SnapshotSource,
) -> RunOutcome {
    let print = fingerprint(&base.strategy.name, setting);
    let outcome = catch_unwind(AssertUnwindSafe(|| run_one_configuration(base, setting, source)));
    let message = match outcome {
        Ok(Ok(run)) => {
            let stats = run.stats_map();
            if stats.is_empty() {
                warn!(fingerprint = %print, "run produced no daily results; target defaults to {MISSING_TARGET}");
            }
            let target = run.target(target);
            info!(fingerprint = %print, setting = ?setting, score = target, "setting complete");
            return RunOutcome::Done(OptimizationResult {
                setting: setting.clone(),
                target,
                stats,
                fingerprint: print,
            });
        }
        Ok(Err(e)) => e.to_string(),
        Err(payload) => panic_message(payload),
    };
    error!(fingerprint = %print, setting = ?setting, %message, "setting failed");
    RunOutcome::Failed(WorkerFailure {
        setting: setting.clone(),
        fingerprint: print,
        message,
    })
}

fn collect(target: &str, outcomes: Vec<RunOutcome>) -> OptimizationOutcome {
    let mut results = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome {
            RunOutcome::Done(r) => results.push(r),
            RunOutcome::Failed(f) => failures.push(f),
        }
    }
    results.sort_by(|a, b| b.target.partial_cmp(&a.target).unwrap_or(Ordering::Equal));
    OptimizationOutcome {
        target: target.to_string(),
        results,
        failures,
    }
}

fn announce(setting: &OptimizationSetting, target: &str, mode: &str) {
    if !is_known_target(target) {
        error!(metric = target, "unknown target metric; every run will score {MISSING_TARGET}");
    }
    info!(combinations = setting.combinations(), metric = target, mode, "optimization starting");
}

/// Run every combination one after another.
pub fn run_optimization(
    base: &BacktestConfig,
    setting: &OptimizationSetting,
    source: &dyn SnapshotSource,
) -> Result<OptimizationOutcome, OptimizationError> {
    let target = setting.checked_target()?;
    announce(setting, target, "sequential");
    let outcomes = setting
        .generate_setting()
        .iter()
        .map(|s| run_setting(base, s, target, source))
        .collect();
    Ok(collect(target, outcomes))
}

/// Worker count for the parallel pool: available cores minus one, at least one.
pub fn pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .saturating_sub(1)
        .max(1)
}

/// Run every combination on a fixed-size worker pool.
pub fn run_parallel_optimization(
    base: &BacktestConfig,
    setting: &OptimizationSetting,
    source: &dyn SnapshotSource,
) -> Result<OptimizationOutcome, OptimizationError> {
    let target = setting.checked_target()?;
    announce(setting, target, "parallel");
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(pool_size())
        .build()
        .map_err(|e| OptimizationError::Pool(e.to_string()))?;
    let settings = setting.generate_setting();
    let outcomes = pool.install(|| {
        settings
            .par_iter()
            .map(|s| run_setting(base, s, target, source))
            .collect()
    });
    Ok(collect(target, outcomes))
}
