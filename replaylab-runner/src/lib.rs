//! ReplayLab Runner: run orchestration, statistics, optimization, exports.
//!
//! This crate builds on `replaylab-core` to provide:
//! - TOML configuration for backtests and parameter sweeps
//! - Single-run orchestration over any snapshot source
//! - Daily and trade-by-trade statistics
//! - Grid optimization, sequential or on a rayon worker pool
//! - Multi-task sweeps that pin each task's picks for the next
//! - CSV/JSON artifacts for runs and sweeps

pub mod config;
pub mod export;
pub mod fitness;
pub mod metrics;
pub mod optimizer;
pub mod runner;
pub mod tasks;

pub use config::{BacktestConfig, ConfigError, LogSection, SweepConfig};
pub use export::{save_run_artifacts, save_sweep_summary, save_task_result};
pub use fitness::{is_known_target, target_value, TARGET_METRICS};
pub use metrics::{DailyRow, DailyStatistics, TradeStatistics};
pub use optimizer::{
    run_optimization, run_parallel_optimization, OptimizationError, OptimizationOutcome,
    OptimizationResult, OptimizationSetting, WorkerFailure,
};
pub use runner::{run_backtest, run_one_configuration, RunError, RunResult};
pub use tasks::{run_sweep, PickRule, SweepSummary, SweepTask, TaskOutcome};
