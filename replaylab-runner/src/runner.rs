//! Backtest runner: wires configuration, engine and statistics together.
//!
//! Two entry points:
//! - `run_backtest()`: builds the feed from the `[data]` section, then runs. Used by the CLI.
//! - `run_one_configuration()`: base config plus parameter overrides over any
//!   snapshot source. Pure with respect to its inputs, so optimizer workers can
//!   call it concurrently against shared prepared data.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use replaylab_core::data::SnapshotSource;
use replaylab_core::domain::{BacktestMode, Trade};
use replaylab_core::engine::{BacktestEngine, EngineError, ReplayStats, TradingResult};
use replaylab_core::strategy::{build_strategy, ParamSet, StrategyError};

use crate::config::{BacktestConfig, ConfigError};
use crate::fitness::target_value;
use crate::metrics::{daily_series, DailyRow, DailyStatistics, TradeStatistics};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("strategy error: {0}")]
    Strategy(#[from] StrategyError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Current schema version for persisted run results.
pub const SCHEMA_VERSION: u32 = 1;

/// Everything one run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub strategy: String,
    /// Effective parameters: the base config's params with overrides applied.
    pub params: ParamSet,
    pub symbols: Vec<String>,
    pub mode: BacktestMode,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub capital: f64,
    pub replay: ReplayStats,
    pub trades: Vec<Trade>,
    pub trading_results: Vec<TradingResult>,
    pub daily: Vec<DailyRow>,
    /// `None` when the run traded nothing.
    pub statistics: Option<DailyStatistics>,
    pub trade_statistics: Option<TradeStatistics>,
    pub log_lines: Vec<String>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl RunResult {
    /// Statistics keyed by camelCase name; empty for a run without trades.
    pub fn stats_map(&self) -> BTreeMap<String, Value> {
        self.statistics
            .as_ref()
            .map(DailyStatistics::to_map)
            .unwrap_or_default()
    }

    pub fn target(&self, name: &str) -> f64 {
        target_value(&self.stats_map(), name)
    }
}

/// Overlay `overrides` on `base`. Overrides win.
pub fn merge_params(base: &ParamSet, overrides: &ParamSet) -> ParamSet {
    let mut merged = base.clone();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Run the base configuration with `overrides` applied to its strategy
/// parameters. Each call owns a fresh engine, ledger and strategy.
pub fn run_one_configuration(
    base: &BacktestConfig,
    overrides: &ParamSet,
    source: &dyn SnapshotSource,
) -> Result<RunResult, RunError> {
    let engine_config = base.engine_config()?;
    let params = merge_params(&base.strategy.params, overrides);
    let strategy = build_strategy(&base.strategy.name, &engine_config.symbols, &params)?;

    debug!(strategy = %base.strategy.name, params = ?params, "starting run");
    let mut engine = BacktestEngine::new(engine_config.clone(), strategy);
    let replay = engine.run(source)?;

    let trading_results = engine.trading_results();
    let daily = daily_series(&engine.daily_totals(), engine_config.capital);
    let statistics =
        DailyStatistics::compute(&daily, engine_config.capital, base.backtest.annual_days);
    let trade_statistics = TradeStatistics::compute(&trading_results);

    info!(
        strategy = %base.strategy.name,
        snapshots = replay.snapshots,
        trades = engine.trades().len(),
        round_trips = trading_results.len(),
        days = daily.len(),
        "run complete"
    );

    Ok(RunResult {
        schema_version: SCHEMA_VERSION,
        strategy: base.strategy.name.clone(),
        params,
        symbols: engine_config.symbols.clone(),
        mode: engine_config.mode,
        start: engine_config.start,
        end: engine_config.end,
        capital: engine_config.capital,
        replay,
        trades: engine.trades().to_vec(),
        trading_results,
        daily,
        statistics,
        trade_statistics,
        log_lines: engine.log_lines().to_vec(),
    })
}

/// Run a config against the feed its `[data]` section describes.
pub fn run_backtest(config: &BacktestConfig) -> Result<RunResult, RunError> {
    let feed = config.data_feed()?;
    run_one_configuration(config, &ParamSet::new(), &feed)
}
