//! TOML run and sweep configuration.
//!
//! A backtest file looks like:
//!
//! ```toml
//! [backtest]
//! mode = "bar"
//! symbols = ["rb88:CTP"]
//! start = "20240102 09:00"
//! end = "20240131 15:00"
//! init_hours = 24
//!
//! [data]
//! cache_dir = "data"
//! synthetic_seed = 7
//!
//! [contracts."rb88:CTP"]
//! size = 10
//! price_tick = 1
//! rate = 0.0001
//!
//! [strategy]
//! name = "dual_ma"
//! params = { fast_window = 10, slow_window = 30 }
//!
//! [log]
//! active = true
//! path = "results"
//! ```
//!
//! Everything is validated before any run starts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use replaylab_core::data::{DataError, DataFeed, HttpStore, ParquetCache, RemoteStore, SyntheticStore};
use replaylab_core::domain::{BacktestMode, ContractSpec, ContractTable};
use replaylab_core::engine::{EngineConfig, LedgerPolicy, DEFAULT_CAPITAL, DEFAULT_ROW_BUDGET};
use replaylab_core::strategy::{build_strategy, ParamSet, StrategyError};

use crate::fitness::is_known_target;
use crate::metrics::DEFAULT_ANNUAL_DAYS;
use crate::tasks::SweepTask;

/// Accepted datetime layouts, tried in order.
const DATETIME_FORMATS: &[&str] = &["%Y%m%d %H:%M:%S", "%Y%m%d %H:%M"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid {field} '{value}': expected YYYYMMDD HH:MM[:SS]")]
    InvalidDatetime { field: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("unknown target metric '{0}'")]
    UnknownTarget(String),

    #[error(transparent)]
    Strategy(#[from] StrategyError),

    #[error(transparent)]
    Data(#[from] DataError),
}

/// Parse `YYYYMMDD HH:MM[:SS]`, or a bare `YYYYMMDD` as midnight.
pub fn parse_datetime(field: &'static str, value: &str) -> Result<NaiveDateTime, ConfigError> {
    let trimmed = value.trim();
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(dt);
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y%m%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| ConfigError::InvalidDatetime {
            field,
            value: value.to_string(),
        })
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Backtest configuration ───────────────────────────────────────────

/// One backtest: what to replay, how to account for it, what to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub backtest: BacktestSection,
    #[serde(default)]
    pub data: DataSection,
    /// Contract metadata by symbol. Symbols not listed use neutral defaults.
    #[serde(default)]
    pub contracts: BTreeMap<String, ContractSpec>,
    pub strategy: StrategySection,
    #[serde(default)]
    pub log: LogSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSection {
    #[serde(default)]
    pub mode: BacktestMode,
    pub symbols: Vec<String>,
    pub start: String,
    /// Inclusive end of the replay range.
    pub end: String,
    #[serde(default)]
    pub init_hours: i64,
    #[serde(default = "default_capital")]
    pub capital: f64,
    /// Trading days per year used to annualize returns and Sharpe.
    #[serde(default = "default_annual_days")]
    pub annual_days: u32,
    #[serde(default)]
    pub policy: LedgerPolicy,
    #[serde(default = "default_row_budget")]
    pub row_budget: u64,
}

fn default_capital() -> f64 {
    DEFAULT_CAPITAL
}

fn default_annual_days() -> u32 {
    DEFAULT_ANNUAL_DAYS
}

fn default_row_budget() -> u64 {
    DEFAULT_ROW_BUDGET
}

/// Where snapshots come from: the Parquet cache plus at most one remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSection {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Base URL of an HTTP snapshot store.
    #[serde(default)]
    pub remote_url: Option<String>,
    /// Seed for the built-in synthetic store, used when no remote URL is set.
    #[serde(default)]
    pub synthetic_seed: Option<u64>,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            remote_url: None,
            synthetic_seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySection {
    pub name: String,
    #[serde(default)]
    pub params: ParamSet,
}

/// Per-run artifact output. Off unless `active = true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSection {
    #[serde(default)]
    pub active: bool,
    #[serde(default = "default_log_path")]
    pub path: PathBuf,
}

fn default_log_path() -> PathBuf {
    PathBuf::from("results")
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            active: false,
            path: default_log_path(),
        }
    }
}

impl BacktestConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&read_file(path)?)
    }

    pub fn start(&self) -> Result<NaiveDateTime, ConfigError> {
        parse_datetime("start", &self.backtest.start)
    }

    pub fn end(&self) -> Result<NaiveDateTime, ConfigError> {
        parse_datetime("end", &self.backtest.end)
    }

    /// Check everything a run would trip over, including the strategy's own
    /// parameter validation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bt = &self.backtest;
        if bt.symbols.is_empty() {
            return Err(ConfigError::Invalid("backtest.symbols is empty".into()));
        }
        let (start, end) = (self.start()?, self.end()?);
        if start > end {
            return Err(ConfigError::Invalid(format!(
                "backtest.start {start} is after backtest.end {end}"
            )));
        }
        if bt.init_hours < 0 {
            return Err(ConfigError::Invalid(format!(
                "backtest.init_hours must not be negative, got {}",
                bt.init_hours
            )));
        }
        if !(bt.capital.is_finite() && bt.capital > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "backtest.capital must be positive, got {}",
                bt.capital
            )));
        }
        if bt.annual_days == 0 {
            return Err(ConfigError::Invalid("backtest.annual_days must be at least 1".into()));
        }
        if bt.row_budget == 0 {
            return Err(ConfigError::Invalid("backtest.row_budget must be at least 1".into()));
        }
        for (symbol, spec) in &self.contracts {
            let bad_size = spec.size.is_nan() || spec.size <= 0.0;
            if bad_size || spec.price_tick < 0.0 || spec.rate < 0.0 || spec.slippage < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "contract '{symbol}' needs size > 0 and non-negative tick, rate and slippage"
                )));
            }
        }
        if self.data.remote_url.is_some() && self.data.synthetic_seed.is_some() {
            return Err(ConfigError::Invalid(
                "set at most one of data.remote_url and data.synthetic_seed".into(),
            ));
        }
        build_strategy(&self.strategy.name, &bt.symbols, &self.strategy.params)?;
        Ok(())
    }

    pub fn contract_table(&self) -> ContractTable {
        let mut table = ContractTable::new();
        for (symbol, spec) in &self.contracts {
            table.insert(symbol.clone(), *spec);
        }
        table
    }

    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let bt = &self.backtest;
        let mut config = EngineConfig::new(&bt.symbols, bt.mode, self.start()?, self.end()?);
        config.init_hours = bt.init_hours;
        config.capital = bt.capital;
        config.policy = bt.policy;
        config.row_budget = bt.row_budget;
        config.contracts = self.contract_table();
        Ok(config)
    }

    pub fn remote_store(&self) -> Result<Option<Box<dyn RemoteStore>>, ConfigError> {
        if let Some(url) = &self.data.remote_url {
            return Ok(Some(Box::new(HttpStore::new(url.clone())?)));
        }
        Ok(self
            .data
            .synthetic_seed
            .map(|seed| Box::new(SyntheticStore::with_seed(seed)) as Box<dyn RemoteStore>))
    }

    /// The feed described by the `[data]` section.
    pub fn data_feed(&self) -> Result<DataFeed, ConfigError> {
        let cache = ParquetCache::new(&self.data.cache_dir);
        Ok(DataFeed::new(cache).with_boxed_remote(self.remote_store()?))
    }
}

// ── Sweep configuration ──────────────────────────────────────────────

/// A multi-task parameter sweep over a base backtest.
///
/// ```toml
/// target = "sharpeRatio"
/// parallel = true
///
/// [constants]
/// volume = 1
///
/// [[tasks]]
/// name = "windows"
/// pick = "most_frequent"
/// params = [
///     { name = "fast_window", start = 5, end = 20, step = 5 },
///     { name = "slow_window", values = [30, 60] },
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    pub target: String,
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    /// Strategy parameters pinned for every task.
    #[serde(default)]
    pub constants: ParamSet,
    pub tasks: Vec<SweepTask>,
}

fn default_parallel() -> bool {
    true
}

impl SweepConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&read_file(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_known_target(&self.target) {
            return Err(ConfigError::UnknownTarget(self.target.clone()));
        }
        if self.tasks.is_empty() {
            return Err(ConfigError::Invalid("sweep has no tasks".into()));
        }
        for task in &self.tasks {
            task.validate()?;
        }
        Ok(())
    }
}
