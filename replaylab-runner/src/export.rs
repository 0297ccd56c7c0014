//! Reporting and export: CSV and JSON artifacts for runs and sweeps.
//!
//! A backtest with logging active writes into one folder per run:
//! - `trading_result.csv`: one row per round trip
//! - `daily_result.csv`: the daily balance/drawdown series
//! - `daily_statistics.csv`: one `field,value` row per summary statistic
//! - `backtesting_result.csv`: trade-by-trade summary
//! - `Backtesting.log`: the strategy's own log lines
//!
//! A sweep writes `opt_result_{task}.csv` per task and `sweep_summary.json`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde_json::Value;

use replaylab_core::engine::TradingResult;

use crate::metrics::{DailyRow, DailyStatistics, TradeStatistics};
use crate::runner::RunResult;
use crate::tasks::{result_columns, SweepSummary, TaskOutcome};

/// Longest artifact folder name, in characters.
pub const MAX_FOLDER_NAME: usize = 50;

/// Statistics written next to the swept parameters in `opt_result_*.csv`.
pub const OPT_RESULT_METRICS: &[&str] = &[
    "sharpeRatio",
    "endBalance",
    "totalReturn",
    "maxDdPercent",
    "totalDays",
    "totalTradeCount",
];

fn finish(wtr: csv::Writer<Vec<u8>>) -> Result<String> {
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

fn write(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

// ─── CSV export ─────────────────────────────────────────────────────

pub fn export_trading_results_csv(results: &[TradingResult]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "symbol",
        "entry_price",
        "entry_dt",
        "entry_id",
        "exit_price",
        "exit_dt",
        "exit_id",
        "volume",
        "turnover",
        "commission",
        "slippage",
        "pnl",
    ])?;
    for r in results {
        wtr.write_record([
            r.symbol.clone(),
            format!("{:.6}", r.entry_price),
            r.entry_dt.to_string(),
            r.entry_id.to_string(),
            format!("{:.6}", r.exit_price),
            r.exit_dt.to_string(),
            r.exit_label(),
            format!("{:.4}", r.volume),
            format!("{:.2}", r.turnover),
            format!("{:.2}", r.commission),
            format!("{:.2}", r.slippage),
            format!("{:.2}", r.pnl),
        ])?;
    }
    finish(wtr)
}

pub fn export_daily_result_csv(rows: &[DailyRow]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    for row in rows {
        wtr.serialize(row)?;
    }
    finish(wtr)
}

/// One `field,value` row per statistic, sorted by field name.
pub fn export_daily_statistics_csv(stats: &DailyStatistics) -> Result<String> {
    let value = serde_json::to_value(stats).context("failed to serialize statistics")?;
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["field", "value"])?;
    if let Value::Object(map) = value {
        for (field, v) in map {
            wtr.write_record([field, plain(&v)])?;
        }
    }
    finish(wtr)
}

pub fn export_backtesting_result_csv(stats: &TradeStatistics) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["field", "value"])?;
    for (field, value) in stats.summary() {
        wtr.write_record([field, value.as_str()])?;
    }
    finish(wtr)
}

/// Strings without JSON quotes; everything else as JSON.
fn plain(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parameters, then [`OPT_RESULT_METRICS`], ranked best first.
pub fn export_opt_result_csv(outcome: &TaskOutcome) -> Result<String> {
    let params = result_columns(outcome);
    let mut wtr = csv::Writer::from_writer(vec![]);
    let header: Vec<&str> = params
        .iter()
        .map(String::as_str)
        .chain(["target"])
        .chain(OPT_RESULT_METRICS.iter().copied())
        .chain(["fingerprint"])
        .collect();
    wtr.write_record(&header)?;

    for r in &outcome.outcome.results {
        let mut record: Vec<String> = params
            .iter()
            .map(|p| r.setting.get(p).map(plain).unwrap_or_default())
            .collect();
        record.push(r.target.to_string());
        record.extend(
            OPT_RESULT_METRICS
                .iter()
                .map(|m| r.stats.get(*m).map(plain).unwrap_or_default()),
        );
        record.push(r.fingerprint.clone());
        wtr.write_record(&record)?;
    }
    finish(wtr)
}

// ─── Artifact folders ───────────────────────────────────────────────

/// `{strategy}_{symbols}_{yymmddHHMM}`, keeping only `[A-Za-z0-9._-]` from the
/// symbols and cutting the whole name to [`MAX_FOLDER_NAME`] characters.
pub fn artifact_dir_name(strategy: &str, symbols: &[String], now: NaiveDateTime) -> String {
    let symbol_part: String = symbols
        .iter()
        .flat_map(|s| s.chars())
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let name = format!("{strategy}_{symbol_part}_{}", now.format("%y%m%d%H%M"));
    name.chars().take(MAX_FOLDER_NAME).collect()
}

/// Write every artifact for one run under `output_dir`. Returns the folder.
pub fn save_run_artifacts(result: &RunResult, output_dir: &Path, now: NaiveDateTime) -> Result<PathBuf> {
    let run_dir = output_dir.join(artifact_dir_name(&result.strategy, &result.symbols, now));
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    write(
        &run_dir.join("trading_result.csv"),
        &export_trading_results_csv(&result.trading_results)?,
    )?;
    write(&run_dir.join("daily_result.csv"), &export_daily_result_csv(&result.daily)?)?;
    if let Some(stats) = &result.statistics {
        write(&run_dir.join("daily_statistics.csv"), &export_daily_statistics_csv(stats)?)?;
    }
    if let Some(stats) = &result.trade_statistics {
        write(&run_dir.join("backtesting_result.csv"), &export_backtesting_result_csv(stats)?)?;
    }
    let mut log = result.log_lines.join("\n");
    if !log.is_empty() {
        log.push('\n');
    }
    write(&run_dir.join("Backtesting.log"), &log)?;
    Ok(run_dir)
}

/// Write one task's ranked results as `opt_result_{task}.csv`.
pub fn save_task_result(outcome: &TaskOutcome, output_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    let path = output_dir.join(format!("opt_result_{}.csv", outcome.task));
    write(&path, &export_opt_result_csv(outcome)?)?;
    Ok(path)
}

pub fn save_sweep_summary(summary: &SweepSummary, output_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    let path = output_dir.join("sweep_summary.json");
    let json = serde_json::to_string_pretty(summary).context("failed to serialize sweep summary")?;
    write(&path, &json)?;
    Ok(path)
}
