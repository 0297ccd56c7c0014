//! ReplayLab CLI: backtest, optimize and cache commands.
//!
//! Commands:
//! - `backtest`: run one config and print its statistics
//! - `optimize`: run a multi-task parameter sweep over preloaded data
//! - `cache status`: list cached symbols per mode with their date ranges

mod logging;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use replaylab_core::data::{LoadRequest, ParquetCache, PreparedData};
use replaylab_runner::export::{save_run_artifacts, save_sweep_summary, save_task_result};
use replaylab_runner::metrics::format_number;
use replaylab_runner::runner::run_backtest;
use replaylab_runner::tasks::{run_sweep, TaskOutcome};
use replaylab_runner::{BacktestConfig, RunResult, SweepConfig};

#[derive(Parser)]
#[command(
    name = "replaylab",
    about = "ReplayLab CLI, event-driven backtesting and parameter sweeps"
)]
struct Cli {
    /// Default log level when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a backtest from a TOML config file.
    Backtest {
        /// Path to the backtest TOML config.
        #[arg(long)]
        config: PathBuf,

        /// Artifact directory. Overrides `[log] path`; implies `[log] active`.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run a parameter sweep over a base backtest config.
    Optimize {
        /// Path to the base backtest TOML config.
        #[arg(long)]
        config: PathBuf,

        /// Path to the sweep TOML config.
        #[arg(long)]
        sweep: PathBuf,

        /// Directory for `opt_result_*.csv` and `sweep_summary.json`.
        #[arg(long, default_value = "results")]
        output: PathBuf,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report cached symbols, day files and date ranges.
    Status {
        /// Cache directory. Defaults to ./data.
        #[arg(long, default_value = "data")]
        cache_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_level, cli.json_logs)?;

    match cli.command {
        Commands::Backtest { config, output } => run_backtest_cmd(&config, output),
        Commands::Optimize {
            config,
            sweep,
            output,
        } => run_optimize_cmd(&config, &sweep, &output),
        Commands::Cache { action } => match action {
            CacheAction::Status { cache_dir } => run_cache_status(&cache_dir),
        },
    }
}

fn run_backtest_cmd(config_path: &Path, output: Option<PathBuf>) -> Result<()> {
    let config = BacktestConfig::from_file(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let result = run_backtest(&config)?;

    print_summary(&result);

    let output_dir = match output {
        Some(dir) => Some(dir),
        None if config.log.active => Some(config.log.path.clone()),
        None => None,
    };
    if let Some(dir) = output_dir {
        let run_dir = save_run_artifacts(&result, &dir, chrono::Local::now().naive_local())?;
        println!("Artifacts saved to: {}", run_dir.display());
    }
    Ok(())
}

fn run_optimize_cmd(config_path: &Path, sweep_path: &Path, output: &Path) -> Result<()> {
    let config = BacktestConfig::from_file(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let sweep = SweepConfig::from_file(sweep_path)
        .with_context(|| format!("failed to load {}", sweep_path.display()))?;

    // Load the whole range once; every run replays from memory.
    let engine = config.engine_config()?;
    let request = LoadRequest::new(
        &engine.symbols,
        engine.mode,
        engine.init_start(),
        engine.replay_end(),
    );
    let (snapshots, report) = config.data_feed()?.load_with_report(&request)?;
    if report.has_gaps() {
        warn!(
            empty_days = ?report.empty_days,
            remote_errors = ?report.remote_errors,
            "prepared data has gaps"
        );
    }
    let data = PreparedData::new(snapshots);
    info!(
        snapshots = data.len(),
        from_cache = report.from_cache,
        from_remote = report.from_remote,
        "data prepared"
    );

    let (outcomes, summary) = run_sweep(&config, &sweep, &data, print_task)?;
    for outcome in &outcomes {
        let path = save_task_result(outcome, output)?;
        println!("Task results saved to: {}", path.display());
    }
    let path = save_sweep_summary(&summary, output)?;
    println!("Sweep summary saved to: {}", path.display());

    println!();
    println!("=== Final Parameters ===");
    for (name, value) in &summary.final_params {
        println!("{name:<20} {value}");
    }
    Ok(())
}

fn print_task(task: &TaskOutcome) {
    println!();
    println!("=== Task: {} ({:?}) ===", task.task, task.rule);
    println!(
        "Runs: {}  Failures: {}",
        task.outcome.results.len(),
        task.outcome.failures.len()
    );
    for (rank, result) in task.outcome.results.iter().take(5).enumerate() {
        println!(
            "#{:<2} {:>14.4}  {}",
            rank + 1,
            result.target,
            serde_json::to_string(&result.setting).unwrap_or_default()
        );
    }
    for failure in &task.outcome.failures {
        println!("FAILED {}: {}", failure.fingerprint, failure.message);
    }
    println!("Picked: {}", serde_json::to_string(&task.picks).unwrap_or_default());
}

fn run_cache_status(cache_dir: &Path) -> Result<()> {
    if !cache_dir.exists() {
        println!("Cache directory does not exist: {}", cache_dir.display());
        return Ok(());
    }

    let statuses = ParquetCache::new(cache_dir).status()?;
    if statuses.is_empty() {
        println!("Cache is empty: {}", cache_dir.display());
        return Ok(());
    }

    println!("Cache: {}", cache_dir.display());
    println!("Entries: {}", statuses.len());
    println!();
    println!("{:<6} {:<20} {:>6} {:<25}", "Mode", "Symbol", "Days", "Date Range");
    println!("{}", "-".repeat(60));
    for s in &statuses {
        let range = match (s.first_date, s.last_date) {
            (Some(first), Some(last)) => format!("{first} to {last}"),
            _ => "(no day files)".to_string(),
        };
        println!(
            "{:<6} {:<20} {:>6} {:<25}",
            s.mode.as_str(),
            s.symbol,
            s.day_files,
            range
        );
    }
    Ok(())
}

fn print_summary(result: &RunResult) {
    println!();
    println!("=== Backtest Result ===");
    println!("Strategy:       {}", result.strategy);
    println!("Symbols:        {}", result.symbols.join(", "));
    println!("Period:         {} to {}", result.start, result.end);
    println!(
        "Snapshots:      {} ({} warmup, {} skipped)",
        result.replay.snapshots, result.replay.init_snapshots, result.replay.skipped
    );
    println!("Trades:         {}", result.trades.len());

    let Some(stats) = &result.statistics else {
        println!();
        println!("No trades; no statistics.");
        return;
    };
    println!();
    println!("--- Statistics ---");
    println!("Days:           {} ({} up, {} down)", stats.total_days, stats.profit_days, stats.loss_days);
    println!("End Balance:    {}", format_number(stats.end_balance));
    println!("Net Pnl:        {}", format_number(stats.total_net_pnl));
    println!("Total Return:   {:.2}%", stats.total_return);
    println!("Annual Return:  {:.2}%", stats.annualized_return);
    println!("Max Drawdown:   {} ({:.2}%)", format_number(stats.max_drawdown), stats.max_dd_percent);
    println!("Sharpe:         {:.3}", stats.sharpe_ratio);
    println!("Commission:     {}", format_number(stats.total_commission));
    println!("Slippage:       {}", format_number(stats.total_slippage));

    if let Some(trades) = &result.trade_statistics {
        println!();
        println!("--- Round Trips ---");
        for (field, value) in trades.summary() {
            println!("{field:<24}{value}");
        }
    }
    println!();
}
