//! Backtesting engine: order book, ledger, replay loop and post-run analysis.
//!
//! The engine consumes time-ordered snapshots and runs each through the
//! limit pass, the stop pass, the strategy callback and the daily close
//! update. After the run, trades are paired into round trips and folded into
//! per-day results.

pub mod backtest;
pub mod context;
pub mod crossing;
pub mod daily;
pub mod ledger;
pub mod order_book;
pub mod trade_extraction;

pub use backtest::{
    BacktestEngine, EngineConfig, EngineError, ReplayStats, DEFAULT_CAPITAL, DEFAULT_ROW_BUDGET,
};
pub use context::StrategyContext;
pub use crossing::{LimitCross, StopCross};
pub use daily::{aggregate_by_date, calculate_daily_results, DailyCloses, DailyResult, DailyTotals};
pub use ledger::{Ledger, LedgerPolicy, PositionEntry};
pub use order_book::{BookEvent, OrderBook, OrderRejected, OrderRequest, MARKET_PRICE_FACTOR};
pub use trade_extraction::{reconstruct_trades, LastMark, TradingResult};
