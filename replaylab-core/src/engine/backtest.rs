//! Deterministic replay of snapshots through the simulated exchange.
//!
//! Per snapshot, in order:
//! 1. Limit pass: match working limit orders, then deliver the resulting events
//! 2. Stop pass: trigger working stop orders, then deliver the resulting events
//! 3. Strategy callback (`on_bar` / `on_tick`), then deliver queued events
//! 4. Daily close and last mark update for the snapshot's symbol
//!
//! Events are delivered in FIFO order. Events raised while a callback runs go
//! to the back of the queue, so a callback never re-enters the strategy.

use std::collections::{BTreeMap, VecDeque};

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::context::StrategyContext;
use super::daily::{aggregate_by_date, calculate_daily_results, DailyCloses, DailyResult, DailyTotals};
use super::ledger::{Ledger, LedgerPolicy};
use super::order_book::{BookEvent, OrderBook};
use super::trade_extraction::{reconstruct_trades, LastMark, TradingResult};
use crate::data::calendar;
use crate::data::{DataError, LoadRequest, SnapshotSource};
use crate::domain::{BacktestMode, ContractTable, Snapshot, Trade};
use crate::strategy::Strategy;

pub const DEFAULT_CAPITAL: f64 = 1_000_000.0;
pub const DEFAULT_ROW_BUDGET: u64 = 1_000_000;

/// Configuration for a single backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub mode: BacktestMode,
    pub symbols: Vec<String>,
    pub start: NaiveDateTime,
    /// Inclusive: the replay runs to `end + 1 minute`, exclusive.
    pub end: NaiveDateTime,
    /// Warm-up history loaded before `start` and handed to `on_init`.
    pub init_hours: i64,
    pub capital: f64,
    pub policy: LedgerPolicy,
    /// Target rows per replay window.
    pub row_budget: u64,
    pub contracts: ContractTable,
}

impl EngineConfig {
    pub fn new(
        symbols: &[String],
        mode: BacktestMode,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Self {
        Self {
            mode,
            symbols: symbols.to_vec(),
            start,
            end,
            init_hours: 0,
            capital: DEFAULT_CAPITAL,
            policy: LedgerPolicy::default(),
            row_budget: DEFAULT_ROW_BUDGET,
            contracts: ContractTable::new(),
        }
    }

    /// Exclusive end of the replay range.
    pub fn replay_end(&self) -> NaiveDateTime {
        self.end + Duration::minutes(1)
    }

    pub fn init_start(&self) -> NaiveDateTime {
        self.start - Duration::hours(self.init_hours)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.symbols.is_empty() {
            return Err(EngineError::InvalidConfig("no symbols to replay".into()));
        }
        if self.start > self.end {
            return Err(EngineError::InvalidConfig(format!(
                "start {} is after end {}",
                self.start, self.end
            )));
        }
        if self.init_hours < 0 {
            return Err(EngineError::InvalidConfig(format!(
                "init_hours must not be negative, got {}",
                self.init_hours
            )));
        }
        if !(self.capital.is_finite() && self.capital > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "capital must be positive, got {}",
                self.capital
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("data load failed: {0}")]
    Data(#[from] DataError),
}

/// Counters from one `run`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayStats {
    pub init_snapshots: usize,
    pub windows: usize,
    pub empty_windows: usize,
    pub snapshots: usize,
    /// Snapshots whose kind did not match the configured mode.
    pub skipped: usize,
}

/// One isolated simulator: its own book, ledger, id counters and strategy.
pub struct BacktestEngine {
    config: EngineConfig,
    strategy: Box<dyn Strategy>,
    book: OrderBook,
    ledger: Ledger,
    closes: DailyCloses,
    last_marks: BTreeMap<String, LastMark>,
    log: Vec<String>,
    events: Vec<BookEvent>,
    now: NaiveDateTime,
}

impl BacktestEngine {
    pub fn new(config: EngineConfig, strategy: Box<dyn Strategy>) -> Self {
        let book = OrderBook::new(config.policy);
        let ledger = Ledger::new(config.capital);
        let now = config.start;
        Self {
            config,
            strategy,
            book,
            ledger,
            closes: DailyCloses::new(),
            last_marks: BTreeMap::new(),
            log: Vec::new(),
            events: Vec::new(),
            now,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// Clear every piece of run state. Id counters restart too.
    pub fn reset(&mut self) {
        self.book = OrderBook::new(self.config.policy);
        self.ledger = Ledger::new(self.config.capital);
        self.closes.clear();
        self.last_marks.clear();
        self.log.clear();
        self.events.clear();
        self.now = self.config.start;
    }

    /// Run the whole replay from `source`.
    ///
    /// Windows that come back empty are logged and skipped; the replay
    /// continues with the next window.
    pub fn run(&mut self, source: &dyn SnapshotSource) -> Result<ReplayStats, EngineError> {
        self.config.validate()?;
        self.reset();
        let mut stats = ReplayStats::default();
        let (mode, symbols) = (self.config.mode, self.config.symbols.clone());

        let history = if self.config.init_hours > 0 {
            source.load(&LoadRequest::new(
                &symbols,
                mode,
                self.config.init_start(),
                self.config.start,
            ))?
        } else {
            Vec::new()
        };
        stats.init_snapshots = history.len();
        info!(
            strategy = self.strategy.name(),
            history = history.len(),
            "strategy initialising"
        );
        self.start(&history);

        let days = calendar::window_days(mode, symbols.len(), self.config.row_budget);
        let windows = calendar::plan_windows(self.config.start, self.config.replay_end(), days);
        debug!(windows = windows.len(), days_per_window = days, "replay planned");

        for window in windows {
            stats.windows += 1;
            let snapshots = source.load(&LoadRequest::new(&symbols, mode, window.start, window.end))?;
            if snapshots.is_empty() {
                warn!(start = %window.start, end = %window.end, "no data in window; skipping");
                stats.empty_windows += 1;
                continue;
            }
            for snapshot in &snapshots {
                if self.process(snapshot) {
                    stats.snapshots += 1;
                } else {
                    stats.skipped += 1;
                }
            }
        }

        info!(
            snapshots = stats.snapshots,
            trades = self.book.trades().len(),
            balance = self.ledger.balance(),
            "replay finished"
        );
        Ok(stats)
    }

    /// Deliver `on_init(history)` then `on_start`.
    pub fn start(&mut self, history: &[Snapshot]) {
        self.with_strategy(|strategy, ctx| strategy.on_init(ctx, history));
        self.dispatch();
        self.with_strategy(|strategy, ctx| strategy.on_start(ctx));
        self.dispatch();
    }

    /// Push one snapshot through the four steps. Returns `false` if the
    /// snapshot's kind does not match the configured mode.
    pub fn process(&mut self, snapshot: &Snapshot) -> bool {
        if snapshot.mode() != self.config.mode {
            warn!(
                expected = %self.config.mode,
                got = %snapshot.mode(),
                symbol = snapshot.symbol(),
                "snapshot of the wrong kind ignored"
            );
            return false;
        }
        self.now = snapshot.datetime();

        self.book
            .cross_limit_orders(snapshot, &mut self.ledger, &mut self.events);
        self.dispatch();
        self.book
            .cross_stop_orders(snapshot, &mut self.ledger, &mut self.events);
        self.dispatch();

        match snapshot {
            Snapshot::Bar(bar) => self.with_strategy(|strategy, ctx| strategy.on_bar(ctx, bar)),
            Snapshot::Tick(tick) => self.with_strategy(|strategy, ctx| strategy.on_tick(ctx, tick)),
        }
        self.dispatch();

        let (symbol, mark) = (snapshot.symbol(), snapshot.mark());
        self.closes.update(symbol, self.now, mark);
        self.last_marks.insert(
            symbol.to_string(),
            LastMark {
                price: mark,
                datetime: self.now,
            },
        );
        true
    }

    fn with_strategy(&mut self, f: impl FnOnce(&mut dyn Strategy, &mut StrategyContext<'_>)) {
        let mut ctx = StrategyContext {
            book: &mut self.book,
            ledger: &mut self.ledger,
            contracts: &self.config.contracts,
            events: &mut self.events,
            log: &mut self.log,
            now: self.now,
        };
        f(self.strategy.as_mut(), &mut ctx);
    }

    /// Drains the events queued by the preceding book pass or callback.
    /// A crossing pass settles every order it matches before any event is
    /// delivered, so a cancel issued from `on_trade` or `on_order` cannot
    /// stop another fill in the same pass; it only affects later passes.
    fn dispatch(&mut self) {
        let mut queue: VecDeque<BookEvent> = self.events.drain(..).collect();
        while let Some(event) = queue.pop_front() {
            self.with_strategy(|strategy, ctx| match &event {
                BookEvent::Order(order) => strategy.on_order(ctx, order),
                BookEvent::Trade(trade) => strategy.on_trade(ctx, trade),
                BookEvent::StopOrder(stop) => strategy.on_stop_order(ctx, stop),
            });
            queue.extend(self.events.drain(..));
        }
    }

    // ── Results ─────────────────────────────────────────────────────

    pub fn trades(&self) -> &[Trade] {
        self.book.trades()
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn log_lines(&self) -> &[String] {
        &self.log
    }

    pub fn last_marks(&self) -> &BTreeMap<String, LastMark> {
        &self.last_marks
    }

    pub fn daily_closes(&self) -> &DailyCloses {
        &self.closes
    }

    /// Per-symbol daily results. Empty when the run produced no trades.
    pub fn daily_results(&self) -> Vec<DailyResult> {
        if self.book.trades().is_empty() {
            return Vec::new();
        }
        calculate_daily_results(&self.closes, self.book.trades(), &self.config.contracts)
    }

    /// Daily results summed across symbols by date.
    pub fn daily_totals(&self) -> Vec<DailyTotals> {
        aggregate_by_date(&self.daily_results())
    }

    /// Round-trip trades paired FIFO; open entries close at the last mark.
    pub fn trading_results(&self) -> Vec<TradingResult> {
        reconstruct_trades(self.book.trades(), &self.last_marks, &self.config.contracts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PreparedData;
    use crate::domain::{Bar, Direction, Order, OrderStatus, StopOrder};
    use crate::domain::{OrderKind, StopOrderStatus};

    fn dt(d: u32, h: u32, m: u32) -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn bar(at: NaiveDateTime, open: f64, high: f64, low: f64, close: f64) -> Snapshot {
        Snapshot::Bar(Bar {
            symbol: "rb88".into(),
            datetime: at,
            open,
            high,
            low,
            close,
            volume: 1.0,
            open_interest: 0.0,
        })
    }

    /// Records callbacks in order and places scripted orders.
    #[derive(Default)]
    struct Recorder {
        calls: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
        buy_at: Option<f64>,
        stop_at: Option<f64>,
        sent: bool,
    }

    impl Recorder {
        fn push(&self, s: String) {
            self.calls.lock().unwrap().push(s);
        }
    }

    impl Strategy for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }
        fn on_init(&mut self, _ctx: &mut StrategyContext<'_>, history: &[Snapshot]) {
            self.push(format!("init:{}", history.len()));
        }
        fn on_start(&mut self, _ctx: &mut StrategyContext<'_>) {
            self.push("start".into());
        }
        fn on_bar(&mut self, ctx: &mut StrategyContext<'_>, bar: &Bar) {
            self.push(format!("bar:{}", bar.close));
            if self.sent {
                return;
            }
            self.sent = true;
            if let Some(price) = self.buy_at {
                ctx.buy("rb88", price, 1.0).unwrap();
            }
            if let Some(price) = self.stop_at {
                ctx.send_stop_order("rb88", OrderKind::Buy, price, 1.0).unwrap();
            }
        }
        fn on_order(&mut self, _ctx: &mut StrategyContext<'_>, order: &Order) {
            self.push(format!("order:{:?}", order.status));
        }
        fn on_trade(&mut self, _ctx: &mut StrategyContext<'_>, trade: &Trade) {
            self.push(format!("trade:{}", trade.price));
        }
        fn on_stop_order(&mut self, _ctx: &mut StrategyContext<'_>, stop: &StopOrder) {
            self.push(format!("stop:{:?}", stop.status));
        }
    }

    fn engine_with(recorder: Recorder, init_hours: i64) -> BacktestEngine {
        let symbols = vec!["rb88".to_string()];
        let mut config = EngineConfig::new(&symbols, BacktestMode::Bar, dt(2, 9, 0), dt(2, 9, 5));
        config.init_hours = init_hours;
        BacktestEngine::new(config, Box::new(recorder))
    }

    #[test]
    fn limit_order_acks_then_fills_on_next_bar() {
        let calls = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorder = Recorder {
            calls: calls.clone(),
            buy_at: Some(101.0),
            ..Recorder::default()
        };
        let data = PreparedData::new(vec![
            bar(dt(1, 14, 0), 99.0, 99.0, 99.0, 99.0),
            bar(dt(2, 9, 0), 100.0, 101.0, 99.0, 100.0),
            bar(dt(2, 9, 1), 100.0, 102.0, 98.0, 101.0),
        ]);
        let mut engine = engine_with(recorder, 24);
        let stats = engine.run(&data).unwrap();

        assert_eq!(stats.init_snapshots, 1);
        assert_eq!(stats.snapshots, 2);
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "init:1",
                "start",
                "bar:100",
                "order:Pending",
                "order:Filled",
                "trade:100",
                "bar:101",
            ]
        );
        assert_eq!(engine.trades().len(), 1);
        assert_eq!(engine.ledger().position("rb88", Direction::Long), 1.0);
        assert_eq!(engine.ledger().balance(), DEFAULT_CAPITAL - 100.0);
    }

    #[test]
    fn stop_trigger_events_come_in_order() {
        let calls = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorder = Recorder {
            calls: calls.clone(),
            stop_at: Some(101.5),
            ..Recorder::default()
        };
        let data = PreparedData::new(vec![
            bar(dt(2, 9, 0), 100.0, 101.0, 99.0, 100.0),
            bar(dt(2, 9, 1), 100.5, 102.0, 100.0, 101.0),
        ]);
        let mut engine = engine_with(recorder, 0);
        engine.run(&data).unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(
            calls[3..],
            [
                "stop:Waiting".to_string(),
                "stop:Triggered".to_string(),
                "order:Filled".to_string(),
                "trade:101.5".to_string(),
                "bar:101".to_string(),
            ]
        );
        let stop = engine.book().stop_order(crate::domain::StopOrderId(1)).unwrap();
        assert_eq!(stop.status, StopOrderStatus::Triggered);
        assert!(engine
            .book()
            .order(stop.order_id.unwrap())
            .is_some_and(|o| o.status == OrderStatus::Filled));
    }

    /// Places two buys, then cancels everything on the first fill.
    #[derive(Default)]
    struct CancelOnFill {
        cancelled: std::sync::Arc<std::sync::Mutex<Vec<usize>>>,
        sent: bool,
    }

    impl Strategy for CancelOnFill {
        fn name(&self) -> &str {
            "cancel_on_fill"
        }
        fn on_bar(&mut self, ctx: &mut StrategyContext<'_>, _bar: &Bar) {
            if !self.sent {
                self.sent = true;
                ctx.buy("rb88", 101.0, 1.0).unwrap();
                ctx.buy("rb88", 101.0, 1.0).unwrap();
            }
        }
        fn on_trade(&mut self, ctx: &mut StrategyContext<'_>, _trade: &Trade) {
            let n = ctx.cancel_all();
            self.cancelled.lock().unwrap().push(n);
        }
    }

    #[test]
    fn cancel_from_on_trade_cannot_undo_fills_of_the_same_pass() {
        let cancelled = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let strategy = CancelOnFill {
            cancelled: cancelled.clone(),
            ..CancelOnFill::default()
        };
        let symbols = vec!["rb88".to_string()];
        let config = EngineConfig::new(&symbols, BacktestMode::Bar, dt(2, 9, 0), dt(2, 9, 5));
        let mut engine = BacktestEngine::new(config, Box::new(strategy));
        let data = PreparedData::new(vec![
            bar(dt(2, 9, 0), 100.0, 101.0, 99.0, 100.0),
            bar(dt(2, 9, 1), 100.0, 102.0, 98.0, 101.0),
        ]);
        engine.run(&data).unwrap();

        assert_eq!(engine.trades().len(), 2);
        assert_eq!(*cancelled.lock().unwrap(), vec![0, 0]);
        assert_eq!(engine.ledger().position("rb88", Direction::Long), 2.0);
    }

    #[test]
    fn empty_range_runs_cleanly() {
        let mut engine = engine_with(Recorder::default(), 0);
        let stats = engine.run(&PreparedData::default()).unwrap();
        assert_eq!(stats.empty_windows, stats.windows);
        assert!(engine.trades().is_empty());
        assert!(engine.daily_results().is_empty());
        assert!(engine.trading_results().is_empty());
    }

    #[test]
    fn rerun_resets_state() {
        let data = PreparedData::new(vec![
            bar(dt(2, 9, 0), 100.0, 101.0, 99.0, 100.0),
            bar(dt(2, 9, 1), 100.0, 102.0, 98.0, 101.0),
        ]);
        let mut engine = engine_with(
            Recorder {
                buy_at: Some(101.0),
                ..Recorder::default()
            },
            0,
        );
        engine.run(&data).unwrap();
        let first = engine.trades().to_vec();
        engine.run(&data).unwrap();
        // The scripted strategy already sent its order, so the rerun is flat.
        assert!(engine.trades().is_empty());
        assert_eq!(first[0].id, crate::domain::TradeId(1));
        assert_eq!(engine.ledger().balance(), DEFAULT_CAPITAL);
    }

    #[test]
    fn wrong_kind_snapshot_is_skipped() {
        let mut engine = engine_with(Recorder::default(), 0);
        let tick = Snapshot::Tick(crate::domain::Tick::top_of_book("rb88", dt(2, 9, 0), 1.0, 1.0, 1.0));
        assert!(!engine.process(&tick));
        assert!(engine.last_marks().is_empty());
    }

    #[test]
    fn invalid_config_is_rejected_before_loading() {
        let symbols: Vec<String> = Vec::new();
        let config = EngineConfig::new(&symbols, BacktestMode::Bar, dt(2, 9, 0), dt(2, 9, 5));
        let mut engine = BacktestEngine::new(config, Box::new(Recorder::default()));
        assert!(matches!(
            engine.run(&PreparedData::default()),
            Err(EngineError::InvalidConfig(_))
        ));
    }
}
