//! End-to-end engine tests over in-memory, synthetic and Parquet-backed data.

use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, NaiveDateTime};
use replaylab_core::data::{
    DataFeed, LoadRequest, MemoryStore, ParquetCache, PreparedData, SnapshotSource, SyntheticStore,
};
use replaylab_core::domain::{
    BacktestMode, Bar, ContractSpec, ContractTable, Direction, OrderKind, Snapshot, Trade,
};
use replaylab_core::engine::{BacktestEngine, EngineConfig, LedgerPolicy, StrategyContext};
use replaylab_core::strategy::{build_strategy, ParamSet, Strategy};

// ── Helpers ──────────────────────────────────────────────────────────

fn dt(d: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, d)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

fn bar(symbol: &str, at: NaiveDateTime, ohlc: [f64; 4]) -> Snapshot {
    Snapshot::Bar(Bar {
        symbol: symbol.into(),
        datetime: at,
        open: ohlc[0],
        high: ohlc[1],
        low: ohlc[2],
        close: ohlc[3],
        volume: 1.0,
        open_interest: 0.0,
    })
}

fn symbols() -> Vec<String> {
    vec!["rb88:CTP".to_string()]
}

type Step = Box<dyn FnMut(&mut StrategyContext<'_>, &Bar) + Send>;

fn step(f: impl FnMut(&mut StrategyContext<'_>, &Bar) + Send + 'static) -> Step {
    Box::new(f)
}

/// Runs one closure per bar, in order, and records every trade it sees.
struct Scripted {
    steps: Vec<Step>,
    cursor: usize,
    seen: Arc<Mutex<Vec<Trade>>>,
}

impl Scripted {
    fn new(steps: Vec<Step>) -> (Self, Arc<Mutex<Vec<Trade>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                steps,
                cursor: 0,
                seen: seen.clone(),
            },
            seen,
        )
    }
}

impl Strategy for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn on_bar(&mut self, ctx: &mut StrategyContext<'_>, bar: &Bar) {
        if let Some(step) = self.steps.get_mut(self.cursor) {
            step(ctx, bar);
        }
        self.cursor += 1;
    }

    fn on_trade(&mut self, _ctx: &mut StrategyContext<'_>, trade: &Trade) {
        self.seen.lock().unwrap().push(trade.clone());
    }
}

fn bar_config(start: NaiveDateTime, end: NaiveDateTime) -> EngineConfig {
    EngineConfig::new(&symbols(), BacktestMode::Bar, start, end)
}

// ── Crossing scenarios ───────────────────────────────────────────────

#[test]
fn buy_stop_fills_at_worse_of_open_and_trigger() {
    let (strategy, seen) = Scripted::new(vec![step(|ctx, _| {
        ctx.send_stop_order("rb88:CTP", OrderKind::Buy, 52.0, 1.0).unwrap();
    })]);
    let data = PreparedData::new(vec![
        bar("rb88:CTP", dt(2, 9, 0), [49.0, 50.0, 48.0, 49.5]),
        bar("rb88:CTP", dt(2, 9, 1), [50.0, 55.0, 48.0, 54.0]),
    ]);
    let mut engine = BacktestEngine::new(bar_config(dt(2, 9, 0), dt(2, 9, 1)), Box::new(strategy));
    engine.run(&data).unwrap();

    let trades = seen.lock().unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].price, 52.0);
    assert_eq!(trades[0].datetime, dt(2, 9, 1));
    assert_eq!(engine.ledger().position("rb88:CTP", Direction::Long), 1.0);
}

#[test]
fn open_then_close_restores_closable_and_position() {
    let (strategy, _) = Scripted::new(vec![
        step(|ctx, bar| {
            ctx.buy("rb88:CTP", bar.close, 3.0).unwrap();
        }),
        step(|ctx, _| {
            assert_eq!(ctx.closable("rb88:CTP", Direction::Long), 3.0);
        }),
        step(|ctx, bar| {
            ctx.sell("rb88:CTP", bar.close, 3.0).unwrap();
            assert_eq!(ctx.closable("rb88:CTP", Direction::Long), 0.0);
        }),
    ]);
    let data = PreparedData::new(vec![
        bar("rb88:CTP", dt(2, 9, 0), [100.0, 101.0, 99.0, 100.0]),
        bar("rb88:CTP", dt(2, 9, 1), [100.0, 101.0, 99.0, 100.0]),
        bar("rb88:CTP", dt(2, 9, 2), [100.0, 103.0, 99.0, 102.0]),
        bar("rb88:CTP", dt(2, 9, 3), [102.0, 104.0, 101.0, 103.0]),
    ]);
    let mut engine = BacktestEngine::new(bar_config(dt(2, 9, 0), dt(2, 9, 3)), Box::new(strategy));
    engine.run(&data).unwrap();

    let ledger = engine.ledger();
    assert_eq!(ledger.position("rb88:CTP", Direction::Long), 0.0);
    assert_eq!(ledger.closable("rb88:CTP", Direction::Long), 0.0);

    let results = engine.trading_results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entry_price, 100.0);
    assert_eq!(results[0].exit_price, 102.0);
    assert_eq!(results[0].pnl, 6.0);
}

#[test]
fn strict_policy_rejects_over_close_without_side_effects() {
    let (strategy, _) = Scripted::new(vec![step(|ctx, bar| {
        let before = ctx.balance();
        assert!(ctx.sell("rb88:CTP", bar.close, 1.0).is_err());
        assert_eq!(ctx.balance(), before);
        assert_eq!(ctx.working_orders().count(), 0);
    })]);
    let mut config = bar_config(dt(2, 9, 0), dt(2, 9, 0));
    config.policy = LedgerPolicy::Strict;
    let data = PreparedData::new(vec![bar("rb88:CTP", dt(2, 9, 0), [1.0, 1.0, 1.0, 1.0])]);
    let mut engine = BacktestEngine::new(config, Box::new(strategy));
    engine.run(&data).unwrap();
    assert!(engine.trades().is_empty());
}

#[test]
fn strict_policy_cancels_unfunded_stop_when_it_triggers() {
    let (strategy, seen) = Scripted::new(vec![
        step(|ctx, _bar| {
            ctx.send_stop_order("rb88:CTP", OrderKind::Buy, 52.0, 1.0).unwrap();
        }),
        step(|_ctx, _bar| {}),
    ]);
    let mut config = bar_config(dt(2, 9, 0), dt(2, 9, 1));
    config.policy = LedgerPolicy::Strict;
    config.capital = 10.0;
    let data = PreparedData::new(vec![
        bar("rb88:CTP", dt(2, 9, 0), [50.0, 51.0, 49.0, 50.0]),
        bar("rb88:CTP", dt(2, 9, 1), [50.0, 55.0, 48.0, 53.0]),
    ]);
    let mut engine = BacktestEngine::new(config, Box::new(strategy));
    engine.run(&data).unwrap();

    assert!(engine.trades().is_empty());
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(engine.ledger().balance(), 10.0);
    assert_eq!(engine.ledger().position("rb88:CTP", Direction::Long), 0.0);
    assert_eq!(engine.book().working_stop_orders().count(), 0);
}

// ── Reconstruction and daily results ─────────────────────────────────

#[test]
fn reconstruction_is_idempotent_and_leaves_trades_untouched() {
    let (strategy, _) = Scripted::new(vec![
        step(|ctx, bar| {
            ctx.buy("rb88:CTP", bar.close, 2.0).unwrap();
        }),
        step(|ctx, bar| {
            ctx.sell("rb88:CTP", bar.close, 1.0).unwrap();
        }),
    ]);
    let data = PreparedData::new(vec![
        bar("rb88:CTP", dt(2, 9, 0), [10.0, 10.0, 10.0, 10.0]),
        bar("rb88:CTP", dt(2, 9, 1), [10.0, 11.0, 9.0, 11.0]),
        bar("rb88:CTP", dt(3, 9, 0), [11.0, 13.0, 11.0, 12.0]),
    ]);
    let mut config = bar_config(dt(2, 9, 0), dt(3, 9, 0));
    config.contracts = ContractTable::new().with(
        "rb88:CTP",
        ContractSpec {
            size: 10.0,
            rate: 0.001,
            ..ContractSpec::default()
        },
    );
    let mut engine = BacktestEngine::new(config, Box::new(strategy));
    engine.run(&data).unwrap();

    let trades_before = engine.trades().to_vec();
    let first = engine.trading_results();
    let second = engine.trading_results();
    assert_eq!(first, second);
    assert_eq!(engine.trades(), trades_before.as_slice());

    // One paired result, one closed at the last mark.
    assert_eq!(first.len(), 2);
    assert_eq!(first[1].exit_label(), "LastDay");
    assert_eq!(first[1].exit_price, 12.0);

    let daily = engine.daily_results();
    assert_eq!(daily.len(), 2);
    assert_eq!(engine.daily_totals().len(), 2);
    assert_eq!(daily[1].open_position, 2.0);
    assert_eq!(daily[1].close_position, 1.0);
}

// ── Determinism and data plumbing ────────────────────────────────────

fn dual_ma_run(source: &dyn SnapshotSource) -> (Vec<Trade>, f64) {
    let params = ParamSet::from([
        ("fast_window".to_string(), serde_json::json!(5)),
        ("slow_window".to_string(), serde_json::json!(15)),
    ]);
    let strategy = build_strategy("dual_ma", &symbols(), &params).unwrap();
    let mut config = bar_config(dt(2, 9, 0), dt(5, 15, 0));
    config.init_hours = 24;
    let mut engine = BacktestEngine::new(config, strategy);
    engine.run(source).unwrap();
    (engine.trades().to_vec(), engine.ledger().balance())
}

#[test]
fn identical_inputs_reproduce_identical_trades() {
    let feed = DataFeed::new(MemoryStore::new()).with_remote(SyntheticStore::with_seed(11));
    let (trades_a, balance_a) = dual_ma_run(&feed);
    let (trades_b, balance_b) = dual_ma_run(&feed);
    assert!(!trades_a.is_empty());
    assert_eq!(trades_a, trades_b);
    assert_eq!(balance_a, balance_b);

    let request = LoadRequest::new(&symbols(), BacktestMode::Bar, dt(1, 9, 0), dt(5, 15, 1));
    let prepared = PreparedData::preload(&feed, &request).unwrap();
    let (trades_c, _) = dual_ma_run(&prepared);
    assert_eq!(trades_a, trades_c);
}

#[test]
fn parquet_cache_serves_second_load() {
    let dir = tempfile::tempdir().unwrap();
    let feed = DataFeed::new(ParquetCache::new(dir.path())).with_remote(SyntheticStore::with_seed(3));
    let request = LoadRequest::new(&symbols(), BacktestMode::Bar, dt(2, 9, 0), dt(3, 15, 0));

    let (first, report) = feed.load_with_report(&request).unwrap();
    assert_eq!(report.from_cache, 0);
    assert_eq!(report.from_remote, first.len());

    let (second, report) = feed.load_with_report(&request).unwrap();
    assert_eq!(second, first);
    assert_eq!(report.from_cache, first.len());
    assert_eq!(report.from_remote, 0);
    assert!(dir.path().join("bar/rb88_CTP/20240102.parquet").exists());
}

#[test]
fn breakout_keeps_closable_within_position() {
    let strategy = build_strategy("channel_breakout", &symbols(), &ParamSet::new()).unwrap();
    let feed = DataFeed::new(MemoryStore::new()).with_remote(SyntheticStore::with_seed(5));
    let mut engine = BacktestEngine::new(bar_config(dt(2, 9, 0), dt(5, 15, 0)), strategy);
    engine.run(&feed).unwrap();

    let ledger = engine.ledger();
    for direction in [Direction::Long, Direction::Short] {
        let entry = ledger.entry("rb88:CTP", direction);
        assert!(entry.closable <= entry.volume + 1e-9);
        assert!(entry.volume >= 0.0);
    }
    for result in engine.trading_results() {
        assert!(result.volume != 0.0);
    }
}
