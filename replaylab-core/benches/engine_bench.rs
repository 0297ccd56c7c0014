//! Criterion benchmarks for ReplayLab hot paths.
//!
//! Benchmarks:
//! 1. Replay loop (dual_ma and channel_breakout over synthetic minute bars)
//! 2. Order book operations (place, cross, cancel)
//! 3. Post-run analysis (trade pairing and daily results)

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use chrono::{NaiveDate, NaiveDateTime};
use replaylab_core::data::{
    DataFeed, LoadRequest, MemoryStore, PreparedData, SnapshotSource, SyntheticStore,
};
use replaylab_core::domain::{BacktestMode, Bar, ContractSpec, Direction, Offset, PriceType, Snapshot};
use replaylab_core::engine::{
    BacktestEngine, EngineConfig, Ledger, LedgerPolicy, OrderBook, OrderRequest,
};
use replaylab_core::strategy::{build_strategy, ParamSet};

// ── Helpers ──────────────────────────────────────────────────────────

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn symbols() -> Vec<String> {
    vec!["rb88:CTP".to_string()]
}

fn prepared(days: i64) -> (PreparedData, EngineConfig) {
    let end = start() + chrono::Duration::days(days);
    let feed = DataFeed::new(MemoryStore::new()).with_remote(SyntheticStore::with_seed(1));
    let request = LoadRequest::new(&symbols(), BacktestMode::Bar, start(), end);
    let data = PreparedData::preload(&feed, &request).unwrap();
    let config = EngineConfig::new(&symbols(), BacktestMode::Bar, start(), end);
    (data, config)
}

fn bar(minute: i64, close: f64) -> Snapshot {
    Snapshot::Bar(Bar {
        symbol: "rb88:CTP".into(),
        datetime: start() + chrono::Duration::minutes(minute),
        open: close,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 1.0,
        open_interest: 0.0,
    })
}

// ── 1. Replay Loop ───────────────────────────────────────────────────

fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay_loop");
    group.sample_size(20);

    for &days in &[5_i64, 20] {
        let (data, config) = prepared(days);
        for name in ["dual_ma", "channel_breakout"] {
            group.bench_with_input(BenchmarkId::new(name, days), &days, |b, _| {
                b.iter(|| {
                    let strategy = build_strategy(name, &symbols(), &ParamSet::new()).unwrap();
                    let mut engine = BacktestEngine::new(config.clone(), strategy);
                    engine.run(black_box(&data as &dyn SnapshotSource)).unwrap();
                    engine.trades().len()
                });
            });
        }
    }

    group.finish();
}

// ── 2. Order Book Operations ─────────────────────────────────────────

fn request(direction: Direction, offset: Offset, price: f64) -> OrderRequest {
    OrderRequest {
        symbol: "rb88:CTP".into(),
        direction,
        offset,
        price,
        volume: 1.0,
        price_type: PriceType::Limit,
    }
}

fn bench_order_book(c: &mut Criterion) {
    let mut group = c.benchmark_group("order_book");
    let spec = ContractSpec::default();

    group.bench_function("place_cross_100", |b| {
        b.iter(|| {
            let mut book = OrderBook::new(LedgerPolicy::Permissive);
            let mut ledger = Ledger::new(1e9);
            let mut events = Vec::new();
            for i in 0..100 {
                let price = 100.0 + (i % 5) as f64;
                book.send_order(request(Direction::Long, Offset::Open, price), &spec, &mut ledger, start())
                    .unwrap();
            }
            book.cross_limit_orders(black_box(&bar(1, 100.0)), &mut ledger, &mut events);
            events.len()
        });
    });

    group.bench_function("place_cancel_100", |b| {
        b.iter(|| {
            let mut book = OrderBook::new(LedgerPolicy::Permissive);
            let mut ledger = Ledger::new(1e9);
            let mut events = Vec::new();
            for _ in 0..100 {
                book.send_order(request(Direction::Short, Offset::Open, 200.0), &spec, &mut ledger, start())
                    .unwrap();
            }
            book.cancel_all(&mut ledger, start(), &mut events)
        });
    });

    group.finish();
}

// ── 3. Post-run Analysis ─────────────────────────────────────────────

fn bench_analysis(c: &mut Criterion) {
    let mut group = c.benchmark_group("post_run");
    let (data, config) = prepared(20);
    let strategy = build_strategy("dual_ma", &symbols(), &ParamSet::new()).unwrap();
    let mut engine = BacktestEngine::new(config, strategy);
    engine.run(&data).unwrap();

    group.bench_function("trading_results", |b| {
        b.iter(|| black_box(engine.trading_results()).len());
    });
    group.bench_function("daily_totals", |b| {
        b.iter(|| black_box(engine.daily_totals()).len());
    });

    group.finish();
}

criterion_group!(benches, bench_replay, bench_order_book, bench_analysis);
criterion_main!(benches);
