//! Property tests for crossing and ledger invariants.
//!
//! Uses proptest to verify:
//! 1. Limit improvement: a bar-mode buy that crosses fills at `min(price, open)`
//! 2. Stop slippage: a bar-mode sell stop that triggers fills at `min(open, trigger)`
//! 3. Round trip: open then fully close restores closable and position
//! 4. Closable never exceeds position, whatever the order sequence

use chrono::{NaiveDate, NaiveDateTime};
use proptest::prelude::*;
use replaylab_core::domain::{Bar, ContractSpec, Direction, Offset, PriceType, Snapshot};
use replaylab_core::engine::{
    BookEvent, Ledger, LedgerPolicy, LimitCross, OrderBook, OrderRequest, StopCross,
};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_price() -> impl Strategy<Value = f64> {
    (1.0..500.0_f64).prop_map(|p| (p * 100.0).round() / 100.0)
}

fn arb_volume() -> impl Strategy<Value = f64> {
    (1u32..50).prop_map(f64::from)
}

/// (open, high, low, close) with low ≤ open, close ≤ high and low > 0.
fn arb_bar() -> impl Strategy<Value = (f64, f64, f64, f64)> {
    (arb_price(), 0.0..20.0_f64, 0.0..20.0_f64, -1.0..1.0_f64).prop_map(|(open, up, down, t)| {
        let high = open + up;
        let low = (open - down).max(0.01);
        let close = if t >= 0.0 { open + t * up } else { open + t * (open - low) };
        (open, high, low, close)
    })
}

fn at(minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 2)
        .unwrap()
        .and_hms_opt(9, minute, 0)
        .unwrap()
}

fn snapshot((open, high, low, close): (f64, f64, f64, f64), minute: u32) -> Snapshot {
    Snapshot::Bar(Bar {
        symbol: "rb88".into(),
        datetime: at(minute),
        open,
        high,
        low,
        close,
        volume: 1.0,
        open_interest: 0.0,
    })
}

fn request(direction: Direction, offset: Offset, price: f64, volume: f64) -> OrderRequest {
    OrderRequest {
        symbol: "rb88".into(),
        direction,
        offset,
        price,
        volume,
        price_type: PriceType::Limit,
    }
}

// ── 1. Limit improvement ─────────────────────────────────────────────

proptest! {
    /// On a bar of open=100, high=110, low=95 any buy at or above the low
    /// fills at the better of its limit and the open.
    #[test]
    fn buy_limit_fills_at_min_of_price_and_open(price in 95.0..200.0_f64) {
        let cross = LimitCross::of(&snapshot((100.0, 110.0, 95.0, 105.0), 0));
        prop_assert_eq!(cross.fill_price(Direction::Long, price), Some(price.min(100.0)));
    }

    #[test]
    fn buy_limit_below_low_never_fills(bar in arb_bar(), gap in 0.01..50.0_f64) {
        let cross = LimitCross::of(&snapshot(bar, 0));
        prop_assert_eq!(cross.fill_price(Direction::Long, bar.2 - gap), None);
    }
}

// ── 2. Stop slippage ─────────────────────────────────────────────────

proptest! {
    /// A sell stop at or above the low triggers and fills at the worse of
    /// the open and the trigger.
    #[test]
    fn sell_stop_fills_at_min_of_open_and_trigger(bar in arb_bar(), above in 0.0..50.0_f64) {
        let trigger = bar.2 + above;
        let cross = StopCross::of(&snapshot(bar, 0));
        prop_assert_eq!(cross.fill_price(Direction::Short, trigger), Some(bar.0.min(trigger)));
    }

    #[test]
    fn buy_stop_fills_at_max_of_open_and_trigger(bar in arb_bar(), below in 0.0..50.0_f64) {
        let trigger = (bar.1 - below).max(0.01);
        let cross = StopCross::of(&snapshot(bar, 0));
        prop_assert_eq!(cross.fill_price(Direction::Long, trigger), Some(bar.0.max(trigger)));
    }
}

// ── 3. Round trip ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn open_then_close_round_trips(volume in arb_volume(), bar in arb_bar()) {
        let spec = ContractSpec::default();
        let mut book = OrderBook::new(LedgerPolicy::Permissive);
        let mut ledger = Ledger::new(1e9);
        let mut events: Vec<BookEvent> = Vec::new();
        let before = ledger.entry("rb88", Direction::Long);

        // A buy at the high always crosses; a sell at the low always crosses.
        book.send_order(request(Direction::Long, Offset::Open, bar.1, volume), &spec, &mut ledger, at(0)).unwrap();
        book.cross_limit_orders(&snapshot(bar, 1), &mut ledger, &mut events);
        prop_assert_eq!(ledger.position("rb88", Direction::Long), volume);
        prop_assert_eq!(ledger.closable("rb88", Direction::Long), volume);

        book.send_order(request(Direction::Short, Offset::Close, bar.2, volume), &spec, &mut ledger, at(1)).unwrap();
        book.cross_limit_orders(&snapshot(bar, 2), &mut ledger, &mut events);

        prop_assert_eq!(ledger.entry("rb88", Direction::Long), before);
        prop_assert_eq!(book.trades().len(), 2);
    }
}

// ── 4. Closable bound ────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Action {
    Open(Direction, f64),
    Close(Direction, f64),
    CancelAll,
    Cross,
}

fn arb_action() -> impl Strategy<Value = Action> {
    let direction = prop_oneof![Just(Direction::Long), Just(Direction::Short)];
    prop_oneof![
        (direction.clone(), arb_volume()).prop_map(|(d, v)| Action::Open(d, v)),
        (direction, arb_volume()).prop_map(|(d, v)| Action::Close(d, v)),
        Just(Action::CancelAll),
        Just(Action::Cross),
    ]
}

proptest! {
    #[test]
    fn closable_never_exceeds_position(actions in prop::collection::vec(arb_action(), 1..40)) {
        let spec = ContractSpec::default();
        let mut book = OrderBook::new(LedgerPolicy::Permissive);
        let mut ledger = Ledger::new(1e9);
        let mut events = Vec::new();
        let bar = (100.0, 101.0, 99.0, 100.0);

        for (i, action) in actions.into_iter().enumerate() {
            let now = at((i % 60) as u32);
            match action {
                // Closing `d` means trading the opposite side at a price that always crosses.
                Action::Open(d, v) => {
                    let price = if d == Direction::Long { 101.0 } else { 99.0 };
                    let _ = book.send_order(request(d, Offset::Open, price, v), &spec, &mut ledger, now);
                }
                Action::Close(d, v) => {
                    let side = d.opposite();
                    let price = if side == Direction::Long { 101.0 } else { 99.0 };
                    let _ = book.send_order(request(side, Offset::Close, price, v), &spec, &mut ledger, now);
                }
                Action::CancelAll => {
                    book.cancel_all(&mut ledger, now, &mut events);
                }
                Action::Cross => {
                    book.cross_limit_orders(&snapshot(bar, (i % 60) as u32), &mut ledger, &mut events);
                }
            }
            for direction in [Direction::Long, Direction::Short] {
                let entry = ledger.entry("rb88", direction);
                prop_assert!(entry.closable <= entry.volume + 1e-9,
                    "closable {} > volume {} after step {}", entry.closable, entry.volume, i);
            }
        }
    }
}
