//! Trade reconstruction: pairs opening and closing trades into round trips.
//!
//! Pairing is FIFO per symbol over a private copy of the trade ledger:
//! - long open and spot buys queue as long entries
//! - short opens queue as short entries
//! - long closes pair against the short queue (result volume negative)
//! - short closes and spot sells pair against the long queue (result volume positive)
//!
//! A close larger than everything queued is a ledger inconsistency. It is
//! logged and pairing for that trade stops; no volume is invented. Entries
//! still open at the end are closed at the symbol's last mark.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::warn;

use crate::domain::{round_volume, ContractSpec, ContractTable, Direction, Offset, OrderId, Trade};

/// One entry/exit pair. `volume` is signed: positive for a long round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingResult {
    pub symbol: String,
    pub entry_price: f64,
    pub entry_dt: NaiveDateTime,
    pub entry_id: OrderId,
    pub exit_price: f64,
    pub exit_dt: NaiveDateTime,
    /// `None` when the position was closed synthetically at the last mark.
    pub exit_id: Option<OrderId>,
    pub volume: f64,
    pub turnover: f64,
    pub commission: f64,
    pub slippage: f64,
    pub pnl: f64,
}

impl TradingResult {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        entry_price: f64,
        entry_dt: NaiveDateTime,
        entry_id: OrderId,
        exit_price: f64,
        exit_dt: NaiveDateTime,
        exit_id: Option<OrderId>,
        volume: f64,
        spec: &ContractSpec,
    ) -> Self {
        let turnover = (entry_price + exit_price) * spec.size * volume.abs();
        let commission = turnover * spec.rate;
        let slippage = spec.slippage * 2.0 * spec.size * volume.abs();
        let pnl = (exit_price - entry_price) * volume * spec.size - commission - slippage;
        Self {
            symbol: symbol.into(),
            entry_price,
            entry_dt,
            entry_id,
            exit_price,
            exit_dt,
            exit_id,
            volume,
            turnover,
            commission,
            slippage,
            pnl,
        }
    }

    /// Exit id as exported: the order id, or `LastDay` for a synthetic close.
    pub fn exit_label(&self) -> String {
        self.exit_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "LastDay".to_string())
    }

    pub fn holding(&self) -> chrono::Duration {
        self.exit_dt - self.entry_dt
    }
}

/// Where open entries are closed at the end of the run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LastMark {
    pub price: f64,
    pub datetime: NaiveDateTime,
}

#[derive(Default)]
struct Queues {
    long: VecDeque<Trade>,
    short: VecDeque<Trade>,
}

/// Pair the trade ledger into [`TradingResult`]s.
///
/// `trades` is cloned before pairing mutates remaining volumes, so calling
/// this repeatedly gives identical output.
pub fn reconstruct_trades(
    trades: &[Trade],
    last_marks: &BTreeMap<String, LastMark>,
    contracts: &ContractTable,
) -> Vec<TradingResult> {
    let mut queues: BTreeMap<String, Queues> = BTreeMap::new();
    let mut results = Vec::new();

    for trade in trades.iter().cloned() {
        let spec = contracts.spec(&trade.symbol);
        let q = queues.entry(trade.symbol.clone()).or_default();
        match (trade.direction, trade.offset) {
            (Direction::Long, Offset::Open | Offset::None) => q.long.push_back(trade),
            (Direction::Short, Offset::Open) => q.short.push_back(trade),
            (Direction::Long, Offset::Close) => {
                pair(trade, &mut q.short, -1.0, &spec, &mut results);
            }
            (Direction::Short, Offset::Close | Offset::None) => {
                pair(trade, &mut q.long, 1.0, &spec, &mut results);
            }
        }
    }

    for (symbol, q) in &queues {
        close_at_mark(symbol, &q.long, 1.0, last_marks, contracts, &mut results);
    }
    for (symbol, q) in &queues {
        close_at_mark(symbol, &q.short, -1.0, last_marks, contracts, &mut results);
    }
    results
}

fn pair(
    mut exit: Trade,
    entries: &mut VecDeque<Trade>,
    sign: f64,
    spec: &ContractSpec,
    results: &mut Vec<TradingResult>,
) {
    while exit.volume > 0.0 {
        let Some(entry) = entries.front_mut() else {
            warn!(
                symbol = %exit.symbol,
                trade = %exit.id,
                unmatched = exit.volume,
                "close volume exceeds open volume; check the strategy"
            );
            return;
        };
        let closed = exit.volume.min(entry.volume);
        results.push(TradingResult::new(
            exit.symbol.clone(),
            entry.price,
            entry.datetime,
            entry.order_id,
            exit.price,
            exit.datetime,
            Some(exit.order_id),
            sign * closed,
            spec,
        ));
        entry.volume = round_volume(entry.volume - closed);
        exit.volume = round_volume(exit.volume - closed);
        if entry.volume <= 0.0 {
            entries.pop_front();
        }
    }
}

fn close_at_mark(
    symbol: &str,
    open: &VecDeque<Trade>,
    sign: f64,
    last_marks: &BTreeMap<String, LastMark>,
    contracts: &ContractTable,
    results: &mut Vec<TradingResult>,
) {
    if open.is_empty() {
        return;
    }
    let Some(mark) = last_marks.get(symbol) else {
        warn!(symbol, "no last mark for open position; left unrealized");
        return;
    };
    let spec = contracts.spec(symbol);
    for entry in open {
        results.push(TradingResult::new(
            symbol,
            entry.price,
            entry.datetime,
            entry.order_id,
            mark.price,
            mark.datetime,
            None,
            sign * entry.volume,
            &spec,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TradeId;
    use chrono::NaiveDate;

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn trade(id: u64, direction: Direction, offset: Offset, price: f64, volume: f64) -> Trade {
        Trade {
            id: TradeId(id),
            order_id: OrderId(id),
            symbol: "rb88".into(),
            direction,
            offset,
            price,
            volume,
            datetime: at(id as u32),
        }
    }

    fn marks(price: f64) -> BTreeMap<String, LastMark> {
        BTreeMap::from([(
            "rb88".to_string(),
            LastMark {
                price,
                datetime: at(20),
            },
        )])
    }

    #[test]
    fn trading_result_numerics() {
        let spec = ContractSpec {
            size: 10.0,
            price_tick: 1.0,
            rate: 0.001,
            slippage: 1.0,
        };
        let r = TradingResult::new("rb88", 100.0, at(1), OrderId(1), 110.0, at(2), Some(OrderId(2)), -2.0, &spec);
        assert_eq!(r.turnover, 210.0 * 10.0 * 2.0);
        assert!((r.commission - 4.2).abs() < 1e-9);
        assert_eq!(r.slippage, 40.0);
        // short round trip lost 10 * 2 * 10 = 200
        assert!((r.pnl - (-200.0 - 4.2 - 40.0)).abs() < 1e-9);
    }

    #[test]
    fn fifo_pairs_partial_volumes() {
        let trades = vec![
            trade(1, Direction::Long, Offset::Open, 100.0, 2.0),
            trade(2, Direction::Long, Offset::Open, 102.0, 3.0),
            trade(3, Direction::Short, Offset::Close, 105.0, 4.0),
        ];
        let results = reconstruct_trades(&trades, &marks(110.0), &ContractTable::new());
        assert_eq!(results.len(), 3);
        assert_eq!((results[0].entry_price, results[0].volume), (100.0, 2.0));
        assert_eq!((results[1].entry_price, results[1].volume), (102.0, 2.0));
        // one unit of the second entry is left and closed at the last mark
        assert_eq!(results[2].entry_price, 102.0);
        assert_eq!(results[2].exit_price, 110.0);
        assert_eq!(results[2].volume, 1.0);
        assert_eq!(results[2].exit_label(), "LastDay");
    }

    #[test]
    fn short_round_trip_has_negative_volume() {
        let trades = vec![
            trade(1, Direction::Short, Offset::Open, 100.0, 1.0),
            trade(2, Direction::Long, Offset::Close, 90.0, 1.0),
        ];
        let results = reconstruct_trades(&trades, &marks(95.0), &ContractTable::new());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].volume, -1.0);
        assert_eq!(results[0].pnl, 10.0);
        assert_eq!(results[0].exit_id, Some(OrderId(2)));
    }

    #[test]
    fn over_close_stops_without_fabricating() {
        let trades = vec![
            trade(1, Direction::Long, Offset::Open, 100.0, 1.0),
            trade(2, Direction::Short, Offset::Close, 101.0, 3.0),
        ];
        let results = reconstruct_trades(&trades, &marks(101.0), &ContractTable::new());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].volume, 1.0);
    }

    #[test]
    fn close_with_empty_queue_is_skipped() {
        let trades = vec![trade(1, Direction::Long, Offset::Close, 100.0, 1.0)];
        assert!(reconstruct_trades(&trades, &marks(100.0), &ContractTable::new()).is_empty());
    }

    #[test]
    fn spot_trades_pair_on_long_side() {
        let trades = vec![
            trade(1, Direction::Long, Offset::None, 10.0, 5.0),
            trade(2, Direction::Short, Offset::None, 12.0, 5.0),
        ];
        let results = reconstruct_trades(&trades, &marks(11.0), &ContractTable::new());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].pnl, 10.0);
    }

    #[test]
    fn reconstruction_is_idempotent_and_leaves_ledger_alone() {
        let trades = vec![
            trade(1, Direction::Long, Offset::Open, 100.0, 2.0),
            trade(2, Direction::Short, Offset::Close, 101.0, 1.0),
        ];
        let before = trades.clone();
        let first = reconstruct_trades(&trades, &marks(103.0), &ContractTable::new());
        let second = reconstruct_trades(&trades, &marks(103.0), &ContractTable::new());
        assert_eq!(first, second);
        assert_eq!(trades, before);
    }
}
