//! Per-day mark-to-market results.
//!
//! During the replay the engine only records the last mark of each
//! (symbol, date) it sees. Day keys therefore come from snapshot timestamps,
//! never from trades: a day without trades still exists and carries position
//! pnl. [`calculate_daily_results`] builds fresh [`DailyResult`]s from those
//! marks and the trade ledger on every call, so repeated reporting is
//! idempotent and the ledger is never touched.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::domain::{ContractSpec, ContractTable, Trade};

/// Last mark per (symbol, date).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyCloses {
    by_symbol: BTreeMap<String, BTreeMap<NaiveDate, f64>>,
}

impl DailyCloses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `price` as the latest close for the snapshot's calendar date.
    pub fn update(&mut self, symbol: &str, datetime: NaiveDateTime, price: f64) {
        self.by_symbol
            .entry(symbol.to_string())
            .or_default()
            .insert(datetime.date(), price);
    }

    pub fn close(&self, symbol: &str, date: NaiveDate) -> Option<f64> {
        self.by_symbol.get(symbol)?.get(&date).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_symbol.clear();
    }
}

/// Result of one symbol on one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyResult {
    pub symbol: String,
    pub date: NaiveDate,
    pub close_price: f64,
    pub previous_close: f64,
    #[serde(skip)]
    pub trades: Vec<Trade>,
    pub trade_count: usize,
    pub open_position: f64,
    pub close_position: f64,
    pub trading_pnl: f64,
    pub position_pnl: f64,
    pub total_pnl: f64,
    pub turnover: f64,
    pub commission: f64,
    pub slippage: f64,
    pub net_pnl: f64,
}

impl DailyResult {
    pub fn new(symbol: impl Into<String>, date: NaiveDate, close_price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            date,
            close_price,
            previous_close: 0.0,
            trades: Vec::new(),
            trade_count: 0,
            open_position: 0.0,
            close_position: 0.0,
            trading_pnl: 0.0,
            position_pnl: 0.0,
            total_pnl: 0.0,
            turnover: 0.0,
            commission: 0.0,
            slippage: 0.0,
            net_pnl: 0.0,
        }
    }

    pub fn add_trade(&mut self, trade: Trade) {
        self.trades.push(trade);
    }

    /// Fill in the pnl fields given the net position carried into the day.
    pub fn calculate_pnl(&mut self, open_position: f64, spec: &ContractSpec) {
        self.open_position = open_position;
        self.position_pnl = open_position * (self.close_price - self.previous_close) * spec.size;
        self.close_position = open_position;
        self.trade_count = self.trades.len();

        self.trading_pnl = 0.0;
        self.turnover = 0.0;
        self.commission = 0.0;
        self.slippage = 0.0;
        for trade in &self.trades {
            let change = trade.signed_volume();
            let notional = trade.price * trade.volume * spec.size;
            self.trading_pnl += change * (self.close_price - trade.price) * spec.size;
            self.close_position += change;
            self.turnover += notional;
            self.commission += notional * spec.rate;
            self.slippage += trade.volume * spec.size * spec.slippage;
        }

        self.total_pnl = self.trading_pnl + self.position_pnl;
        self.net_pnl = self.total_pnl - self.commission - self.slippage;
    }
}

/// Per-symbol daily results, ordered by (date, symbol).
///
/// The previous close of a symbol's first day is zero, so an instrument
/// carried into its first day contributes nothing; positions always start
/// flat in a run.
pub fn calculate_daily_results(
    closes: &DailyCloses,
    trades: &[Trade],
    contracts: &ContractTable,
) -> Vec<DailyResult> {
    let mut days: BTreeMap<&str, BTreeMap<NaiveDate, DailyResult>> = closes
        .by_symbol
        .iter()
        .map(|(symbol, by_date)| {
            let results = by_date
                .iter()
                .map(|(date, close)| (*date, DailyResult::new(symbol.as_str(), *date, *close)))
                .collect();
            (symbol.as_str(), results)
        })
        .collect();

    for trade in trades {
        let date = trade.datetime.date();
        match days
            .get_mut(trade.symbol.as_str())
            .and_then(|by_date| by_date.get_mut(&date))
        {
            Some(day) => day.add_trade(trade.clone()),
            None => warn!(
                symbol = %trade.symbol,
                %date,
                trade = %trade.id,
                "trade on a day with no recorded close; left out of daily results"
            ),
        }
    }

    let mut out = Vec::new();
    for (symbol, by_date) in days {
        let spec = contracts.spec(symbol);
        let mut previous_close = 0.0;
        let mut open_position = 0.0;
        for (_, mut day) in by_date {
            day.previous_close = previous_close;
            previous_close = day.close_price;
            day.calculate_pnl(open_position, &spec);
            open_position = day.close_position;
            out.push(day);
        }
    }
    out.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.symbol.cmp(&b.symbol)));
    out
}

/// Daily results summed across symbols.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyTotals {
    pub date: NaiveDate,
    pub net_pnl: f64,
    pub slippage: f64,
    pub commission: f64,
    pub turnover: f64,
    pub trade_count: usize,
    pub trading_pnl: f64,
    pub position_pnl: f64,
    pub total_pnl: f64,
}

/// Sum per-symbol results by date into a single series, ascending by date.
pub fn aggregate_by_date(results: &[DailyResult]) -> Vec<DailyTotals> {
    let mut by_date: BTreeMap<NaiveDate, DailyTotals> = BTreeMap::new();
    for r in results {
        let t = by_date.entry(r.date).or_insert_with(|| DailyTotals {
            date: r.date,
            ..DailyTotals::default()
        });
        t.net_pnl += r.net_pnl;
        t.slippage += r.slippage;
        t.commission += r.commission;
        t.turnover += r.turnover;
        t.trade_count += r.trade_count;
        t.trading_pnl += r.trading_pnl;
        t.position_pnl += r.position_pnl;
        t.total_pnl += r.total_pnl;
    }
    by_date.into_values().collect()
}
