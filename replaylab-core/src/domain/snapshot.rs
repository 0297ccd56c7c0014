//! Market snapshots: one-minute bars and level-5 ticks.
//!
//! A run replays exactly one kind, declared by [`BacktestMode`]. The matching
//! logic only needs a handful of fields from either kind, exposed through the
//! accessors on [`Snapshot`].

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which snapshot kind a run replays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BacktestMode {
    #[default]
    Bar,
    Tick,
}

impl BacktestMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bar => "bar",
            Self::Tick => "tick",
        }
    }
}

impl fmt::Display for BacktestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub datetime: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub open_interest: f64,
}

/// Depth of the bid/ask ladder carried by a tick.
pub const LADDER_DEPTH: usize = 5;

/// Last trade plus a five-level bid/ask ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub datetime: NaiveDateTime,
    pub last_price: f64,
    #[serde(default)]
    pub last_volume: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub open_interest: f64,
    #[serde(default)]
    pub open_price: f64,
    #[serde(default)]
    pub high_price: f64,
    #[serde(default)]
    pub low_price: f64,
    pub bid_prices: [f64; LADDER_DEPTH],
    pub bid_volumes: [f64; LADDER_DEPTH],
    pub ask_prices: [f64; LADDER_DEPTH],
    pub ask_volumes: [f64; LADDER_DEPTH],
}

impl Tick {
    /// Tick with only the last price and the top of book set.
    pub fn top_of_book(
        symbol: impl Into<String>,
        datetime: NaiveDateTime,
        last_price: f64,
        bid_price_1: f64,
        ask_price_1: f64,
    ) -> Self {
        let mut bid_prices = [0.0; LADDER_DEPTH];
        let mut ask_prices = [0.0; LADDER_DEPTH];
        bid_prices[0] = bid_price_1;
        ask_prices[0] = ask_price_1;
        Self {
            symbol: symbol.into(),
            datetime,
            last_price,
            last_volume: 0.0,
            volume: 0.0,
            open_interest: 0.0,
            open_price: 0.0,
            high_price: 0.0,
            low_price: 0.0,
            bid_prices,
            bid_volumes: [0.0; LADDER_DEPTH],
            ask_prices,
            ask_volumes: [0.0; LADDER_DEPTH],
        }
    }

    pub fn bid_price_1(&self) -> f64 {
        self.bid_prices[0]
    }

    pub fn ask_price_1(&self) -> f64 {
        self.ask_prices[0]
    }
}

/// A bar or a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Snapshot {
    Bar(Bar),
    Tick(Tick),
}

impl Snapshot {
    pub fn symbol(&self) -> &str {
        match self {
            Self::Bar(b) => &b.symbol,
            Self::Tick(t) => &t.symbol,
        }
    }

    pub fn datetime(&self) -> NaiveDateTime {
        match self {
            Self::Bar(b) => b.datetime,
            Self::Tick(t) => t.datetime,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.datetime().date()
    }

    pub fn mode(&self) -> BacktestMode {
        match self {
            Self::Bar(_) => BacktestMode::Bar,
            Self::Tick(_) => BacktestMode::Tick,
        }
    }

    /// Mark-to-market price: bar close or last traded price.
    pub fn mark(&self) -> f64 {
        match self {
            Self::Bar(b) => b.close,
            Self::Tick(t) => t.last_price,
        }
    }
}

impl From<Bar> for Snapshot {
    fn from(bar: Bar) -> Self {
        Self::Bar(bar)
    }
}

impl From<Tick> for Snapshot {
    fn from(tick: Tick) -> Self {
        Self::Tick(tick)
    }
}
