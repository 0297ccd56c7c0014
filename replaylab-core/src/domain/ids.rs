use serde::{Deserialize, Serialize};
use std::fmt;

/// Limit order id. Monotonic within one engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stop order id, rendered with the `STOP.` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StopOrderId(pub u64);

impl fmt::Display for StopOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "STOP.{}", self.0)
    }
}

/// Trade id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TradeId(pub u64);

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-run id counters.
///
/// Every engine instance owns one, so ids are unique and monotonic within a run
/// and two runs with identical inputs hand out identical ids.
#[derive(Debug, Clone, Default)]
pub struct IdGen {
    order: u64,
    stop: u64,
    trade: u64,
}

impl IdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_order(&mut self) -> OrderId {
        self.order += 1;
        OrderId(self.order)
    }

    pub fn next_stop(&mut self) -> StopOrderId {
        self.stop += 1;
        StopOrderId(self.stop)
    }

    pub fn next_trade(&mut self) -> TradeId {
        self.trade += 1;
        TradeId(self.trade)
    }
}
