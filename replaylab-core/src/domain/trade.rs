use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::ids::{OrderId, TradeId};
use super::order::{Direction, Offset};

/// An execution. Immutable once created; the run's trade ledger is append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub order_id: OrderId,
    pub symbol: String,
    pub direction: Direction,
    pub offset: Offset,
    pub price: f64,
    pub volume: f64,
    pub datetime: NaiveDateTime,
}

impl Trade {
    /// Volume signed by direction: positive for long, negative for short.
    pub fn signed_volume(&self) -> f64 {
        self.direction.sign() * self.volume
    }
}
