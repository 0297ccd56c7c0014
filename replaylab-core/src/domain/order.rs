//! Orders and stop orders.
//!
//! Limit orders rest in the book until a snapshot crosses them or they are
//! cancelled: `Pending → {Filled | Cancelled}`. Stop orders are held locally
//! and convert into an immediately filled order when triggered:
//! `Waiting → {Triggered | Cancelled}`.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{OrderId, StopOrderId};

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// +1 for long, -1 for short.
    pub fn sign(&self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => f.write_str("LONG"),
            Self::Short => f.write_str("SHORT"),
        }
    }
}

/// Whether an order opens a position, closes the opposite one, or is a spot trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Offset {
    Open,
    Close,
    /// Spot, no leverage. Buys add to the long side, sells reduce it.
    None,
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("OPEN"),
            Self::Close => f.write_str("CLOSE"),
            Self::None => f.write_str("NONE"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceType {
    #[default]
    Limit,
    /// Simulated as an aggressive limit far through the market.
    Market,
}

/// Strategy-facing order kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    /// Long / open.
    Buy,
    /// Short / close (closes a long position).
    Sell,
    /// Short / open.
    Short,
    /// Long / close (closes a short position).
    Cover,
}

impl OrderKind {
    pub fn direction(&self) -> Direction {
        match self {
            Self::Buy | Self::Cover => Direction::Long,
            Self::Sell | Self::Short => Direction::Short,
        }
    }

    pub fn offset(&self) -> Offset {
        match self {
            Self::Buy | Self::Short => Offset::Open,
            Self::Sell | Self::Cover => Offset::Close,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    /// Representable for downstream consumers; the simulator fills whole orders.
    PartiallyFilled,
    Filled,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled)
    }
}

/// A limit order, resting or historical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol: String,
    pub direction: Direction,
    pub offset: Offset,
    pub price_type: PriceType,
    /// Working price after tick rounding (and the market multiplier, if any).
    pub price: f64,
    pub volume: f64,
    pub traded: f64,
    /// Average fill price once traded.
    pub avg_price: f64,
    pub status: OrderStatus,
    /// Capital held against this order since placement.
    pub reserved: f64,
    pub created_at: NaiveDateTime,
    pub cancelled_at: Option<NaiveDateTime>,
    /// Set once the order has been reported as queued at the venue.
    #[serde(skip)]
    pub(crate) acknowledged: bool,
}

impl Order {
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// The side whose closable volume a close order draws from.
    pub fn closes(&self) -> Option<Direction> {
        match self.offset {
            Offset::Close => Some(self.direction.opposite()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopOrderStatus {
    Waiting,
    Triggered,
    Cancelled,
}

/// A locally held stop order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopOrder {
    pub id: StopOrderId,
    pub symbol: String,
    pub direction: Direction,
    pub offset: Offset,
    pub price_type: PriceType,
    /// Trigger price after tick rounding.
    pub price: f64,
    pub volume: f64,
    pub status: StopOrderStatus,
    /// Order generated when the stop triggered.
    pub order_id: Option<OrderId>,
    pub created_at: NaiveDateTime,
    pub cancelled_at: Option<NaiveDateTime>,
}
