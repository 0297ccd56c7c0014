//! Domain types for ReplayLab

pub mod contract;
pub mod ids;
pub mod order;
pub mod snapshot;
pub mod trade;

pub use contract::{ContractSpec, ContractTable};
pub use ids::{IdGen, OrderId, StopOrderId, TradeId};
pub use order::{
    Direction, Offset, Order, OrderKind, OrderStatus, PriceType, StopOrder, StopOrderStatus,
};
pub use snapshot::{BacktestMode, Bar, Snapshot, Tick, LADDER_DEPTH};
pub use trade::Trade;

/// Symbol type alias
pub type Symbol = String;

/// Round a volume to the ledger's 4-decimal precision.
pub fn round_volume(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}
