//! Strategy capability interface and the built-in reference strategies.
//!
//! The engine never assumes a concrete strategy type. A strategy reacts to
//! snapshots and to order, trade and stop-order notifications, acting only
//! through the [`StrategyContext`] it is handed.

pub mod breakout;
pub mod dual_ma;
pub mod registry;

pub use breakout::ChannelBreakout;
pub use dual_ma::DualMa;
pub use registry::{build_strategy, ParamSet, StrategyError, STRATEGY_NAMES};

use crate::domain::{Bar, Order, Snapshot, StopOrder, Tick, Trade};
use crate::engine::StrategyContext;

/// Callbacks a strategy may implement. All default to doing nothing.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    /// Called once with the warm-up history that precedes the replay range.
    fn on_init(&mut self, _ctx: &mut StrategyContext<'_>, _history: &[Snapshot]) {}

    fn on_start(&mut self, _ctx: &mut StrategyContext<'_>) {}

    fn on_bar(&mut self, _ctx: &mut StrategyContext<'_>, _bar: &Bar) {}

    fn on_tick(&mut self, _ctx: &mut StrategyContext<'_>, _tick: &Tick) {}

    fn on_order(&mut self, _ctx: &mut StrategyContext<'_>, _order: &Order) {}

    fn on_trade(&mut self, _ctx: &mut StrategyContext<'_>, _trade: &Trade) {}

    fn on_stop_order(&mut self, _ctx: &mut StrategyContext<'_>, _stop: &StopOrder) {}
}

/// Simple moving average over the last `window` values of `values`.
pub(crate) fn sma(values: &[f64], window: usize) -> Option<f64> {
    if window == 0 || values.len() < window {
        return None;
    }
    let tail = &values[values.len() - window..];
    Some(tail.iter().sum::<f64>() / window as f64)
}
