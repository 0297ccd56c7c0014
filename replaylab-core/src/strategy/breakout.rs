//! Donchian channel breakout trading with stop orders.

use std::collections::BTreeMap;

use super::registry::{param_f64, param_usize, ParamSet, StrategyError};
use super::Strategy;
use crate::domain::{Bar, Direction, OrderKind, Snapshot};
use crate::engine::StrategyContext;

#[derive(Debug, Clone, Default)]
struct Channel {
    highs: Vec<f64>,
    lows: Vec<f64>,
}

impl Channel {
    fn push(&mut self, bar: &Bar, keep: usize) {
        self.highs.push(bar.high);
        self.lows.push(bar.low);
        if self.highs.len() > keep {
            let excess = self.highs.len() - keep;
            self.highs.drain(..excess);
            self.lows.drain(..excess);
        }
    }

    fn highest(&self, window: usize) -> Option<f64> {
        (self.highs.len() >= window)
            .then(|| self.highs[self.highs.len() - window..].iter().copied().fold(f64::MIN, f64::max))
    }

    fn lowest(&self, window: usize) -> Option<f64> {
        (self.lows.len() >= window)
            .then(|| self.lows[self.lows.len() - window..].iter().copied().fold(f64::MAX, f64::min))
    }
}

/// Enters on a break of the `entry_window` high or low and exits on a break
/// of the opposite `exit_window` extreme.
///
/// Stops are re-placed after every bar from the channel including that bar,
/// so they are live for the next one.
#[derive(Debug, Clone)]
pub struct ChannelBreakout {
    symbols: Vec<String>,
    entry_window: usize,
    exit_window: usize,
    volume: f64,
    channels: BTreeMap<String, Channel>,
}

impl ChannelBreakout {
    pub const NAME: &'static str = "channel_breakout";

    pub fn new(symbols: &[String], entry_window: usize, exit_window: usize, volume: f64) -> Self {
        Self {
            symbols: symbols.to_vec(),
            entry_window,
            exit_window,
            volume,
            channels: BTreeMap::new(),
        }
    }

    pub fn from_params(symbols: &[String], params: &ParamSet) -> Result<Self, StrategyError> {
        let entry = param_usize(params, "entry_window", 20)?;
        let exit = param_usize(params, "exit_window", 10)?;
        let volume = param_f64(params, "volume", 1.0)?;
        if entry == 0 || exit == 0 {
            return Err(StrategyError::InvalidConfig(
                "entry_window and exit_window must be positive".into(),
            ));
        }
        if volume <= 0.0 {
            return Err(StrategyError::InvalidConfig(format!(
                "volume must be positive, got {volume}"
            )));
        }
        Ok(Self::new(symbols, entry, exit, volume))
    }

    fn record(&mut self, bar: &Bar) -> Option<&Channel> {
        if !self.symbols.iter().any(|s| *s == bar.symbol) {
            return None;
        }
        let keep = self.entry_window.max(self.exit_window);
        let channel = self.channels.entry(bar.symbol.clone()).or_default();
        channel.push(bar, keep);
        Some(channel)
    }
}

impl Strategy for ChannelBreakout {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn on_init(&mut self, _ctx: &mut StrategyContext<'_>, history: &[Snapshot]) {
        for snapshot in history {
            if let Snapshot::Bar(bar) = snapshot {
                self.record(bar);
            }
        }
    }

    fn on_bar(&mut self, ctx: &mut StrategyContext<'_>, bar: &Bar) {
        let (entry_window, exit_window, volume) = (self.entry_window, self.exit_window, self.volume);
        let Some(channel) = self.record(bar) else {
            return;
        };
        let levels = (
            channel.highest(entry_window),
            channel.lowest(entry_window),
            channel.highest(exit_window),
            channel.lowest(exit_window),
        );
        let (Some(entry_high), Some(entry_low), Some(exit_high), Some(exit_low)) = levels else {
            return;
        };

        ctx.cancel_symbol(&bar.symbol);
        let long = ctx.position(&bar.symbol, Direction::Long);
        let short = ctx.position(&bar.symbol, Direction::Short);

        let mut results = Vec::new();
        if long > 0.0 {
            results.push(ctx.send_stop_order(&bar.symbol, OrderKind::Sell, exit_low, long));
        }
        if short > 0.0 {
            results.push(ctx.send_stop_order(&bar.symbol, OrderKind::Cover, exit_high, short));
        }
        if long <= 0.0 && short <= 0.0 {
            results.push(ctx.send_stop_order(&bar.symbol, OrderKind::Buy, entry_high, volume));
            results.push(ctx.send_stop_order(&bar.symbol, OrderKind::Short, entry_low, volume));
        }
        for result in results {
            if let Err(e) = result {
                ctx.write_log(format!("stop order rejected: {e}"));
            }
        }
    }
}
