//! Moving-average crossover trading with limit orders at the bar close.

use std::collections::BTreeMap;

use super::registry::{param_f64, param_usize, ParamSet, StrategyError};
use super::{sma, Strategy};
use crate::domain::{Bar, Direction, Snapshot};
use crate::engine::StrategyContext;

/// Goes long when the fast average crosses above the slow one and short when
/// it crosses below, reversing any opposite position first.
///
/// Working orders on the symbol are cancelled on every bar and re-sent at the
/// new close, so an unfilled order never lingers for more than one bar.
#[derive(Debug, Clone)]
pub struct DualMa {
    symbols: Vec<String>,
    fast_window: usize,
    slow_window: usize,
    volume: f64,
    closes: BTreeMap<String, Vec<f64>>,
}

impl DualMa {
    pub const NAME: &'static str = "dual_ma";

    pub fn new(symbols: &[String], fast_window: usize, slow_window: usize, volume: f64) -> Self {
        Self {
            symbols: symbols.to_vec(),
            fast_window,
            slow_window,
            volume,
            closes: BTreeMap::new(),
        }
    }

    pub fn from_params(symbols: &[String], params: &ParamSet) -> Result<Self, StrategyError> {
        let fast = param_usize(params, "fast_window", 10)?;
        let slow = param_usize(params, "slow_window", 20)?;
        let volume = param_f64(params, "volume", 1.0)?;
        if fast == 0 || fast >= slow {
            return Err(StrategyError::InvalidConfig(format!(
                "fast_window ({fast}) must be positive and below slow_window ({slow})"
            )));
        }
        if volume <= 0.0 {
            return Err(StrategyError::InvalidConfig(format!(
                "volume must be positive, got {volume}"
            )));
        }
        Ok(Self::new(symbols, fast, slow, volume))
    }

    fn record(&mut self, bar: &Bar) -> Option<&[f64]> {
        if !self.symbols.iter().any(|s| *s == bar.symbol) {
            return None;
        }
        let history = self.closes.entry(bar.symbol.clone()).or_default();
        history.push(bar.close);
        let keep = self.slow_window + 1;
        if history.len() > keep {
            history.drain(..history.len() - keep);
        }
        Some(history.as_slice())
    }
}

impl Strategy for DualMa {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn on_init(&mut self, ctx: &mut StrategyContext<'_>, history: &[Snapshot]) {
        for snapshot in history {
            if let Snapshot::Bar(bar) = snapshot {
                self.record(bar);
            }
        }
        ctx.write_log(format!(
            "{} initialised with {} warm-up snapshots",
            Self::NAME,
            history.len()
        ));
    }

    fn on_bar(&mut self, ctx: &mut StrategyContext<'_>, bar: &Bar) {
        let (fast_window, slow_window, volume) = (self.fast_window, self.slow_window, self.volume);
        let Some(history) = self.record(bar) else {
            return;
        };
        if history.len() <= slow_window {
            return;
        }
        let previous = &history[..history.len() - 1];
        let (Some(fast), Some(slow), Some(fast_prev), Some(slow_prev)) = (
            sma(history, fast_window),
            sma(history, slow_window),
            sma(previous, fast_window),
            sma(previous, slow_window),
        ) else {
            return;
        };

        ctx.cancel_symbol(&bar.symbol);
        let long = ctx.position(&bar.symbol, Direction::Long);
        let short = ctx.position(&bar.symbol, Direction::Short);

        let results = if fast_prev <= slow_prev && fast > slow {
            let mut r = Vec::new();
            if short > 0.0 {
                r.push(ctx.cover(&bar.symbol, bar.close, short));
            }
            if long <= 0.0 {
                r.push(ctx.buy(&bar.symbol, bar.close, volume));
            }
            r
        } else if fast_prev >= slow_prev && fast < slow {
            let mut r = Vec::new();
            if long > 0.0 {
                r.push(ctx.sell(&bar.symbol, bar.close, long));
            }
            if short <= 0.0 {
                r.push(ctx.short(&bar.symbol, bar.close, volume));
            }
            r
        } else {
            Vec::new()
        };

        for result in results {
            if let Err(e) = result {
                ctx.write_log(format!("order rejected: {e}"));
            }
        }
    }
}
