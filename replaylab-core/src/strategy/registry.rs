//! Build strategies by name from a flat parameter map.

use std::collections::BTreeMap;
use thiserror::Error;

use super::{ChannelBreakout, DualMa, Strategy};

/// Strategy parameters as they come from configuration files and sweeps.
pub type ParamSet = BTreeMap<String, serde_json::Value>;

/// Names accepted by [`build_strategy`].
pub const STRATEGY_NAMES: &[&str] = &[DualMa::NAME, ChannelBreakout::NAME];

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("unknown strategy '{0}' (known: {known})", known = STRATEGY_NAMES.join(", "))]
    UnknownStrategy(String),

    #[error("parameter '{name}' must be {expected}, got {value}")]
    InvalidParam {
        name: String,
        expected: &'static str,
        value: serde_json::Value,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("strategy needs at least one symbol")]
    NoSymbols,
}

/// Construct a strategy trading `symbols`, reading its knobs from `params`.
/// Missing parameters take the strategy's defaults; unknown ones are ignored.
pub fn build_strategy(
    name: &str,
    symbols: &[String],
    params: &ParamSet,
) -> Result<Box<dyn Strategy>, StrategyError> {
    if symbols.is_empty() {
        return Err(StrategyError::NoSymbols);
    }
    match name {
        DualMa::NAME => Ok(Box::new(DualMa::from_params(symbols, params)?)),
        ChannelBreakout::NAME => Ok(Box::new(ChannelBreakout::from_params(symbols, params)?)),
        other => Err(StrategyError::UnknownStrategy(other.to_string())),
    }
}

pub(crate) fn param_f64(params: &ParamSet, name: &str, default: f64) -> Result<f64, StrategyError> {
    match params.get(name) {
        None => Ok(default),
        Some(value) => value.as_f64().ok_or_else(|| StrategyError::InvalidParam {
            name: name.to_string(),
            expected: "a number",
            value: value.clone(),
        }),
    }
}

/// Accepts integral floats too, since sweep ranges are generated as floats.
pub(crate) fn param_usize(
    params: &ParamSet,
    name: &str,
    default: usize,
) -> Result<usize, StrategyError> {
    let Some(value) = params.get(name) else {
        return Ok(default);
    };
    let invalid = || StrategyError::InvalidParam {
        name: name.to_string(),
        expected: "a positive integer",
        value: value.clone(),
    };
    if let Some(n) = value.as_u64() {
        return usize::try_from(n).map_err(|_| invalid());
    }
    match value.as_f64() {
        Some(f) if f >= 0.0 && f.fract() == 0.0 => Ok(f as usize),
        _ => Err(invalid()),
    }
}
