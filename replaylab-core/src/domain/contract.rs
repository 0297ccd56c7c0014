//! Per-instrument contract metadata: multiplier, tick size and cost model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Contract metadata for one instrument.
///
/// Every field has a neutral default so a symbol without configured metadata
/// still trades: size 1, no tick rounding, no commission, no slippage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractSpec {
    /// Contract multiplier.
    pub size: f64,
    /// Minimum price increment. Zero disables rounding.
    pub price_tick: f64,
    /// Commission rate applied to turnover.
    pub rate: f64,
    /// Slippage per unit of volume, in price units.
    pub slippage: f64,
}

impl Default for ContractSpec {
    fn default() -> Self {
        Self {
            size: 1.0,
            price_tick: 0.0,
            rate: 0.0,
            slippage: 0.0,
        }
    }
}

impl ContractSpec {
    /// `round(price / tick) * tick`, or the price unchanged when no tick is set.
    pub fn round_to_tick(&self, price: f64) -> f64 {
        if self.price_tick <= 0.0 {
            return price;
        }
        (price / self.price_tick).round() * self.price_tick
    }
}

/// Contract metadata keyed by symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractTable {
    specs: BTreeMap<String, ContractSpec>,
}

impl ContractTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: impl Into<String>, spec: ContractSpec) {
        self.specs.insert(symbol.into(), spec);
    }

    pub fn with(mut self, symbol: impl Into<String>, spec: ContractSpec) -> Self {
        self.insert(symbol, spec);
        self
    }

    /// Metadata for `symbol`, falling back to [`ContractSpec::default`].
    pub fn spec(&self, symbol: &str) -> ContractSpec {
        self.specs.get(symbol).copied().unwrap_or_default()
    }

    /// Configured symbols in sorted order.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
