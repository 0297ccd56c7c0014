//! Position and account ledger.
//!
//! Long and short are tracked independently per symbol, with no netting across
//! directions. Each side carries its open volume and its closable ("evening")
//! volume; the account is a single cash balance.
//!
//! Strategies and reports only read. All writes come from the order book's
//! placement, crossing and cancellation paths inside this crate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{round_volume, Direction};

/// How the simulator treats requests a live venue would likely reject:
/// closing more than the closable volume, or opening with insufficient balance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerPolicy {
    /// Log a warning and let the order through. Lets strategies be
    /// stress-tested against states a venue would refuse.
    #[default]
    Permissive,
    /// Reject the order at placement.
    Strict,
}

/// One side of one symbol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionEntry {
    pub volume: f64,
    pub closable: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
struct SymbolBook {
    long: PositionEntry,
    short: PositionEntry,
}

impl SymbolBook {
    fn side(&self, direction: Direction) -> &PositionEntry {
        match direction {
            Direction::Long => &self.long,
            Direction::Short => &self.short,
        }
    }

    fn side_mut(&mut self, direction: Direction) -> &mut PositionEntry {
        match direction {
            Direction::Long => &mut self.long,
            Direction::Short => &mut self.short,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    positions: BTreeMap<String, SymbolBook>,
    balance: f64,
}

impl Ledger {
    pub fn new(capital: f64) -> Self {
        Self {
            positions: BTreeMap::new(),
            balance: capital,
        }
    }

    // ── Read accessors ──────────────────────────────────────────────

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn entry(&self, symbol: &str, direction: Direction) -> PositionEntry {
        self.positions
            .get(symbol)
            .map(|b| *b.side(direction))
            .unwrap_or_default()
    }

    pub fn position(&self, symbol: &str, direction: Direction) -> f64 {
        self.entry(symbol, direction).volume
    }

    pub fn closable(&self, symbol: &str, direction: Direction) -> f64 {
        self.entry(symbol, direction).closable
    }

    /// Long volume minus short volume.
    pub fn net_position(&self, symbol: &str) -> f64 {
        self.position(symbol, Direction::Long) - self.position(symbol, Direction::Short)
    }

    /// Symbols that have ever been touched, sorted.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.positions.keys().map(String::as_str)
    }

    // ── Mutation (crate-internal) ───────────────────────────────────

    fn side_mut(&mut self, symbol: &str, direction: Direction) -> &mut PositionEntry {
        self.positions
            .entry(symbol.to_string())
            .or_default()
            .side_mut(direction)
    }

    /// Opening fill: position and closable volume both grow.
    pub(crate) fn open(&mut self, symbol: &str, direction: Direction, volume: f64) {
        let side = self.side_mut(symbol, direction);
        side.volume = round_volume(side.volume + volume);
        side.closable = round_volume(side.closable + volume);
    }

    /// Fill that reduces `direction`'s position. Closable volume was already
    /// taken at placement; it is only clamped so it never exceeds the position.
    pub(crate) fn reduce(&mut self, symbol: &str, direction: Direction, volume: f64) {
        let side = self.side_mut(symbol, direction);
        side.volume = round_volume(side.volume - volume);
        if side.closable > side.volume {
            side.closable = side.volume;
        }
    }

    /// Spot buy: position grows, closable untouched.
    pub(crate) fn add_spot(&mut self, symbol: &str, volume: f64) {
        let side = self.side_mut(symbol, Direction::Long);
        side.volume = round_volume(side.volume + volume);
    }

    /// Take closable volume for a close order. Returns what was closable before.
    pub(crate) fn take_closable(&mut self, symbol: &str, direction: Direction, volume: f64) -> f64 {
        let side = self.side_mut(symbol, direction);
        let before = side.closable;
        side.closable = round_volume(side.closable - volume);
        before
    }

    /// Give closable volume back when a close order is cancelled.
    pub(crate) fn restore_closable(&mut self, symbol: &str, direction: Direction, volume: f64) {
        let side = self.side_mut(symbol, direction);
        side.closable = round_volume(side.closable + volume).min(side.volume);
    }

    pub(crate) fn adjust_balance(&mut self, delta: f64) {
        self.balance += delta;
    }
}
