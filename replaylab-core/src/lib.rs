//! ReplayLab Core: market data feed, order and stop-order book, ledger,
//! replay loop, and post-run pnl reconstruction.
//!
//! This crate contains the deterministic simulator:
//! - Domain types (bars, ticks, orders, stop orders, trades, contracts)
//! - Market data feed over a Parquet cache and a remote store
//! - Bar and tick crossing rules for limit and stop orders
//! - Position and account ledger with closable volume tracking
//! - Snapshot replay loop with FIFO event delivery to the strategy
//! - FIFO trade pairing and per-day mark-to-market results
//! - Strategy trait and the built-in reference strategies

pub mod data;
pub mod domain;
pub mod engine;
pub mod strategy;
