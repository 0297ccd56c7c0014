//! Store traits and structured error types.
//!
//! Two collaborators sit behind the feed:
//! - a [`CacheStore`], keyed by (sanitized symbol, mode, calendar date)
//! - a [`RemoteStore`], asked only for the units the cache is missing
//!
//! Absence of data is never an error for either: the cache answers `None`,
//! the remote answers an empty batch.

use chrono::NaiveDate;
use thiserror::Error;

use super::calendar::MissingUnits;
use crate::domain::{BacktestMode, Snapshot};

/// Structured error types for data operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("cache error: {0}")]
    CacheError(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("remote store '{store}' failed: {message}")]
    Remote { store: String, message: String },

    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("invalid load range: start {start} is not before end {end}")]
    InvalidRange { start: String, end: String },

    #[error("data error: {0}")]
    Other(String),
}

/// Local snapshot cache, one batch per (symbol, mode, date).
pub trait CacheStore: Send + Sync {
    /// The cached batch for a day, or `None` if nothing is cached for it.
    fn read(
        &self,
        symbol: &str,
        mode: BacktestMode,
        date: NaiveDate,
    ) -> Result<Option<Vec<Snapshot>>, DataError>;

    /// Merge `batch` into the day's entry, deduplicating by timestamp.
    fn write(
        &self,
        symbol: &str,
        mode: BacktestMode,
        date: NaiveDate,
        batch: &[Snapshot],
    ) -> Result<(), DataError>;
}

/// Source of snapshots the cache does not hold.
pub trait RemoteStore: Send + Sync {
    fn name(&self) -> &str;

    /// Snapshots for `symbol` within `missing`. An unknown symbol or absent
    /// timestamps yield a partial or empty batch, not an error.
    fn query(
        &self,
        symbol: &str,
        mode: BacktestMode,
        missing: &MissingUnits,
    ) -> Result<Vec<Snapshot>, DataError>;
}

/// Filesystem-safe form of a symbol: anything outside `[A-Za-z0-9._-]`
/// becomes `_`, so `rb88:CTP` is stored as `rb88_CTP`.
pub fn sanitize_symbol(symbol: &str) -> String {
    symbol
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colon_symbols_are_sanitized() {
        assert_eq!(sanitize_symbol("rb88:CTP"), "rb88_CTP");
        assert_eq!(sanitize_symbol("BTC/USDT:BINANCE"), "BTC_USDT_BINANCE");
        assert_eq!(sanitize_symbol("IF2403.CFFEX"), "IF2403.CFFEX");
    }
}
