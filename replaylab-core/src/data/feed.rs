//! Time-ordered snapshot loading over a cache and an optional remote store.
//!
//! A load reads every cached day the range touches, works out which units
//! (minutes in bar mode, days in tick mode) the cache is missing, asks the
//! remote store for exactly those, and writes what comes back into the cache
//! before returning. Units neither side can provide are reported as gaps and
//! never abort the load.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::calendar::{self, MissingUnits};
use super::provider::{CacheStore, DataError, RemoteStore};
use crate::domain::{BacktestMode, Snapshot};

/// What to load: symbols, snapshot kind and the half-open range `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadRequest {
    pub symbols: Vec<String>,
    pub mode: BacktestMode,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl LoadRequest {
    pub fn new(
        symbols: &[String],
        mode: BacktestMode,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Self {
        Self {
            symbols: symbols.to_vec(),
            mode,
            start,
            end,
        }
    }
}

/// Anything the engine can replay from.
pub trait SnapshotSource: Send + Sync {
    /// Snapshots in `[start, end)` for the requested symbols, ordered by
    /// timestamp with ties in request-symbol order. An empty range yields an
    /// empty sequence.
    fn load(&self, request: &LoadRequest) -> Result<Vec<Snapshot>, DataError>;
}

/// Where one load's rows came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub from_cache: usize,
    pub from_remote: usize,
    /// Days in range that produced no snapshot at all, per symbol.
    pub empty_days: BTreeMap<String, Vec<NaiveDate>>,
    /// Remote failures, per symbol. The load continued with cached data.
    pub remote_errors: BTreeMap<String, String>,
}

impl LoadReport {
    pub fn total(&self) -> usize {
        self.from_cache + self.from_remote
    }

    pub fn has_gaps(&self) -> bool {
        self.empty_days.values().any(|d| !d.is_empty()) || !self.remote_errors.is_empty()
    }
}

/// Cache-first feed with remote back-fill.
pub struct DataFeed {
    cache: Box<dyn CacheStore>,
    remote: Option<Box<dyn RemoteStore>>,
}

impl DataFeed {
    pub fn new(cache: impl CacheStore + 'static) -> Self {
        Self {
            cache: Box::new(cache),
            remote: None,
        }
    }

    pub fn with_remote(mut self, remote: impl RemoteStore + 'static) -> Self {
        self.remote = Some(Box::new(remote));
        self
    }

    pub fn with_boxed_remote(mut self, remote: Option<Box<dyn RemoteStore>>) -> Self {
        self.remote = remote;
        self
    }

    /// Load with a report of where rows came from and what is missing.
    pub fn load_with_report(
        &self,
        request: &LoadRequest,
    ) -> Result<(Vec<Snapshot>, LoadReport), DataError> {
        let mut report = LoadReport::default();
        if request.start >= request.end {
            return Ok((Vec::new(), report));
        }

        let mut snapshots = Vec::new();
        for symbol in &request.symbols {
            snapshots.extend(self.load_symbol(symbol, request, &mut report)?);
        }
        // Stable: ties keep request-symbol order.
        snapshots.sort_by_key(Snapshot::datetime);

        if report.has_gaps() {
            let days: usize = report.empty_days.values().map(Vec::len).sum();
            warn!(
                start = %request.start,
                end = %request.end,
                empty_days = days,
                remote_errors = report.remote_errors.len(),
                "load completed with gaps"
            );
        }
        info!(
            symbols = request.symbols.len(),
            mode = %request.mode,
            from_cache = report.from_cache,
            from_remote = report.from_remote,
            "snapshots loaded"
        );
        Ok((snapshots, report))
    }

    fn load_symbol(
        &self,
        symbol: &str,
        request: &LoadRequest,
        report: &mut LoadReport,
    ) -> Result<Vec<Snapshot>, DataError> {
        let (start, end, mode) = (request.start, request.end, request.mode);
        let in_range = |s: &Snapshot| start <= s.datetime() && s.datetime() < end;
        let days = calendar::dates_touched(start, end);

        let mut cached = Vec::new();
        for date in &days {
            if let Some(batch) = self.cache.read(symbol, mode, *date)? {
                cached.extend(batch.into_iter().filter(|s| in_range(s)));
            }
        }
        report.from_cache += cached.len();

        let missing = match mode {
            BacktestMode::Bar => {
                let covered: BTreeSet<NaiveDateTime> = cached
                    .iter()
                    .map(|s| calendar::minute_floor(s.datetime()))
                    .collect();
                MissingUnits::Minutes(calendar::missing_minutes(start, end, &covered))
            }
            BacktestMode::Tick => {
                let covered: BTreeSet<NaiveDate> = cached.iter().map(Snapshot::date).collect();
                MissingUnits::Days(calendar::missing_days(start, end, &covered))
            }
        };

        let fetched = match (&self.remote, missing.is_empty()) {
            (Some(remote), false) => match remote.query(symbol, mode, &missing) {
                Ok(batch) => {
                    let fresh: Vec<Snapshot> = batch
                        .into_iter()
                        .filter(|s| in_range(s) && missing.contains(s.datetime()))
                        .collect();
                    self.write_back(symbol, mode, &fresh)?;
                    fresh
                }
                Err(e) => {
                    warn!(symbol, store = remote.name(), error = %e, "remote query failed");
                    report.remote_errors.insert(symbol.to_string(), e.to_string());
                    Vec::new()
                }
            },
            _ => Vec::new(),
        };
        report.from_remote += fetched.len();

        let mut merged = cached;
        merged.extend(fetched);
        merged.sort_by_key(Snapshot::datetime);
        merged.dedup_by_key(|s| s.datetime());

        let seen: BTreeSet<NaiveDate> = merged.iter().map(Snapshot::date).collect();
        let empty: Vec<NaiveDate> = days.into_iter().filter(|d| !seen.contains(d)).collect();
        if !empty.is_empty() {
            debug!(symbol, days = empty.len(), "no data for some days in range");
            report.empty_days.insert(symbol.to_string(), empty);
        }
        Ok(merged)
    }

    fn write_back(
        &self,
        symbol: &str,
        mode: BacktestMode,
        fresh: &[Snapshot],
    ) -> Result<(), DataError> {
        let mut by_day: BTreeMap<NaiveDate, Vec<Snapshot>> = BTreeMap::new();
        for snapshot in fresh {
            by_day.entry(snapshot.date()).or_default().push(snapshot.clone());
        }
        for (date, batch) in by_day {
            self.cache.write(symbol, mode, date, &batch)?;
        }
        Ok(())
    }
}

impl SnapshotSource for DataFeed {
    fn load(&self, request: &LoadRequest) -> Result<Vec<Snapshot>, DataError> {
        self.load_with_report(request).map(|(snapshots, _)| snapshots)
    }
}

/// Snapshots loaded once and shared read-only, e.g. across optimizer runs.
#[derive(Debug, Clone, Default)]
pub struct PreparedData {
    snapshots: Arc<Vec<Snapshot>>,
}

impl PreparedData {
    /// Build from arbitrary snapshots; they are sorted by timestamp, stably.
    pub fn new(mut snapshots: Vec<Snapshot>) -> Self {
        snapshots.sort_by_key(Snapshot::datetime);
        Self {
            snapshots: Arc::new(snapshots),
        }
    }

    /// Pull a whole range out of `source` once.
    pub fn preload(source: &dyn SnapshotSource, request: &LoadRequest) -> Result<Self, DataError> {
        Ok(Self::new(source.load(request)?))
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }
}

impl SnapshotSource for PreparedData {
    fn load(&self, request: &LoadRequest) -> Result<Vec<Snapshot>, DataError> {
        if request.start >= request.end {
            return Ok(Vec::new());
        }
        let all = self.snapshots.as_slice();
        let lo = all.partition_point(|s| s.datetime() < request.start);
        let hi = all.partition_point(|s| s.datetime() < request.end);
        Ok(all[lo..hi]
            .iter()
            .filter(|s| s.mode() == request.mode && request.symbols.iter().any(|r| r == s.symbol()))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::memory::MemoryStore;
    use crate::domain::Bar;

    fn dt(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn bar(symbol: &str, at: NaiveDateTime, close: f64) -> Snapshot {
        Snapshot::Bar(Bar {
            symbol: symbol.into(),
            datetime: at,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            open_interest: 0.0,
        })
    }

    fn request(symbols: &[&str], start: NaiveDateTime, end: NaiveDateTime) -> LoadRequest {
        let symbols: Vec<String> = symbols.iter().map(|s| s.to_string()).collect();
        LoadRequest::new(&symbols, BacktestMode::Bar, start, end)
    }

    #[test]
    fn missing_minutes_are_fetched_and_written_back() {
        let remote = MemoryStore::from_snapshots([
            bar("rb88", dt(2, 9, 0), 1.0),
            bar("rb88", dt(2, 9, 1), 2.0),
            bar("rb88", dt(2, 9, 2), 3.0),
        ]);
        let feed = DataFeed::new(MemoryStore::new()).with_remote(remote);
        let req = request(&["rb88"], dt(2, 9, 0), dt(2, 9, 2));

        let (first, report) = feed.load_with_report(&req).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(report.from_remote, 2);

        let (second, report) = feed.load_with_report(&req).unwrap();
        assert_eq!(second, first);
        assert_eq!(report.from_cache, 2);
        assert_eq!(report.from_remote, 0);
    }

    #[test]
    fn end_is_exclusive_and_empty_range_is_empty() {
        let cache = MemoryStore::from_snapshots([bar("rb88", dt(2, 9, 0), 1.0), bar("rb88", dt(2, 9, 1), 2.0)]);
        let feed = DataFeed::new(cache);
        assert_eq!(feed.load(&request(&["rb88"], dt(2, 9, 0), dt(2, 9, 1))).unwrap().len(), 1);
        assert!(feed.load(&request(&["rb88"], dt(2, 9, 1), dt(2, 9, 1))).unwrap().is_empty());
    }

    #[test]
    fn ties_keep_symbol_order() {
        let cache = MemoryStore::from_snapshots([
            bar("b", dt(2, 9, 0), 2.0),
            bar("a", dt(2, 9, 0), 1.0),
            bar("a", dt(2, 9, 1), 1.5),
        ]);
        let feed = DataFeed::new(cache);
        let loaded = feed.load(&request(&["b", "a"], dt(2, 9, 0), dt(2, 10, 0))).unwrap();
        let order: Vec<&str> = loaded.iter().map(Snapshot::symbol).collect();
        assert_eq!(order, vec!["b", "a", "a"]);
    }

    #[test]
    fn days_without_data_are_reported_not_fatal() {
        let feed = DataFeed::new(MemoryStore::from_snapshots([bar("rb88", dt(2, 9, 0), 1.0)]))
            .with_remote(MemoryStore::new());
        let (loaded, report) = feed
            .load_with_report(&request(&["rb88"], dt(2, 0, 0), dt(4, 0, 0)))
            .unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(report.empty_days["rb88"], vec![dt(3, 0, 0).date()]);
        assert!(report.has_gaps());
    }

    #[test]
    fn prepared_data_slices_by_range_and_symbol() {
        let prepared = PreparedData::new(vec![
            bar("a", dt(2, 9, 2), 3.0),
            bar("a", dt(2, 9, 0), 1.0),
            bar("b", dt(2, 9, 1), 2.0),
        ]);
        let loaded = prepared.load(&request(&["a"], dt(2, 9, 0), dt(2, 9, 2))).unwrap();
        assert_eq!(loaded, vec![bar("a", dt(2, 9, 0), 1.0)]);
        assert_eq!(prepared.len(), 3);
    }
}
