//! In-process store usable as either a cache or a remote.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::NaiveDate;

use super::calendar::MissingUnits;
use super::provider::{CacheStore, DataError, RemoteStore};
use crate::domain::{BacktestMode, Snapshot};

type DayKey = (String, BacktestMode, NaiveDate);

/// Snapshots held in memory, grouped by (symbol, mode, day).
#[derive(Debug, Default)]
pub struct MemoryStore {
    days: Mutex<BTreeMap<DayKey, Vec<Snapshot>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `snapshots`, each filed under its own symbol and day.
    pub fn from_snapshots(snapshots: impl IntoIterator<Item = Snapshot>) -> Self {
        let store = Self::new();
        {
            let mut days = store.lock_days();
            for snapshot in snapshots {
                let key = (snapshot.symbol().to_string(), snapshot.mode(), snapshot.date());
                days.entry(key).or_default().push(snapshot);
            }
            for batch in days.values_mut() {
                batch.sort_by_key(Snapshot::datetime);
            }
        }
        store
    }

    pub fn len(&self) -> usize {
        self.lock_days().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_days(&self) -> std::sync::MutexGuard<'_, BTreeMap<DayKey, Vec<Snapshot>>> {
        // Poisoning leaves the map structurally valid.
        self.days.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CacheStore for MemoryStore {
    fn read(
        &self,
        symbol: &str,
        mode: BacktestMode,
        date: NaiveDate,
    ) -> Result<Option<Vec<Snapshot>>, DataError> {
        Ok(self
            .lock_days()
            .get(&(symbol.to_string(), mode, date))
            .cloned())
    }

    fn write(
        &self,
        symbol: &str,
        mode: BacktestMode,
        date: NaiveDate,
        batch: &[Snapshot],
    ) -> Result<(), DataError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut days = self.lock_days();
        let day = days.entry((symbol.to_string(), mode, date)).or_default();
        for snapshot in batch {
            if !day.iter().any(|s| s.datetime() == snapshot.datetime()) {
                day.push(snapshot.clone());
            }
        }
        day.sort_by_key(Snapshot::datetime);
        Ok(())
    }
}

impl RemoteStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn query(
        &self,
        symbol: &str,
        mode: BacktestMode,
        missing: &MissingUnits,
    ) -> Result<Vec<Snapshot>, DataError> {
        let days = self.lock_days();
        let mut found = Vec::new();
        for date in missing.dates() {
            if let Some(batch) = days.get(&(symbol.to_string(), mode, date)) {
                found.extend(batch.iter().filter(|s| missing.contains(s.datetime())).cloned());
            }
        }
        Ok(found)
    }
}
