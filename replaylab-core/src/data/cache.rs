//! Parquet cache of bar and tick snapshots.
//!
//! Layout: `{cache_dir}/{mode}/{SANITIZED_SYMBOL}/{YYYYMMDD}.parquet`
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place)
//! - Write-back merges with the existing day file, deduplicated by timestamp
//! - Integrity validation on load (schema check, row count > 0)
//! - Quarantine for corrupt files ({filename}.quarantined)
//! - Metadata sidecar per symbol (date range, last write rows and hash)

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::provider::{sanitize_symbol, CacheStore, DataError};
use crate::domain::{BacktestMode, Bar, Snapshot, Tick, LADDER_DEPTH};

const TICK_SCALAR_COLUMNS: [&str; 8] = [
    "datetime",
    "last_price",
    "last_volume",
    "volume",
    "open_interest",
    "open_price",
    "high_price",
    "low_price",
];

/// Metadata sidecar for a cached symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMeta {
    pub symbol: String,
    pub mode: BacktestMode,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub last_write_date: NaiveDate,
    pub last_write_rows: usize,
    pub data_hash: String,
    pub updated_at: NaiveDateTime,
}

/// Cache status for a single symbol directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatus {
    pub mode: BacktestMode,
    pub symbol: String,
    pub day_files: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
}

/// The Parquet cache.
pub struct ParquetCache {
    cache_dir: PathBuf,
}

impl ParquetCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Root directory of the cache.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn symbol_dir(&self, symbol: &str, mode: BacktestMode) -> PathBuf {
        self.cache_dir
            .join(mode.as_str())
            .join(sanitize_symbol(symbol))
    }

    /// Path to the Parquet file for one day: `{mode}/{SYMBOL}/{YYYYMMDD}.parquet`
    pub fn day_path(&self, symbol: &str, mode: BacktestMode, date: NaiveDate) -> PathBuf {
        self.symbol_dir(symbol, mode)
            .join(format!("{}.parquet", date.format("%Y%m%d")))
    }

    fn meta_path(&self, symbol: &str, mode: BacktestMode) -> PathBuf {
        self.symbol_dir(symbol, mode).join("meta.json")
    }

    pub fn get_meta(&self, symbol: &str, mode: BacktestMode) -> Option<CacheMeta> {
        let content = fs::read_to_string(self.meta_path(symbol, mode)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Every symbol directory under the cache root, for both modes.
    pub fn status(&self) -> Result<Vec<CacheStatus>, DataError> {
        let mut statuses = Vec::new();
        for mode in [BacktestMode::Bar, BacktestMode::Tick] {
            let mode_dir = self.cache_dir.join(mode.as_str());
            if !mode_dir.exists() {
                continue;
            }
            let entries = fs::read_dir(&mode_dir)
                .map_err(|e| DataError::CacheError(format!("read dir: {e}")))?;
            for entry in entries {
                let entry = entry.map_err(|e| DataError::CacheError(format!("dir entry: {e}")))?;
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                let dir_name = entry.file_name().to_string_lossy().into_owned();
                let day_files = count_day_files(&path)?;
                let meta: Option<CacheMeta> = fs::read_to_string(path.join("meta.json"))
                    .ok()
                    .and_then(|s| serde_json::from_str(&s).ok());
                statuses.push(CacheStatus {
                    mode,
                    symbol: meta.as_ref().map_or(dir_name, |m| m.symbol.clone()),
                    day_files,
                    first_date: meta.as_ref().map(|m| m.first_date),
                    last_date: meta.as_ref().map(|m| m.last_date),
                });
            }
        }
        statuses.sort_by(|a, b| (a.mode.as_str(), &a.symbol).cmp(&(b.mode.as_str(), &b.symbol)));
        Ok(statuses)
    }

    fn write_meta(
        &self,
        symbol: &str,
        mode: BacktestMode,
        date: NaiveDate,
        merged: &[Snapshot],
    ) -> Result<(), DataError> {
        let previous = self.get_meta(symbol, mode);
        let meta = CacheMeta {
            symbol: symbol.to_string(),
            mode,
            first_date: previous.as_ref().map_or(date, |m| m.first_date.min(date)),
            last_date: previous.as_ref().map_or(date, |m| m.last_date.max(date)),
            last_write_date: date,
            last_write_rows: merged.len(),
            data_hash: blake3::hash(
                &serde_json::to_vec(merged)
                    .map_err(|e| DataError::CacheError(format!("hash serialization: {e}")))?,
            )
            .to_hex()
            .to_string(),
            updated_at: chrono::Local::now().naive_local(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::CacheError(format!("meta serialization: {e}")))?;
        fs::write(self.meta_path(symbol, mode), meta_json)
            .map_err(|e| DataError::CacheError(format!("meta write: {e}")))
    }
}

impl CacheStore for ParquetCache {
    fn read(
        &self,
        symbol: &str,
        mode: BacktestMode,
        date: NaiveDate,
    ) -> Result<Option<Vec<Snapshot>>, DataError> {
        let path = self.day_path(symbol, mode, date);
        if !path.exists() {
            return Ok(None);
        }
        match load_and_validate_parquet(&path, symbol, mode) {
            Ok(snapshots) => Ok(Some(snapshots)),
            Err(e) => {
                let quarantine = path.with_extension("parquet.quarantined");
                warn!(path = %path.display(), error = %e, "quarantining corrupt cache file");
                if let Err(e) = fs::rename(&path, &quarantine) {
                    warn!(path = %path.display(), error = %e, "failed to quarantine corrupt cache file");
                }
                Ok(None)
            }
        }
    }

    /// Merges `batch` into the day file. Rows already cached win over
    /// incoming rows with the same timestamp.
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
        if let Some(bad) = batch.iter().find(|s| s.mode() != mode || s.date() != date) {
            return Err(DataError::ValidationError(format!(
                "{} snapshot at {} does not belong in the {mode} file for {date}",
                bad.mode(),
                bad.datetime()
            )));
        }

        let dir = self.symbol_dir(symbol, mode);
        fs::create_dir_all(&dir)
            .map_err(|e| DataError::CacheError(format!("failed to create dir: {e}")))?;

        let mut merged = self.read(symbol, mode, date)?.unwrap_or_default();
        let seen: BTreeSet<NaiveDateTime> = merged.iter().map(Snapshot::datetime).collect();
        let before = merged.len();
        merged.extend(
            batch
                .iter()
                .filter(|s| !seen.contains(&s.datetime()))
                .cloned(),
        );
        merged.sort_by_key(Snapshot::datetime);
        merged.dedup_by_key(|s| s.datetime());

        let df = match mode {
            BacktestMode::Bar => bars_to_dataframe(&merged)?,
            BacktestMode::Tick => ticks_to_dataframe(&merged)?,
        };
        let path = self.day_path(symbol, mode, date);
        let tmp_path = path.with_extension("parquet.tmp");
        write_parquet(&df, &tmp_path)?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::CacheError(format!("atomic rename failed: {e}"))
        })?;
        debug!(
            symbol,
            %date,
            added = merged.len() - before,
            total = merged.len(),
            "cache day file written"
        );

        self.write_meta(symbol, mode, date, &merged)
    }
}

fn count_day_files(dir: &Path) -> Result<usize, DataError> {
    let entries = fs::read_dir(dir).map_err(|e| DataError::CacheError(format!("read dir: {e}")))?;
    let mut count = 0;
    for entry in entries {
        let entry = entry.map_err(|e| DataError::CacheError(format!("dir entry: {e}")))?;
        if entry.path().extension().and_then(|e| e.to_str()) == Some("parquet") {
            count += 1;
        }
    }
    Ok(count)
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn to_millis(dt: NaiveDateTime) -> i64 {
    dt.and_utc().timestamp_millis()
}

fn from_millis(ms: i64) -> Result<NaiveDateTime, DataError> {
    DateTime::from_timestamp_millis(ms)
        .map(|d| d.naive_utc())
        .ok_or_else(|| DataError::ParquetError(format!("timestamp out of range: {ms}")))
}

fn bars_to_dataframe(snapshots: &[Snapshot]) -> Result<DataFrame, DataError> {
    let bars: Vec<&Bar> = snapshots
        .iter()
        .filter_map(|s| match s {
            Snapshot::Bar(bar) => Some(bar),
            Snapshot::Tick(_) => None,
        })
        .collect();
    let field = |f: fn(&Bar) -> f64| bars.iter().map(|b| f(b)).collect::<Vec<f64>>();

    DataFrame::new(vec![
        Column::new(
            "datetime".into(),
            bars.iter().map(|b| to_millis(b.datetime)).collect::<Vec<i64>>(),
        ),
        Column::new("open".into(), field(|b| b.open)),
        Column::new("high".into(), field(|b| b.high)),
        Column::new("low".into(), field(|b| b.low)),
        Column::new("close".into(), field(|b| b.close)),
        Column::new("volume".into(), field(|b| b.volume)),
        Column::new("open_interest".into(), field(|b| b.open_interest)),
    ])
    .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

fn ticks_to_dataframe(snapshots: &[Snapshot]) -> Result<DataFrame, DataError> {
    let ticks: Vec<&Tick> = snapshots
        .iter()
        .filter_map(|s| match s {
            Snapshot::Tick(tick) => Some(tick),
            Snapshot::Bar(_) => None,
        })
        .collect();
    let field = |f: &dyn Fn(&Tick) -> f64| ticks.iter().map(|t| f(t)).collect::<Vec<f64>>();

    let mut columns = vec![
        Column::new(
            "datetime".into(),
            ticks.iter().map(|t| to_millis(t.datetime)).collect::<Vec<i64>>(),
        ),
        Column::new("last_price".into(), field(&|t: &Tick| t.last_price)),
        Column::new("last_volume".into(), field(&|t: &Tick| t.last_volume)),
        Column::new("volume".into(), field(&|t: &Tick| t.volume)),
        Column::new("open_interest".into(), field(&|t: &Tick| t.open_interest)),
        Column::new("open_price".into(), field(&|t: &Tick| t.open_price)),
        Column::new("high_price".into(), field(&|t: &Tick| t.high_price)),
        Column::new("low_price".into(), field(&|t: &Tick| t.low_price)),
    ];
    for level in 0..LADDER_DEPTH {
        let n = level + 1;
        columns.push(Column::new(
            format!("bid_price_{n}").into(),
            field(&|t: &Tick| t.bid_prices[level]),
        ));
        columns.push(Column::new(
            format!("bid_volume_{n}").into(),
            field(&|t: &Tick| t.bid_volumes[level]),
        ));
        columns.push(Column::new(
            format!("ask_price_{n}").into(),
            field(&|t: &Tick| t.ask_prices[level]),
        ));
        columns.push(Column::new(
            format!("ask_volume_{n}").into(),
            field(&|t: &Tick| t.ask_volumes[level]),
        ));
    }

    DataFrame::new(columns).map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), DataError> {
    let file =
        fs::File::create(path).map_err(|e| DataError::ParquetError(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;
    Ok(())
}

/// Load a day file and validate its integrity.
fn load_and_validate_parquet(
    path: &Path,
    symbol: &str,
    mode: BacktestMode,
) -> Result<Vec<Snapshot>, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::ParquetError(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::ParquetError(format!("read: {e}")))?;

    if df.height() == 0 {
        return Err(DataError::ValidationError("empty parquet file".into()));
    }

    match mode {
        BacktestMode::Bar => dataframe_to_bars(&df, symbol),
        BacktestMode::Tick => dataframe_to_ticks(&df, symbol),
    }
}

fn f64_values(df: &DataFrame, name: &str) -> Result<Vec<f64>, DataError> {
    let column = df
        .column(name)
        .map_err(|_| DataError::ValidationError(format!("missing column '{name}'")))?;
    let ca = column
        .f64()
        .map_err(|e| DataError::ParquetError(format!("{name} column type: {e}")))?;
    Ok(ca.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

fn datetime_values(df: &DataFrame) -> Result<Vec<NaiveDateTime>, DataError> {
    let column = df
        .column("datetime")
        .map_err(|_| DataError::ValidationError("missing column 'datetime'".into()))?;
    let ca = column
        .i64()
        .map_err(|e| DataError::ParquetError(format!("datetime column type: {e}")))?;
    ca.into_iter()
        .enumerate()
        .map(|(i, v)| {
            v.ok_or_else(|| DataError::ParquetError(format!("null datetime at row {i}")))
                .and_then(from_millis)
        })
        .collect()
}

fn dataframe_to_bars(df: &DataFrame, symbol: &str) -> Result<Vec<Snapshot>, DataError> {
    let datetimes = datetime_values(df)?;
    let open = f64_values(df, "open")?;
    let high = f64_values(df, "high")?;
    let low = f64_values(df, "low")?;
    let close = f64_values(df, "close")?;
    let volume = f64_values(df, "volume")?;
    let open_interest = f64_values(df, "open_interest")?;

    Ok(datetimes
        .into_iter()
        .enumerate()
        .map(|(i, datetime)| {
            Snapshot::Bar(Bar {
                symbol: symbol.to_string(),
                datetime,
                open: open[i],
                high: high[i],
                low: low[i],
                close: close[i],
                volume: volume[i],
                open_interest: open_interest[i],
            })
        })
        .collect())
}

fn dataframe_to_ticks(df: &DataFrame, symbol: &str) -> Result<Vec<Snapshot>, DataError> {
    let datetimes = datetime_values(df)?;
    let scalars = TICK_SCALAR_COLUMNS[1..]
        .iter()
        .map(|name| f64_values(df, name))
        .collect::<Result<Vec<_>, _>>()?;
    let ladder = |side: &str| -> Result<Vec<Vec<f64>>, DataError> {
        (1..=LADDER_DEPTH)
            .map(|n| f64_values(df, &format!("{side}_{n}")))
            .collect()
    };
    let (bid_p, bid_v, ask_p, ask_v) = (
        ladder("bid_price")?,
        ladder("bid_volume")?,
        ladder("ask_price")?,
        ladder("ask_volume")?,
    );
    let level = |cols: &[Vec<f64>], i: usize| -> [f64; LADDER_DEPTH] {
        std::array::from_fn(|l| cols[l][i])
    };

    Ok(datetimes
        .into_iter()
        .enumerate()
        .map(|(i, datetime)| {
            Snapshot::Tick(Tick {
                symbol: symbol.to_string(),
                datetime,
                last_price: scalars[0][i],
                last_volume: scalars[1][i],
                volume: scalars[2][i],
                open_interest: scalars[3][i],
                open_price: scalars[4][i],
                high_price: scalars[5][i],
                low_price: scalars[6][i],
                bid_prices: level(&bid_p, i),
                bid_volumes: level(&bid_v, i),
                ask_prices: level(&ask_p, i),
                ask_volumes: level(&ask_v, i),
            })
        })
        .collect())
}
