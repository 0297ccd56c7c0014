//! Seeded random-walk store for demos and benchmarks.
//!
//! Every (symbol, day) series is derived from its own BLAKE3 sub-seed, so a
//! day's snapshots are identical regardless of which range asked for them or
//! in what order days were generated.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::calendar::MissingUnits;
use super::provider::{DataError, RemoteStore};
use crate::domain::{BacktestMode, Bar, Snapshot, Tick};

/// Shape of the generated series.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub seed: u64,
    pub base_price: f64,
    /// Per-step return scale.
    pub volatility: f64,
    pub session_open: NaiveTime,
    pub session_close: NaiveTime,
    pub tick_interval_secs: i64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            base_price: 4000.0,
            volatility: 0.0015,
            session_open: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            session_close: NaiveTime::from_hms_opt(15, 0, 0).unwrap_or(NaiveTime::MIN),
            tick_interval_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyntheticStore {
    config: SyntheticConfig,
}

impl SyntheticStore {
    pub fn new(config: SyntheticConfig) -> Self {
        Self { config }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::new(SyntheticConfig {
            seed,
            ..SyntheticConfig::default()
        })
    }

    fn sub_seed(&self, symbol: &str, mode: BacktestMode, date: NaiveDate) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.config.seed.to_le_bytes());
        hasher.update(symbol.as_bytes());
        hasher.update(mode.as_str().as_bytes());
        hasher.update(&date.num_days_from_ce().to_le_bytes());
        let hash = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }

    /// Opening level for a day: a slow deterministic swing around the base.
    fn day_open(&self, date: NaiveDate) -> f64 {
        let phase = date.num_days_from_ce() as f64 / 15.0;
        self.config.base_price * (1.0 + 0.1 * phase.sin())
    }

    fn session_steps(&self, date: NaiveDate, step: Duration) -> Vec<NaiveDateTime> {
        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            return Vec::new();
        }
        let mut stamps = Vec::new();
        let mut cursor = date.and_time(self.config.session_open);
        let close = date.and_time(self.config.session_close);
        while cursor < close {
            stamps.push(cursor);
            cursor += step;
        }
        stamps
    }

    /// Every snapshot the store holds for one symbol and day.
    pub fn day(&self, symbol: &str, mode: BacktestMode, date: NaiveDate) -> Vec<Snapshot> {
        let mut rng = StdRng::seed_from_u64(self.sub_seed(symbol, mode, date));
        let vol = self.config.volatility.max(1e-9);
        let mut price = self.day_open(date);
        match mode {
            BacktestMode::Bar => self
                .session_steps(date, Duration::minutes(1))
                .into_iter()
                .map(|datetime| {
                    let open = price;
                    let close = open * (1.0 + rng.gen_range(-vol..vol));
                    let high = open.max(close) * (1.0 + rng.gen_range(0.0..vol));
                    let low = open.min(close) * (1.0 - rng.gen_range(0.0..vol));
                    price = close;
                    Snapshot::Bar(Bar {
                        symbol: symbol.to_string(),
                        datetime,
                        open: round2(open),
                        high: round2(high),
                        low: round2(low),
                        close: round2(close),
                        volume: rng.gen_range(1.0..500.0_f64).round(),
                        open_interest: 0.0,
                    })
                })
                .collect(),
            BacktestMode::Tick => {
                let step = Duration::seconds(self.config.tick_interval_secs.max(1));
                let day_open = round2(price);
                let (mut high, mut low, mut volume) = (day_open, day_open, 0.0);
                self.session_steps(date, step)
                    .into_iter()
                    .map(|datetime| {
                        price *= 1.0 + rng.gen_range(-vol..vol);
                        let last = round2(price);
                        let half_spread = round2((last * 0.0001).max(0.01));
                        let last_volume = rng.gen_range(1.0..50.0_f64).round();
                        high = high.max(last);
                        low = low.min(last);
                        volume += last_volume;
                        let mut tick =
                            Tick::top_of_book(symbol, datetime, last, last - half_spread, last + half_spread);
                        tick.last_volume = last_volume;
                        tick.volume = volume;
                        tick.open_price = day_open;
                        tick.high_price = high;
                        tick.low_price = low;
                        tick.bid_volumes[0] = rng.gen_range(1.0..100.0_f64).round();
                        tick.ask_volumes[0] = rng.gen_range(1.0..100.0_f64).round();
                        Snapshot::Tick(tick)
                    })
                    .collect()
            }
        }
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

impl RemoteStore for SyntheticStore {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn query(
        &self,
        symbol: &str,
        mode: BacktestMode,
        missing: &MissingUnits,
    ) -> Result<Vec<Snapshot>, DataError> {
        Ok(missing
            .dates()
            .into_iter()
            .flat_map(|date| self.day(symbol, mode, date))
            .filter(|s| missing.contains(s.datetime()))
            .collect())
    }
}
