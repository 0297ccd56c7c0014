//! Calendar arithmetic for coverage tracking and replay window planning.
//!
//! Coverage is tracked per minute in bar mode and per day in tick mode. The
//! units a cache is missing are expressed as [`MissingUnits`], which is what a
//! remote store is asked for.

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::domain::BacktestMode;

const MINUTES_PER_DAY: u64 = 1440;
const SECONDS_PER_DAY: u64 = 86_400;
const TICKS_PER_SECOND: u64 = 5;

/// Half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeSpan {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeSpan {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, dt: NaiveDateTime) -> bool {
        self.start <= dt && dt < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Calendar units absent from the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "unit", content = "values", rename_all = "lowercase")]
pub enum MissingUnits {
    /// Sorted, disjoint minute spans (bar mode).
    Minutes(Vec<TimeSpan>),
    /// Sorted calendar days (tick mode).
    Days(Vec<NaiveDate>),
}

impl MissingUnits {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Minutes(spans) => spans.is_empty(),
            Self::Days(days) => days.is_empty(),
        }
    }

    /// Whether a snapshot stamped `dt` falls inside a missing unit.
    pub fn contains(&self, dt: NaiveDateTime) -> bool {
        match self {
            Self::Minutes(spans) => {
                let idx = spans.partition_point(|s| s.end <= dt);
                spans.get(idx).is_some_and(|s| s.contains(dt))
            }
            Self::Days(days) => days.binary_search(&dt.date()).is_ok(),
        }
    }

    /// Calendar days the missing units touch, ascending.
    pub fn dates(&self) -> Vec<NaiveDate> {
        match self {
            Self::Minutes(spans) => {
                let mut dates = BTreeSet::new();
                for span in spans {
                    dates.extend(dates_touched(span.start, span.end));
                }
                dates.into_iter().collect()
            }
            Self::Days(days) => days.clone(),
        }
    }
}

/// Truncate to the start of the minute.
pub fn minute_floor(dt: NaiveDateTime) -> NaiveDateTime {
    dt.with_second(0)
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(dt)
}

/// Every calendar day that intersects `[start, end)`.
pub fn dates_touched(start: NaiveDateTime, end: NaiveDateTime) -> Vec<NaiveDate> {
    if start >= end {
        return Vec::new();
    }
    let last = (end - Duration::nanoseconds(1)).date();
    start.date().iter_days().take_while(|d| *d <= last).collect()
}

/// Minute spans inside `[start, end)` that no minute in `covered` occupies.
pub fn missing_minutes(
    start: NaiveDateTime,
    end: NaiveDateTime,
    covered: &BTreeSet<NaiveDateTime>,
) -> Vec<TimeSpan> {
    let mut spans = Vec::new();
    let mut cursor = minute_floor(start);
    for &minute in covered.range(cursor..end) {
        if minute > cursor {
            spans.push(TimeSpan::new(cursor, minute));
        }
        cursor = minute + Duration::minutes(1);
    }
    if cursor < end {
        spans.push(TimeSpan::new(cursor, end));
    }
    spans
}

/// Days in `[start, end)` with no entry in `covered`.
pub fn missing_days(
    start: NaiveDateTime,
    end: NaiveDateTime,
    covered: &BTreeSet<NaiveDate>,
) -> Vec<NaiveDate> {
    dates_touched(start, end)
        .into_iter()
        .filter(|d| !covered.contains(d))
        .collect()
}

/// Days per replay window so that one window holds roughly `row_budget` rows.
/// Assumes one bar per minute, or five ticks per second, per instrument.
pub fn window_days(mode: BacktestMode, n_instruments: usize, row_budget: u64) -> i64 {
    let n = n_instruments.max(1) as u64;
    let per_day = match mode {
        BacktestMode::Bar => n * MINUTES_PER_DAY,
        BacktestMode::Tick => n * SECONDS_PER_DAY * TICKS_PER_SECOND,
    };
    (row_budget / per_day).max(1) as i64
}

/// Split `[start, stop)` into consecutive windows of `days` days.
pub fn plan_windows(start: NaiveDateTime, stop: NaiveDateTime, days: i64) -> Vec<TimeSpan> {
    let step = Duration::days(days.max(1));
    let mut windows = Vec::new();
    let mut cursor = start;
    while cursor < stop {
        let next = (cursor + step).min(stop);
        windows.push(TimeSpan::new(cursor, next));
        cursor = next;
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn window_size_follows_row_budget() {
        assert_eq!(window_days(BacktestMode::Bar, 1, 1_000_000), 694);
        assert_eq!(window_days(BacktestMode::Bar, 2, 1_000_000), 347);
        assert_eq!(window_days(BacktestMode::Tick, 1, 1_000_000), 1);
        assert_eq!(window_days(BacktestMode::Bar, 0, 10), 1);
    }

    #[test]
    fn windows_cover_range_without_overlap() {
        let windows = plan_windows(dt(1, 0, 0), dt(10, 0, 1), 3);
        assert_eq!(windows.len(), 4);
        assert_eq!(windows[0], TimeSpan::new(dt(1, 0, 0), dt(4, 0, 0)));
        assert_eq!(windows[3].end, dt(10, 0, 1));
        for pair in windows.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn dates_touched_is_half_open() {
        assert_eq!(dates_touched(dt(1, 9, 0), dt(3, 0, 0)).len(), 2);
        assert_eq!(dates_touched(dt(1, 9, 0), dt(3, 0, 1)).len(), 3);
        assert!(dates_touched(dt(2, 0, 0), dt(2, 0, 0)).is_empty());
    }

    #[test]
    fn missing_minutes_fills_holes() {
        let covered: BTreeSet<_> = [dt(1, 9, 1), dt(1, 9, 2), dt(1, 9, 5)].into_iter().collect();
        let spans = missing_minutes(dt(1, 9, 0), dt(1, 9, 7), &covered);
        assert_eq!(
            spans,
            vec![
                TimeSpan::new(dt(1, 9, 0), dt(1, 9, 1)),
                TimeSpan::new(dt(1, 9, 3), dt(1, 9, 5)),
                TimeSpan::new(dt(1, 9, 6), dt(1, 9, 7)),
            ]
        );
        let missing = MissingUnits::Minutes(spans);
        assert!(missing.contains(dt(1, 9, 4)));
        assert!(!missing.contains(dt(1, 9, 5)));
    }

    #[test]
    fn fully_covered_range_has_nothing_missing() {
        let covered: BTreeSet<_> = (0..3).map(|m| dt(1, 9, m)).collect();
        assert!(missing_minutes(dt(1, 9, 0), dt(1, 9, 3), &covered).is_empty());

        let days: BTreeSet<_> = [dt(1, 0, 0).date()].into_iter().collect();
        assert_eq!(missing_days(dt(1, 9, 0), dt(2, 9, 0), &days), vec![dt(2, 0, 0).date()]);
    }
}
