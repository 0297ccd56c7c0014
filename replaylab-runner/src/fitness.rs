//! Target metric lookup for optimizer ranking.
//!
//! A target is a key in the camelCase statistics map produced by
//! [`DailyStatistics::to_map`](crate::metrics::DailyStatistics::to_map).
//! Higher is always better, so drawdown targets rank the shallowest first.

use std::collections::BTreeMap;

use serde_json::Value;

/// Default value for a run with no statistics, or a target it does not carry.
pub const MISSING_TARGET: f64 = 0.0;

/// Statistics keys that hold a number and can be optimized for.
pub const TARGET_METRICS: &[&str] = &[
    "totalDays",
    "profitDays",
    "lossDays",
    "endBalance",
    "maxDrawdown",
    "maxDdPercent",
    "totalNetPnl",
    "dailyNetPnl",
    "totalCommission",
    "dailyCommission",
    "totalSlippage",
    "dailySlippage",
    "totalTurnover",
    "dailyTurnover",
    "totalTradeCount",
    "dailyTradeCount",
    "totalReturn",
    "annualizedReturn",
    "dailyReturn",
    "returnStd",
    "sharpeRatio",
];

pub fn is_known_target(name: &str) -> bool {
    TARGET_METRICS.contains(&name)
}

/// The target's value in `stats`, or [`MISSING_TARGET`] when absent or
/// not numeric.
pub fn target_value(stats: &BTreeMap<String, Value>, name: &str) -> f64 {
    stats
        .get(name)
        .and_then(Value::as_f64)
        .unwrap_or(MISSING_TARGET)
}
