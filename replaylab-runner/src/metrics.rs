//! Run statistics: the daily balance series, whole-run daily statistics and
//! trade-by-trade statistics.
//!
//! Every function here is pure: daily totals or trading results in, numbers
//! out. Nothing depends on the engine or the data feed.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use replaylab_core::engine::{DailyTotals, TradingResult};

/// Trading days per year used for annualization unless configured otherwise.
pub const DEFAULT_ANNUAL_DAYS: u32 = 240;

// ─── Daily series ───────────────────────────────────────────────────

/// One date of the cross-symbol daily series, with the running balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyRow {
    pub date: NaiveDate,
    pub net_pnl: f64,
    pub slippage: f64,
    pub commission: f64,
    pub turnover: f64,
    pub trade_count: usize,
    pub trading_pnl: f64,
    pub position_pnl: f64,
    pub total_pnl: f64,
    pub balance: f64,
    /// `net_pnl / capital`.
    #[serde(rename = "return")]
    pub daily_return: f64,
    /// Running maximum of `balance`.
    pub highlevel: f64,
    /// `balance - highlevel`, never positive.
    pub drawdown: f64,
    pub dd_percent: f64,
}

/// Fold daily totals into the balance/drawdown series.
pub fn daily_series(totals: &[DailyTotals], capital: f64) -> Vec<DailyRow> {
    let mut balance = capital;
    let mut highlevel = f64::NEG_INFINITY;
    totals
        .iter()
        .map(|t| {
            balance += t.net_pnl;
            highlevel = highlevel.max(balance);
            let drawdown = balance - highlevel;
            DailyRow {
                date: t.date,
                net_pnl: t.net_pnl,
                slippage: t.slippage,
                commission: t.commission,
                turnover: t.turnover,
                trade_count: t.trade_count,
                trading_pnl: t.trading_pnl,
                position_pnl: t.position_pnl,
                total_pnl: t.total_pnl,
                balance,
                daily_return: t.net_pnl / capital,
                highlevel,
                drawdown,
                dd_percent: drawdown / highlevel * 100.0,
            }
        })
        .collect()
}

// ─── Whole-run daily statistics ─────────────────────────────────────

/// Summary of a daily series. Serialized names are the target-metric keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStatistics {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_days: usize,
    pub profit_days: usize,
    pub loss_days: usize,
    pub end_balance: f64,
    pub max_drawdown: f64,
    pub max_dd_percent: f64,
    pub total_net_pnl: f64,
    pub daily_net_pnl: f64,
    pub total_commission: f64,
    pub daily_commission: f64,
    pub total_slippage: f64,
    pub daily_slippage: f64,
    pub total_turnover: f64,
    pub daily_turnover: f64,
    pub total_trade_count: usize,
    pub daily_trade_count: f64,
    /// Percent.
    pub total_return: f64,
    /// Percent.
    pub annualized_return: f64,
    /// Mean daily return, percent.
    pub daily_return: f64,
    /// Sample standard deviation of daily returns, percent.
    pub return_std: f64,
    pub sharpe_ratio: f64,
}

impl DailyStatistics {
    /// `None` for an empty series.
    pub fn compute(rows: &[DailyRow], capital: f64, annual_days: u32) -> Option<Self> {
        let first = rows.first()?;
        let last = rows.last()?;
        let days = rows.len() as f64;
        let annual = f64::from(annual_days);

        let sum = |f: fn(&DailyRow) -> f64| rows.iter().map(f).sum::<f64>();
        let total_net_pnl = sum(|r| r.net_pnl);
        let total_commission = sum(|r| r.commission);
        let total_slippage = sum(|r| r.slippage);
        let total_turnover = sum(|r| r.turnover);
        let total_trade_count: usize = rows.iter().map(|r| r.trade_count).sum();

        let returns: Vec<f64> = rows.iter().map(|r| r.daily_return).collect();
        let daily_return = mean(&returns) * 100.0;
        let return_std = sample_std(&returns) * 100.0;
        let total_return = (last.balance / capital - 1.0) * 100.0;

        Some(Self {
            start_date: first.date,
            end_date: last.date,
            total_days: rows.len(),
            profit_days: rows.iter().filter(|r| r.net_pnl > 0.0).count(),
            loss_days: rows.iter().filter(|r| r.net_pnl < 0.0).count(),
            end_balance: last.balance,
            max_drawdown: rows.iter().map(|r| r.drawdown).fold(0.0, f64::min),
            max_dd_percent: rows.iter().map(|r| r.dd_percent).fold(0.0, f64::min),
            total_net_pnl,
            daily_net_pnl: total_net_pnl / days,
            total_commission,
            daily_commission: total_commission / days,
            total_slippage,
            daily_slippage: total_slippage / days,
            total_turnover,
            daily_turnover: total_turnover / days,
            total_trade_count,
            daily_trade_count: total_trade_count as f64 / days,
            total_return,
            annualized_return: total_return / days * annual,
            daily_return,
            return_std,
            sharpe_ratio: sharpe_ratio(daily_return, return_std, annual_days),
        })
    }

    /// Flat camelCase map: the namespace target metrics are looked up in.
    pub fn to_map(&self) -> BTreeMap<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        }
    }
}

/// `mean / std * sqrt(annual_days)`, or 0 when the deviation is 0.
pub fn sharpe_ratio(mean_return: f64, return_std: f64, annual_days: u32) -> f64 {
    if return_std.abs() < 1e-12 || !return_std.is_finite() {
        return 0.0;
    }
    mean_return / return_std * f64::from(annual_days).sqrt()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1). Zero for fewer than two values.
fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

// ─── Trade-by-trade statistics ──────────────────────────────────────

/// Statistics over round trips, in the order they were paired.
///
/// The capital here is cumulative pnl starting from zero, independent of the
/// account's starting capital.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeStatistics {
    pub first_trade: NaiveDateTime,
    pub last_trade: NaiveDateTime,
    pub total_results: usize,
    pub capital: f64,
    pub max_capital: f64,
    pub drawdown: f64,
    pub max_drawdown: f64,
    pub total_turnover: f64,
    pub total_commission: f64,
    pub total_slippage: f64,
    /// Percent of results with pnl ≥ 0.
    pub winning_rate: f64,
    pub average_winning: f64,
    pub average_losing: f64,
    pub profit_loss_ratio: f64,
    pub long_pnl: f64,
    pub short_pnl: f64,
    pub average_holding_minutes: f64,
    pub capital_curve: Vec<f64>,
    pub drawdown_curve: Vec<f64>,
    pub holding_minutes: Vec<i64>,
}

impl TradeStatistics {
    /// `None` when there are no results.
    pub fn compute(results: &[TradingResult]) -> Option<Self> {
        if results.is_empty() {
            return None;
        }

        let mut capital = 0.0_f64;
        let mut max_capital = 0.0_f64;
        let mut capital_curve = Vec::with_capacity(results.len());
        let mut drawdown_curve = Vec::with_capacity(results.len());
        let mut holding_minutes = Vec::with_capacity(results.len());
        let (mut wins, mut total_winning, mut losses, mut total_losing) = (0usize, 0.0, 0usize, 0.0);
        let (mut long_pnl, mut short_pnl) = (0.0, 0.0);

        for r in results {
            capital += r.pnl;
            max_capital = max_capital.max(capital);
            capital_curve.push(capital);
            drawdown_curve.push(capital - max_capital);
            holding_minutes.push(r.holding().num_minutes());

            if r.pnl >= 0.0 {
                wins += 1;
                total_winning += r.pnl;
            } else {
                losses += 1;
                total_losing += r.pnl;
            }
            if r.volume > 0.0 {
                long_pnl += r.pnl;
            } else if r.volume < 0.0 {
                short_pnl += r.pnl;
            }
        }

        let average_winning = if wins > 0 { total_winning / wins as f64 } else { 0.0 };
        let average_losing = if losses > 0 { total_losing / losses as f64 } else { 0.0 };
        let profit_loss_ratio = if average_losing != 0.0 {
            -average_winning / average_losing
        } else {
            0.0
        };
        let exits = results.iter().map(|r| r.exit_dt);

        Some(Self {
            first_trade: exits.clone().min()?,
            last_trade: exits.max()?,
            total_results: results.len(),
            capital,
            max_capital,
            drawdown: capital - max_capital,
            max_drawdown: drawdown_curve.iter().copied().fold(0.0, f64::min),
            total_turnover: results.iter().map(|r| r.turnover).sum(),
            total_commission: results.iter().map(|r| r.commission).sum(),
            total_slippage: results.iter().map(|r| r.slippage).sum(),
            winning_rate: wins as f64 / results.len() as f64 * 100.0,
            average_winning,
            average_losing,
            profit_loss_ratio,
            long_pnl,
            short_pnl,
            average_holding_minutes: holding_minutes.iter().sum::<i64>() as f64
                / results.len() as f64,
            capital_curve,
            drawdown_curve,
            holding_minutes,
        })
    }

    pub fn pnl_per_trade(&self) -> f64 {
        self.capital / self.total_results as f64
    }

    pub fn commission_per_trade(&self) -> f64 {
        self.total_commission / self.total_results as f64
    }

    pub fn slippage_per_trade(&self) -> f64 {
        self.total_slippage / self.total_results as f64
    }

    /// Labelled summary lines, as written to `backtesting_result.csv`.
    pub fn summary(&self) -> Vec<(&'static str, String)> {
        vec![
            ("First Trade", self.first_trade.to_string()),
            ("Last Trade", self.last_trade.to_string()),
            ("Total Trade", self.total_results.to_string()),
            ("Pnl", format_number(self.capital)),
            ("Max DrawDown", format_number(self.max_drawdown)),
            ("Pnl per Trade", format_number(self.pnl_per_trade())),
            ("Slippage per Trade", format_number(self.slippage_per_trade())),
            ("Commission per Trade", format_number(self.commission_per_trade())),
            ("Winning Rate", format_number(self.winning_rate)),
            ("Average Winning", format_number(self.average_winning)),
            ("Average Losing", format_number(self.average_losing)),
            ("PNL Ratio", format_number(self.profit_loss_ratio)),
            ("Longpos PNL", format_number(self.long_pnl)),
            ("Shortpos PNL", format_number(self.short_pnl)),
            ("Average Holding Minutes", format_number(self.average_holding_minutes)),
        ]
    }
}

/// Two decimals with thousands separators: `1234567.891` → `1,234,567.89`.
pub fn format_number(n: f64) -> String {
    if !n.is_finite() {
        return n.to_string();
    }
    let fixed = format!("{:.2}", n.abs());
    let (int_part, frac) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if n < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("{sign}{grouped}.{frac}")
}
