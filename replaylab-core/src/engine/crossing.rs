//! Price-crossing rules.
//!
//! Pure functions deciding whether a resting order trades against a snapshot
//! and at what price. Limit orders are price-improved toward the best
//! available price; stop orders take the worse of the trigger and the best
//! price.
//!
//! | mode | limit buy / sell crosses at | limit best     | stop buy / sell triggers at | stop best |
//! |------|-----------------------------|----------------|-----------------------------|-----------|
//! | bar  | low / high                  | open           | high / low                  | open      |
//! | tick | ask1 / bid1                 | ask1 / bid1    | last / last                 | last      |
//!
//! A cross price of zero or below means nothing printable on that side (a
//! limit-locked market) and never crosses.

use crate::domain::{Direction, Snapshot};

/// Cross prices for limit orders on one snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitCross {
    pub buy_cross: f64,
    pub sell_cross: f64,
    pub buy_best: f64,
    pub sell_best: f64,
}

impl LimitCross {
    pub fn of(snapshot: &Snapshot) -> Self {
        match snapshot {
            Snapshot::Bar(b) => Self {
                buy_cross: b.low,
                sell_cross: b.high,
                buy_best: b.open,
                sell_best: b.open,
            },
            Snapshot::Tick(t) => Self {
                buy_cross: t.ask_price_1(),
                sell_cross: t.bid_price_1(),
                buy_best: t.ask_price_1(),
                sell_best: t.bid_price_1(),
            },
        }
    }

    /// Fill price for a limit order at `price`, or `None` if it does not cross.
    pub fn fill_price(&self, direction: Direction, price: f64) -> Option<f64> {
        match direction {
            Direction::Long if price >= self.buy_cross && self.buy_cross > 0.0 => {
                Some(price.min(self.buy_best))
            }
            Direction::Short if price <= self.sell_cross && self.sell_cross > 0.0 => {
                Some(price.max(self.sell_best))
            }
            _ => None,
        }
    }
}

/// Trigger prices for stop orders on one snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopCross {
    pub buy_cross: f64,
    pub sell_cross: f64,
    pub best: f64,
}

impl StopCross {
    pub fn of(snapshot: &Snapshot) -> Self {
        match snapshot {
            Snapshot::Bar(b) => Self {
                buy_cross: b.high,
                sell_cross: b.low,
                best: b.open,
            },
            // Ticks have no open, so trigger and best price collapse to the last trade.
            Snapshot::Tick(t) => Self {
                buy_cross: t.last_price,
                sell_cross: t.last_price,
                best: t.last_price,
            },
        }
    }

    /// Fill price for a stop at `trigger`, or `None` if it does not trigger.
    pub fn fill_price(&self, direction: Direction, trigger: f64) -> Option<f64> {
        match direction {
            Direction::Long if trigger <= self.buy_cross && self.buy_cross > 0.0 => {
                Some(self.best.max(trigger))
            }
            Direction::Short if trigger >= self.sell_cross && self.sell_cross > 0.0 => {
                Some(self.best.min(trigger))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Bar, Tick};
    use chrono::NaiveDate;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Snapshot {
        Snapshot::Bar(Bar {
            symbol: "rb88".into(),
            datetime: NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap(),
            open,
            high,
            low,
            close,
            volume: 1.0,
            open_interest: 0.0,
        })
    }

    fn tick(last: f64, bid: f64, ask: f64) -> Snapshot {
        Snapshot::Tick(Tick::top_of_book(
            "rb88",
            NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap(),
            last,
            bid,
            ask,
        ))
    }

    #[test]
    fn limit_buy_is_price_improved_to_open() {
        let cross = LimitCross::of(&bar(100.0, 110.0, 95.0, 105.0));
        assert_eq!(cross.fill_price(Direction::Long, 105.0), Some(100.0));
        assert_eq!(cross.fill_price(Direction::Long, 97.0), Some(97.0));
        assert_eq!(cross.fill_price(Direction::Long, 94.0), None);
    }

    #[test]
    fn limit_sell_is_price_improved_to_open() {
        let cross = LimitCross::of(&bar(100.0, 110.0, 95.0, 105.0));
        assert_eq!(cross.fill_price(Direction::Short, 96.0), Some(100.0));
        assert_eq!(cross.fill_price(Direction::Short, 108.0), Some(108.0));
        assert_eq!(cross.fill_price(Direction::Short, 111.0), None);
    }

    #[test]
    fn locked_market_never_crosses() {
        let cross = LimitCross::of(&tick(10.0, 0.0, 0.0));
        assert_eq!(cross.fill_price(Direction::Long, 1_000.0), None);
        assert_eq!(cross.fill_price(Direction::Short, 0.0), None);

        let stop = StopCross::of(&bar(0.0, 0.0, 0.0, 0.0));
        assert_eq!(stop.fill_price(Direction::Long, 0.0), None);
    }

    #[test]
    fn tick_limit_crosses_top_of_book() {
        let cross = LimitCross::of(&tick(10.0, 9.9, 10.1));
        assert_eq!(cross.fill_price(Direction::Long, 10.2), Some(10.1));
        assert_eq!(cross.fill_price(Direction::Long, 10.0), None);
        assert_eq!(cross.fill_price(Direction::Short, 9.8), Some(9.9));
    }

    #[test]
    fn buy_stop_fills_at_worse_of_open_and_trigger() {
        let stop = StopCross::of(&bar(50.0, 55.0, 48.0, 53.0));
        assert_eq!(stop.fill_price(Direction::Long, 52.0), Some(52.0));
        // Gapped through the trigger: fill at the open.
        let gap = StopCross::of(&bar(54.0, 55.0, 53.0, 54.0));
        assert_eq!(gap.fill_price(Direction::Long, 52.0), Some(54.0));
        assert_eq!(stop.fill_price(Direction::Long, 56.0), None);
    }

    #[test]
    fn sell_stop_fills_at_worse_of_open_and_trigger() {
        let stop = StopCross::of(&bar(50.0, 55.0, 48.0, 53.0));
        assert_eq!(stop.fill_price(Direction::Short, 49.0), Some(49.0));
        assert_eq!(stop.fill_price(Direction::Short, 51.0), Some(50.0));
        assert_eq!(stop.fill_price(Direction::Short, 47.0), None);
    }

    #[test]
    fn tick_stop_uses_last_price() {
        let stop = StopCross::of(&tick(10.0, 9.9, 10.1));
        assert_eq!(stop.fill_price(Direction::Long, 9.5), Some(10.0));
        assert_eq!(stop.fill_price(Direction::Short, 10.5), Some(10.0));
        assert_eq!(stop.fill_price(Direction::Long, 10.5), None);
    }
}
