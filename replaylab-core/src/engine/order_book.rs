//! Order book: resting limit orders, local stop orders, the trade ledger.
//!
//! The book is the only writer of the [`Ledger`]:
//! - placement takes closable volume (close orders) or reserves capital
//!   (opening and spot-buy orders)
//! - crossing fills orders against a snapshot and settles the ledger
//! - cancellation gives back whatever the order held
//!
//! Every state change that a strategy should hear about is appended to an
//! event buffer supplied by the caller. Crossing passes iterate working orders
//! in id order, which is placement order, so a run is reproducible bit-for-bit.

use chrono::NaiveDateTime;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{
    ContractSpec, Direction, IdGen, Offset, Order, OrderId, OrderStatus, PriceType, Snapshot,
    StopOrder, StopOrderId, StopOrderStatus, Trade,
};
use crate::engine::crossing::{LimitCross, StopCross};
use crate::engine::ledger::{Ledger, LedgerPolicy};

/// Market orders are simulated as limits this far through the market.
pub const MARKET_PRICE_FACTOR: f64 = 1000.0;

/// Order rejections. Only raised under [`LedgerPolicy::Strict`], apart from
/// malformed volumes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrderRejected {
    #[error("order volume must be positive, got {0}")]
    InvalidVolume(f64),

    #[error("close {requested} exceeds closable {closable} on {symbol} {side}")]
    ExceedsClosable {
        symbol: String,
        side: Direction,
        requested: f64,
        closable: f64,
    },

    #[error("insufficient balance: order needs {required:.4}, balance is {available:.4}")]
    InsufficientFunds { required: f64, available: f64 },
}

/// What a strategy asks for.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub direction: Direction,
    pub offset: Offset,
    pub price: f64,
    pub volume: f64,
    pub price_type: PriceType,
}

/// Notifications produced by the book, delivered to the strategy in order.
#[derive(Debug, Clone, PartialEq)]
pub enum BookEvent {
    Order(Order),
    Trade(Trade),
    StopOrder(StopOrder),
}

#[derive(Debug, Default)]
pub struct OrderBook {
    /// Every order ever placed or generated by a stop trigger.
    orders: BTreeMap<OrderId, Order>,
    working: BTreeSet<OrderId>,
    stop_orders: BTreeMap<StopOrderId, StopOrder>,
    working_stops: BTreeSet<StopOrderId>,
    trades: Vec<Trade>,
    ids: IdGen,
    policy: LedgerPolicy,
}

impl OrderBook {
    pub fn new(policy: LedgerPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    // ── Read access ────────────────────────────────────────────────────

    pub fn policy(&self) -> LedgerPolicy {
        self.policy
    }

    pub fn order(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    pub fn stop_order(&self, id: StopOrderId) -> Option<&StopOrder> {
        self.stop_orders.get(&id)
    }

    /// All orders, historical included, in id order.
    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    pub fn working_orders(&self) -> impl Iterator<Item = &Order> {
        self.working.iter().filter_map(|id| self.orders.get(id))
    }

    pub fn working_stop_orders(&self) -> impl Iterator<Item = &StopOrder> {
        self.working_stops
            .iter()
            .filter_map(|id| self.stop_orders.get(id))
    }

    /// The append-only trade ledger.
    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    // ── Placement ──────────────────────────────────────────────────────

    /// Place a limit (or simulated market) order.
    ///
    /// Close orders take closable volume from the side they close. Opening
    /// orders and spot buys reserve `price × volume` of balance. Both checks
    /// are soft under the permissive policy: the shortfall is logged and the
    /// order proceeds (an unfunded order reserves nothing and pays the full
    /// notional on fill).
    pub fn send_order(
        &mut self,
        request: OrderRequest,
        contract: &ContractSpec,
        ledger: &mut Ledger,
        now: NaiveDateTime,
    ) -> Result<OrderId, OrderRejected> {
        let volume = round_order_volume(request.volume)?;
        let symbol = request.symbol;

        if request.offset == Offset::Close {
            let side = request.direction.opposite();
            self.check_closable(&symbol, side, volume, ledger)?;
        }

        let reference = contract.round_to_tick(request.price);
        let reserved = if reserves_capital(request.direction, request.offset) {
            self.check_funds(reference * volume, ledger)?
        } else {
            0.0
        };

        // All checks passed; from here on the ledger is mutated.
        if request.offset == Offset::Close {
            ledger.take_closable(&symbol, request.direction.opposite(), volume);
        }
        ledger.adjust_balance(-reserved);

        let price = match (request.price_type, request.direction) {
            (PriceType::Limit, _) => reference,
            (PriceType::Market, Direction::Long) => reference * MARKET_PRICE_FACTOR,
            (PriceType::Market, Direction::Short) => reference / MARKET_PRICE_FACTOR,
        };

        let id = self.ids.next_order();
        debug!(%id, %symbol, direction = %request.direction, offset = %request.offset, price, volume, "order placed");
        self.orders.insert(
            id,
            Order {
                id,
                symbol,
                direction: request.direction,
                offset: request.offset,
                price_type: request.price_type,
                price,
                volume,
                traded: 0.0,
                avg_price: 0.0,
                status: OrderStatus::Pending,
                reserved,
                created_at: now,
                cancelled_at: None,
                acknowledged: false,
            },
        );
        self.working.insert(id);
        Ok(id)
    }

    /// Place a local stop order. Nothing is reserved until it triggers.
    pub fn send_stop_order(
        &mut self,
        request: OrderRequest,
        contract: &ContractSpec,
        ledger: &Ledger,
        now: NaiveDateTime,
        events: &mut Vec<BookEvent>,
    ) -> Result<StopOrderId, OrderRejected> {
        let volume = round_order_volume(request.volume)?;
        if request.offset == Offset::Close && self.policy == LedgerPolicy::Strict {
            self.check_closable(&request.symbol, request.direction.opposite(), volume, ledger)?;
        }

        let id = self.ids.next_stop();
        let stop = StopOrder {
            id,
            symbol: request.symbol,
            direction: request.direction,
            offset: request.offset,
            price_type: request.price_type,
            price: contract.round_to_tick(request.price),
            volume,
            status: StopOrderStatus::Waiting,
            order_id: None,
            created_at: now,
            cancelled_at: None,
        };
        debug!(%id, symbol = %stop.symbol, price = stop.price, volume, "stop order placed");
        events.push(BookEvent::StopOrder(stop.clone()));
        self.stop_orders.insert(id, stop);
        self.working_stops.insert(id);
        Ok(id)
    }

    fn check_closable(
        &self,
        symbol: &str,
        side: Direction,
        volume: f64,
        ledger: &Ledger,
    ) -> Result<(), OrderRejected> {
        let closable = ledger.closable(symbol, side);
        if volume <= closable {
            return Ok(());
        }
        match self.policy {
            LedgerPolicy::Strict => Err(OrderRejected::ExceedsClosable {
                symbol: symbol.to_string(),
                side,
                requested: volume,
                closable,
            }),
            LedgerPolicy::Permissive => {
                warn!(
                    symbol,
                    %side,
                    requested = volume,
                    closable,
                    "closing more than the closable volume; a live venue might reject this"
                );
                Ok(())
            }
        }
    }

    /// Returns the amount to reserve.
    fn check_funds(&self, required: f64, ledger: &Ledger) -> Result<f64, OrderRejected> {
        let available = ledger.balance();
        if available >= required {
            return Ok(required);
        }
        match self.policy {
            LedgerPolicy::Strict => Err(OrderRejected::InsufficientFunds {
                required,
                available,
            }),
            LedgerPolicy::Permissive => {
                warn!(
                    required,
                    available, "insufficient balance; a live venue might reject this"
                );
                Ok(0.0)
            }
        }
    }

    // ── Cancellation ───────────────────────────────────────────────────

    /// Cancel a working order, giving back its closable volume or reserved
    /// capital. Unknown, filled or already cancelled ids are a no-op.
    pub fn cancel_order(
        &mut self,
        id: OrderId,
        ledger: &mut Ledger,
        now: NaiveDateTime,
        events: &mut Vec<BookEvent>,
    ) -> bool {
        if !self.working.remove(&id) {
            return false;
        }
        let Some(order) = self.orders.get_mut(&id) else {
            return false;
        };
        order.status = OrderStatus::Cancelled;
        order.cancelled_at = Some(now);
        match order.closes() {
            Some(side) => ledger.restore_closable(&order.symbol, side, order.volume),
            None => {
                ledger.adjust_balance(order.reserved);
                order.reserved = 0.0;
            }
        }
        debug!(%id, "order cancelled");
        events.push(BookEvent::Order(order.clone()));
        true
    }

    pub fn cancel_stop_order(
        &mut self,
        id: StopOrderId,
        now: NaiveDateTime,
        events: &mut Vec<BookEvent>,
    ) -> bool {
        if !self.working_stops.remove(&id) {
            return false;
        }
        let Some(stop) = self.stop_orders.get_mut(&id) else {
            return false;
        };
        stop.status = StopOrderStatus::Cancelled;
        stop.cancelled_at = Some(now);
        debug!(%id, "stop order cancelled");
        events.push(BookEvent::StopOrder(stop.clone()));
        true
    }

    /// Cancel every working limit order. Returns how many were cancelled.
    pub fn cancel_all(
        &mut self,
        ledger: &mut Ledger,
        now: NaiveDateTime,
        events: &mut Vec<BookEvent>,
    ) -> usize {
        let ids: Vec<OrderId> = self.working.iter().copied().collect();
        ids.into_iter()
            .filter(|id| self.cancel_order(*id, ledger, now, events))
            .count()
    }

    pub fn cancel_all_stop_orders(
        &mut self,
        now: NaiveDateTime,
        events: &mut Vec<BookEvent>,
    ) -> usize {
        let ids: Vec<StopOrderId> = self.working_stops.iter().copied().collect();
        ids.into_iter()
            .filter(|id| self.cancel_stop_order(*id, now, events))
            .count()
    }

    // ── Crossing ───────────────────────────────────────────────────────

    /// Match working limit orders for the snapshot's symbol.
    ///
    /// An order seen by a crossing pass for the first time is acknowledged
    /// with a `Pending` update. Each fill then produces one `Filled` order
    /// update followed by one trade.
    pub fn cross_limit_orders(
        &mut self,
        snapshot: &Snapshot,
        ledger: &mut Ledger,
        events: &mut Vec<BookEvent>,
    ) {
        let cross = LimitCross::of(snapshot);
        let symbol = snapshot.symbol();
        let now = snapshot.datetime();
        let candidates: Vec<OrderId> = self
            .working
            .iter()
            .copied()
            .filter(|id| self.orders.get(id).is_some_and(|o| o.symbol == symbol))
            .collect();

        for id in candidates {
            let Some(order) = self.orders.get_mut(&id) else {
                continue;
            };
            if !order.acknowledged {
                order.acknowledged = true;
                events.push(BookEvent::Order(order.clone()));
            }
            let Some(fill) = cross.fill_price(order.direction, order.price) else {
                continue;
            };

            settle_fill(ledger, order, fill);
            order.traded = order.volume;
            order.avg_price = fill;
            order.status = OrderStatus::Filled;
            let order = order.clone();
            self.working.remove(&id);

            let trade = Trade {
                id: self.ids.next_trade(),
                order_id: id,
                symbol: order.symbol.clone(),
                direction: order.direction,
                offset: order.offset,
                price: fill,
                volume: order.volume,
                datetime: now,
            };
            debug!(order = %id, trade = %trade.id, price = fill, volume = trade.volume, "limit order filled");
            self.trades.push(trade.clone());
            events.push(BookEvent::Order(order));
            events.push(BookEvent::Trade(trade));
        }
    }

    /// Trigger working stop orders for the snapshot's symbol.
    ///
    /// A triggered stop becomes a new, immediately filled order. The ledger
    /// settles as if that order had been placed and filled at the stop fill
    /// price, closable and balance checks included. Events: stop update,
    /// order update, trade. Under the strict policy a stop failing those
    /// checks is cancelled instead, with a single stop update.
    pub fn cross_stop_orders(
        &mut self,
        snapshot: &Snapshot,
        ledger: &mut Ledger,
        events: &mut Vec<BookEvent>,
    ) {
        let cross = StopCross::of(snapshot);
        let symbol = snapshot.symbol();
        let now = snapshot.datetime();
        let candidates: Vec<StopOrderId> = self
            .working_stops
            .iter()
            .copied()
            .filter(|id| self.stop_orders.get(id).is_some_and(|s| s.symbol == symbol))
            .collect();

        for stop_id in candidates {
            let Some(stop) = self.stop_orders.get(&stop_id) else {
                continue;
            };
            let Some(fill) = cross.fill_price(stop.direction, stop.price) else {
                continue;
            };
            let stop_snapshot = stop.clone();

            let reserved = match self.check_trigger(&stop_snapshot, fill, ledger) {
                Ok(reserved) => reserved,
                Err(reason) => {
                    self.reject_stop(stop_id, now, &reason, events);
                    continue;
                }
            };
            if stop_snapshot.offset == Offset::Close {
                let side = stop_snapshot.direction.opposite();
                ledger.take_closable(&stop_snapshot.symbol, side, stop_snapshot.volume);
            }
            ledger.adjust_balance(-reserved);

            let order_id = self.ids.next_order();
            let mut order = Order {
                id: order_id,
                symbol: stop_snapshot.symbol.clone(),
                direction: stop_snapshot.direction,
                offset: stop_snapshot.offset,
                price_type: stop_snapshot.price_type,
                price: stop_snapshot.price,
                volume: stop_snapshot.volume,
                traded: stop_snapshot.volume,
                avg_price: fill,
                status: OrderStatus::Filled,
                reserved,
                created_at: now,
                cancelled_at: None,
                acknowledged: true,
            };
            settle_fill(ledger, &mut order, fill);

            let trade = Trade {
                id: self.ids.next_trade(),
                order_id,
                symbol: order.symbol.clone(),
                direction: order.direction,
                offset: order.offset,
                price: fill,
                volume: order.volume,
                datetime: now,
            };

            self.working_stops.remove(&stop_id);
            let triggered = match self.stop_orders.get_mut(&stop_id) {
                Some(s) => {
                    s.status = StopOrderStatus::Triggered;
                    s.order_id = Some(order_id);
                    s.clone()
                }
                None => continue,
            };
            debug!(stop = %stop_id, order = %order_id, trade = %trade.id, price = fill, "stop order triggered");

            self.orders.insert(order_id, order.clone());
            self.trades.push(trade.clone());
            events.push(BookEvent::StopOrder(triggered));
            events.push(BookEvent::Order(order));
            events.push(BookEvent::Trade(trade));
        }
    }

    /// The placement checks a limit order at the stop fill price would face.
    /// Returns the amount to reserve.
    fn check_trigger(
        &self,
        stop: &StopOrder,
        fill: f64,
        ledger: &Ledger,
    ) -> Result<f64, OrderRejected> {
        if stop.offset == Offset::Close {
            self.check_closable(&stop.symbol, stop.direction.opposite(), stop.volume, ledger)?;
        }
        if reserves_capital(stop.direction, stop.offset) {
            self.check_funds(fill * stop.volume, ledger)
        } else {
            Ok(0.0)
        }
    }

    /// Cancel a stop that failed its trigger-time checks.
    fn reject_stop(
        &mut self,
        id: StopOrderId,
        now: NaiveDateTime,
        reason: &OrderRejected,
        events: &mut Vec<BookEvent>,
    ) {
        self.working_stops.remove(&id);
        let Some(stop) = self.stop_orders.get_mut(&id) else {
            return;
        };
        stop.status = StopOrderStatus::Cancelled;
        stop.cancelled_at = Some(now);
        warn!(%id, symbol = %stop.symbol, %reason, "stop order rejected at trigger");
        events.push(BookEvent::StopOrder(stop.clone()));
    }
}

/// Whether an order holds capital while it rests.
fn reserves_capital(direction: Direction, offset: Offset) -> bool {
    match offset {
        Offset::Open => true,
        Offset::None => direction == Direction::Long,
        Offset::Close => false,
    }
}

fn round_order_volume(volume: f64) -> Result<f64, OrderRejected> {
    let rounded = (volume * 100_000.0).round() / 100_000.0;
    if rounded > 0.0 && rounded.is_finite() {
        Ok(rounded)
    } else {
        Err(OrderRejected::InvalidVolume(volume))
    }
}

/// Apply a whole-order fill at `fill` to the ledger. The order's reservation
/// settles to the fill notional.
fn settle_fill(ledger: &mut Ledger, order: &mut Order, fill: f64) {
    let notional = fill * order.volume;
    match (order.direction, order.offset) {
        (direction, Offset::Open) => {
            ledger.open(&order.symbol, direction, order.volume);
            ledger.adjust_balance(order.reserved - notional);
        }
        (direction, Offset::Close) => {
            ledger.reduce(&order.symbol, direction.opposite(), order.volume);
        }
        (Direction::Long, Offset::None) => {
            ledger.add_spot(&order.symbol, order.volume);
            ledger.adjust_balance(order.reserved - notional);
        }
        (Direction::Short, Offset::None) => {
            ledger.reduce(&order.symbol, Direction::Long, order.volume);
            ledger.adjust_balance(notional);
        }
    }
    order.reserved = if reserves_capital(order.direction, order.offset) {
        notional
    } else {
        0.0
    };
}
