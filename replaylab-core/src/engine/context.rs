//! The capability handle a strategy receives on every callback.
//!
//! A strategy can place and cancel orders and read the ledger. It cannot
//! write positions or balance directly: every mutation goes through the order
//! book. Notifications caused by a call (a cancel update, a stop-order
//! acknowledgement) are queued and delivered after the current callback
//! returns.

use chrono::NaiveDateTime;

use crate::domain::{
    ContractSpec, ContractTable, Direction, Offset, Order, OrderId, OrderKind, PriceType,
    StopOrder, StopOrderId,
};
use crate::engine::ledger::Ledger;
use crate::engine::order_book::{BookEvent, OrderBook, OrderRejected, OrderRequest};

pub struct StrategyContext<'a> {
    pub(crate) book: &'a mut OrderBook,
    pub(crate) ledger: &'a mut Ledger,
    pub(crate) contracts: &'a ContractTable,
    pub(crate) events: &'a mut Vec<BookEvent>,
    pub(crate) log: &'a mut Vec<String>,
    pub(crate) now: NaiveDateTime,
}

impl<'a> StrategyContext<'a> {
    /// Timestamp of the snapshot being processed.
    pub fn now(&self) -> NaiveDateTime {
        self.now
    }

    pub fn contract(&self, symbol: &str) -> ContractSpec {
        self.contracts.spec(symbol)
    }

    // ── Orders ─────────────────────────────────────────────────────────

    pub fn buy(&mut self, symbol: &str, price: f64, volume: f64) -> Result<OrderId, OrderRejected> {
        self.send_order(symbol, OrderKind::Buy, price, volume, PriceType::Limit)
    }

    pub fn sell(&mut self, symbol: &str, price: f64, volume: f64) -> Result<OrderId, OrderRejected> {
        self.send_order(symbol, OrderKind::Sell, price, volume, PriceType::Limit)
    }

    pub fn short(&mut self, symbol: &str, price: f64, volume: f64) -> Result<OrderId, OrderRejected> {
        self.send_order(symbol, OrderKind::Short, price, volume, PriceType::Limit)
    }

    pub fn cover(&mut self, symbol: &str, price: f64, volume: f64) -> Result<OrderId, OrderRejected> {
        self.send_order(symbol, OrderKind::Cover, price, volume, PriceType::Limit)
    }

    pub fn send_order(
        &mut self,
        symbol: &str,
        kind: OrderKind,
        price: f64,
        volume: f64,
        price_type: PriceType,
    ) -> Result<OrderId, OrderRejected> {
        let request = OrderRequest {
            symbol: symbol.to_string(),
            direction: kind.direction(),
            offset: kind.offset(),
            price,
            volume,
            price_type,
        };
        let spec = self.contracts.spec(symbol);
        self.book.send_order(request, &spec, self.ledger, self.now)
    }

    /// Spot order: no leverage, buys add to the long side and sells reduce it.
    pub fn send_spot_order(
        &mut self,
        symbol: &str,
        direction: Direction,
        price: f64,
        volume: f64,
        price_type: PriceType,
    ) -> Result<OrderId, OrderRejected> {
        let request = OrderRequest {
            symbol: symbol.to_string(),
            direction,
            offset: Offset::None,
            price,
            volume,
            price_type,
        };
        let spec = self.contracts.spec(symbol);
        self.book.send_order(request, &spec, self.ledger, self.now)
    }

    pub fn send_stop_order(
        &mut self,
        symbol: &str,
        kind: OrderKind,
        price: f64,
        volume: f64,
    ) -> Result<StopOrderId, OrderRejected> {
        let request = OrderRequest {
            symbol: symbol.to_string(),
            direction: kind.direction(),
            offset: kind.offset(),
            price,
            volume,
            price_type: PriceType::Limit,
        };
        let spec = self.contracts.spec(symbol);
        self.book
            .send_stop_order(request, &spec, self.ledger, self.now, self.events)
    }

    // ── Cancellation ───────────────────────────────────────────────────

    pub fn cancel_order(&mut self, id: OrderId) -> bool {
        self.book.cancel_order(id, self.ledger, self.now, self.events)
    }

    pub fn cancel_stop_order(&mut self, id: StopOrderId) -> bool {
        self.book.cancel_stop_order(id, self.now, self.events)
    }

    pub fn cancel_all(&mut self) -> usize {
        self.book.cancel_all(self.ledger, self.now, self.events)
    }

    pub fn cancel_all_stop_orders(&mut self) -> usize {
        self.book.cancel_all_stop_orders(self.now, self.events)
    }

    /// Cancel working limit and stop orders on one symbol.
    pub fn cancel_symbol(&mut self, symbol: &str) -> usize {
        let orders: Vec<OrderId> = self
            .book
            .working_orders()
            .filter(|o| o.symbol == symbol)
            .map(|o| o.id)
            .collect();
        let stops: Vec<StopOrderId> = self
            .book
            .working_stop_orders()
            .filter(|s| s.symbol == symbol)
            .map(|s| s.id)
            .collect();
        let cancelled = orders.into_iter().filter(|id| self.cancel_order(*id)).count();
        cancelled + stops.into_iter().filter(|id| self.cancel_stop_order(*id)).count()
    }

    // ── Read access ────────────────────────────────────────────────────

    pub fn ledger(&self) -> &Ledger {
        &*self.ledger
    }

    pub fn position(&self, symbol: &str, direction: Direction) -> f64 {
        self.ledger.position(symbol, direction)
    }

    pub fn closable(&self, symbol: &str, direction: Direction) -> f64 {
        self.ledger.closable(symbol, direction)
    }

    pub fn net_position(&self, symbol: &str) -> f64 {
        self.ledger.net_position(symbol)
    }

    pub fn balance(&self) -> f64 {
        self.ledger.balance()
    }

    pub fn working_orders(&self) -> impl Iterator<Item = &Order> {
        self.book.working_orders()
    }

    pub fn working_stop_orders(&self) -> impl Iterator<Item = &StopOrder> {
        self.book.working_stop_orders()
    }

    // ── Log ────────────────────────────────────────────────────────────

    /// Append a line to the run's strategy log, stamped with the current time.
    pub fn write_log(&mut self, content: impl AsRef<str>) {
        let line = format!("{} {}", self.now.format("%Y-%m-%d %H:%M:%S"), content.as_ref());
        tracing::debug!(target: "replaylab::strategy", "{line}");
        self.log.push(line);
    }
}
