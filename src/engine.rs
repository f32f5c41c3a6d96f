use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tracing::{info, warn};

use crate::errors::{EngineError, EngineResult};
use crate::orderbook::OrderBook;
use crate::orders::{Order, OrderStatus, OrderType, Side};
use crate::store::{OrderStore, StoreTx};
use crate::trade::Trade;

/// A new-order request as the API layer hands it over, before validation.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Option<u64>,
    pub quantity: u64,
}

/// What `place` returns: the incoming order's final state plus the trades it
/// produced, in execution order.
#[derive(Debug)]
pub struct Placement {
    pub order: Order,
    pub trades: Vec<Trade>,
}

/// The matching engine: one lockable [`OrderBook`] per symbol, a shared
/// [`OrderStore`], and monotonic id counters.
///
/// # Concurrency
/// Each symbol's book has its own mutex, held for the **entire** place or
/// cancel call including the store commit, so book mutation and commit are
/// indivisible from the point of view of other callers on that symbol.
/// Different symbols proceed fully in parallel. The registry mutex only
/// guards the symbol → book map and is never held across matching.
///
/// # Atomicity
/// Matching first *plans* against the book without mutating it, stages every
/// row into one [`StoreTx`], and commits. Only after the commit succeeds is
/// the plan applied to the book — a failed commit leaves both the store and
/// the book exactly as they were.
pub struct Engine {
    store: Arc<dyn OrderStore>,
    books: Mutex<HashMap<String, Arc<Mutex<OrderBook>>>>,
    next_order_id: AtomicU64,
    next_trade_id: AtomicU64,
}

impl Engine {
    /// Build an engine over `store`, rebuilding every symbol's book from the
    /// persisted open orders.
    ///
    /// Open orders are replayed in creation (id) order, which reconstructs
    /// FIFO within each price level exactly as it was. Id counters resume
    /// above the highest ids ever committed so ids are never reused, even
    /// across restarts and even for orders long since closed.
    pub fn recover(store: Arc<dyn OrderStore>) -> EngineResult<Self> {
        let (max_order_id, max_trade_id) = store.id_watermarks()?;

        let mut books: HashMap<String, Arc<Mutex<OrderBook>>> = HashMap::new();
        let mut replayed = 0usize;
        for order in store.all_open_orders()? {
            let book = books.entry(order.symbol.clone()).or_default();
            book.lock().unwrap().insert(order);
            replayed += 1;
        }
        if replayed > 0 {
            info!(orders = replayed, symbols = books.len(), "order book recovered");
        }

        Ok(Self {
            store,
            books: Mutex::new(books),
            next_order_id: AtomicU64::new(max_order_id + 1),
            next_trade_id: AtomicU64::new(max_trade_id + 1),
        })
    }

    /// The book for `symbol`, created on first reference.
    fn book(&self, symbol: &str) -> Arc<Mutex<OrderBook>> {
        let mut books = self.books.lock().unwrap();
        books.entry(symbol.to_string()).or_default().clone()
    }

    /// Validate and normalize a request. Runs before any shared state is
    /// touched, so a rejected order has zero effect.
    fn validate(req: &OrderRequest) -> EngineResult<Option<u64>> {
        if req.symbol.is_empty() {
            return Err(EngineError::InvalidOrder("symbol must not be empty"));
        }
        if req.quantity == 0 {
            return Err(EngineError::InvalidOrder("quantity must be > 0"));
        }
        match req.order_type {
            OrderType::Limit => match req.price {
                Some(p) if p > 0 => Ok(Some(p)),
                _ => Err(EngineError::InvalidOrder(
                    "limit orders require a positive price",
                )),
            },
            // Any price supplied with a market order is discarded.
            OrderType::Market => Ok(None),
        }
    }

    /// Place an incoming order: match it against the book, persist the whole
    /// effect atomically, and return the trades plus the order's final state.
    pub fn place(&self, req: OrderRequest) -> EngineResult<Placement> {
        let price = Self::validate(&req)?;

        let book = self.book(&req.symbol);
        let mut book = book.lock().unwrap();

        let mut order = Order {
            id: self.next_order_id.fetch_add(1, Ordering::Relaxed),
            symbol: req.symbol,
            side: req.side,
            order_type: req.order_type,
            price,
            initial_quantity: req.quantity,
            remaining_quantity: req.quantity,
            status: OrderStatus::Open,
            created_at: SystemTime::now(),
        };

        let plan = book.plan_match(&order);

        order.remaining_quantity = plan.taker_remaining;
        if order.remaining_quantity == 0 {
            order.status = OrderStatus::Filled;
        } else if order.order_type == OrderType::Market {
            // Market leftovers never rest; the unfilled quantity lapses.
            order.status = OrderStatus::Canceled;
        }

        let mut tx = StoreTx::new();
        let mut trades = Vec::with_capacity(plan.fills.len());
        for fill in &plan.fills {
            let (buy_order_id, sell_order_id) = match order.side {
                Side::Buy => (order.id, fill.maker.id),
                Side::Sell => (fill.maker.id, order.id),
            };
            let trade = Trade {
                id: self.next_trade_id.fetch_add(1, Ordering::Relaxed),
                symbol: order.symbol.clone(),
                buy_order_id,
                sell_order_id,
                price: fill.price,
                quantity: fill.quantity,
                timestamp: SystemTime::now(),
            };
            tx.insert_trade(&trade);
            tx.update_order(&fill.maker);
            trades.push(trade);
        }
        tx.insert_order(&order);

        // Commit before touching the book. An error here aborts the whole
        // operation with the book still pristine.
        self.store.commit(tx)?;

        book.apply_fills(order.side, &plan.fills);
        if order.order_type == OrderType::Limit && order.is_open() {
            book.insert(order.clone());
        }

        info!(
            order_id = order.id,
            status = ?order.status,
            trades = trades.len(),
            "order placed"
        );
        Ok(Placement { order, trades })
    }

    /// Cancel an open order. Fails with [`EngineError::OrderNotFound`] for an
    /// unknown id and [`EngineError::OrderNotOpen`] once the order is filled
    /// or already canceled — cancellation is not idempotent.
    pub fn cancel(&self, order_id: u64) -> EngineResult<Order> {
        // First read just locates the owning symbol.
        let order = self
            .store
            .order(order_id)?
            .ok_or(EngineError::OrderNotFound(order_id))?;

        let book = self.book(&order.symbol);
        let mut book = book.lock().unwrap();

        // Re-read under the lock: a match may have closed the order between
        // the lookup above and acquiring the book.
        let mut order = self
            .store
            .order(order_id)?
            .ok_or(EngineError::OrderNotFound(order_id))?;
        if !order.is_open() {
            warn!(order_id, status = ?order.status, "cancel refused: order not open");
            return Err(EngineError::OrderNotOpen(order_id));
        }

        order.status = OrderStatus::Canceled;
        let mut tx = StoreTx::new();
        tx.update_order(&order);
        self.store.commit(tx)?;

        if !book.remove(&order) {
            // An open order always rests in its book; a miss means the book
            // and store disagree.
            warn!(order_id, "canceled order was not resting in the book");
        }
        info!(order_id, "order canceled");
        Ok(order)
    }

    /// Snapshot of one order, straight from the store.
    pub fn order(&self, order_id: u64) -> EngineResult<Order> {
        self.store
            .order(order_id)?
            .ok_or(EngineError::OrderNotFound(order_id))
    }

    /// Open orders for a symbol in creation order. Served from the store
    /// without taking the book lock; only committed state is ever visible.
    pub fn open_orders(&self, symbol: &str) -> EngineResult<Vec<Order>> {
        Ok(self.store.open_orders(symbol)?)
    }

    /// Trade history for a symbol, oldest first. Lock-free like `open_orders`.
    pub fn trades(&self, symbol: &str) -> EngineResult<Vec<Trade>> {
        Ok(self.store.trades(symbol)?)
    }
}
