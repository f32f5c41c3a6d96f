use bincode::{
    config::standard,
    error::{DecodeError, EncodeError},
};
use parity_db::{BTreeIterator, ColId, Db, Options};
use std::path::Path;
use thiserror::Error;

use crate::orders::Order;
use crate::trade::Trade;

const ORDERS_COL: ColId = 0;
const TRADES_COL: ColId = 1;

/// Errors from the key/value store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ParityDB error: {0}")]
    Parity(#[from] parity_db::Error),

    #[error("Bincode encode error: {0}")]
    BincodeEncode(#[from] EncodeError),

    #[error("Bincode decode error: {0}")]
    BincodeDecode(#[from] DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A staged unit of work: every row touched by one `place` or `cancel` call.
///
/// Nothing is written until the tx is handed to [`OrderStore::commit`], which
/// applies all staged rows in a single atomic batch. Rolling back is simply
/// dropping the tx without committing it.
#[derive(Default)]
pub struct StoreTx {
    pub(crate) orders: Vec<Order>,
    pub(crate) trades: Vec<Trade>,
}

impl StoreTx {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a brand-new order row.
    pub fn insert_order(&mut self, order: &Order) {
        self.orders.push(order.clone());
    }

    /// Stage an update to an order's mutable fields (remaining quantity, status).
    ///
    /// Rows are keyed by id, so an update is a full-row rewrite.
    pub fn update_order(&mut self, order: &Order) {
        self.orders.push(order.clone());
    }

    /// Stage a trade row.
    pub fn insert_trade(&mut self, trade: &Trade) {
        self.trades.push(trade.clone());
    }
}

/// Persistent backend for orders and trades.
///
/// `commit` is the only write path and must be all-or-nothing: either every
/// staged row in the [`StoreTx`] becomes durable, or none do. The read
/// methods are non-transactional and serve the query endpoints plus startup
/// recovery; they only ever observe committed state.
pub trait OrderStore: Send + Sync {
    /// Atomically apply every row staged in `tx`.
    fn commit(&self, tx: StoreTx) -> StoreResult<()>;

    /// Fetch one order by id.
    fn order(&self, id: u64) -> StoreResult<Option<Order>>;

    /// All open orders for `symbol`, in creation (id) order.
    fn open_orders(&self, symbol: &str) -> StoreResult<Vec<Order>>;

    /// All open orders across every symbol, in creation (id) order.
    /// Used to rebuild the in-memory books at startup.
    fn all_open_orders(&self) -> StoreResult<Vec<Order>>;

    /// All trades for `symbol`, oldest first.
    fn trades(&self, symbol: &str) -> StoreResult<Vec<Trade>>;

    /// Highest (order id, trade id) ever committed, for re-seeding the
    /// id counters after a restart. `(0, 0)` on an empty store.
    fn id_watermarks(&self) -> StoreResult<(u64, u64)>;
}

/// A ParityDB-backed [`OrderStore`].
///
/// Two B-tree columns: orders keyed by big-endian id (ids are monotonic, so
/// key order is creation order), and trades keyed by the symbol's length,
/// the symbol bytes, then the big-endian trade id, so one symbol's history
/// is a contiguous prefix scan. The length prefix keeps the scan exact:
/// without it a symbol that is a prefix of another (say `A` and `A:B`)
/// would pick up the longer symbol's rows.
pub struct ParityStore {
    db: Db,
}

impl ParityStore {
    /// Open (or create) a ParityDB at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let mut opts = Options::with_columns(path.as_ref(), 2);
        // B-tree indexes for ordered scans
        opts.columns[ORDERS_COL as usize].btree_index = true;
        opts.columns[TRADES_COL as usize].btree_index = true;
        let db = Db::open_or_create(&opts)?;
        Ok(ParityStore { db })
    }

    #[inline]
    fn order_key(id: u64) -> Vec<u8> {
        id.to_be_bytes().to_vec()
    }

    #[inline]
    fn trade_prefix(symbol: &str) -> Vec<u8> {
        let mut k = Vec::with_capacity(4 + symbol.len());
        k.extend_from_slice(&(symbol.len() as u32).to_be_bytes());
        k.extend_from_slice(symbol.as_bytes());
        k
    }

    #[inline]
    fn trade_key(trade: &Trade) -> Vec<u8> {
        let mut key = Self::trade_prefix(&trade.symbol);
        key.extend_from_slice(&trade.id.to_be_bytes());
        key
    }

    fn decode_order(raw: &[u8]) -> StoreResult<Order> {
        let (order, _) = bincode::decode_from_slice(raw, standard())?;
        Ok(order)
    }

    fn decode_trade(raw: &[u8]) -> StoreResult<Trade> {
        let (trade, _) = bincode::decode_from_slice(raw, standard())?;
        Ok(trade)
    }

    /// Walk the orders column front to back, yielding decoded rows in id order.
    fn scan_orders(&self, mut visit: impl FnMut(Order)) -> StoreResult<()> {
        let mut it: BTreeIterator<'_> = self.db.iter(ORDERS_COL)?;
        it.seek_to_first()?;
        while let Some((_key, raw)) = it.next()? {
            visit(Self::decode_order(&raw)?);
        }
        Ok(())
    }
}

impl OrderStore for ParityStore {
    fn commit(&self, tx: StoreTx) -> StoreResult<()> {
        let config = standard();
        let mut batch = Vec::with_capacity(tx.orders.len() + tx.trades.len());
        for order in &tx.orders {
            let value = bincode::encode_to_vec(order, config)?;
            batch.push((ORDERS_COL, Self::order_key(order.id), Some(value)));
        }
        for trade in &tx.trades {
            let value = bincode::encode_to_vec(trade, config)?;
            batch.push((TRADES_COL, Self::trade_key(trade), Some(value)));
        }
        // Single parity-db commit: all rows land or none do.
        self.db.commit(batch)?;
        Ok(())
    }

    fn order(&self, id: u64) -> StoreResult<Option<Order>> {
        match self.db.get(ORDERS_COL, &Self::order_key(id))? {
            Some(raw) => Ok(Some(Self::decode_order(&raw)?)),
            None => Ok(None),
        }
    }

    fn open_orders(&self, symbol: &str) -> StoreResult<Vec<Order>> {
        let mut orders = Vec::new();
        self.scan_orders(|o| {
            if o.is_open() && o.symbol == symbol {
                orders.push(o);
            }
        })?;
        Ok(orders)
    }

    fn all_open_orders(&self) -> StoreResult<Vec<Order>> {
        let mut orders = Vec::new();
        self.scan_orders(|o| {
            if o.is_open() {
                orders.push(o);
            }
        })?;
        Ok(orders)
    }

    fn trades(&self, symbol: &str) -> StoreResult<Vec<Trade>> {
        let prefix = Self::trade_prefix(symbol);
        let mut it: BTreeIterator<'_> = self.db.iter(TRADES_COL)?;
        it.seek(&prefix)?;

        let mut trades = Vec::new();
        while let Some((key, raw)) = it.next()? {
            if !key.starts_with(&prefix) {
                break;
            }
            trades.push(Self::decode_trade(&raw)?);
        }
        Ok(trades)
    }

    fn id_watermarks(&self) -> StoreResult<(u64, u64)> {
        let mut max_order = 0u64;
        self.scan_orders(|o| max_order = max_order.max(o.id))?;

        let mut max_trade = 0u64;
        let mut it = self.db.iter(TRADES_COL)?;
        it.seek_to_first()?;
        while let Some((_key, raw)) = it.next()? {
            max_trade = max_trade.max(Self::decode_trade(&raw)?.id);
        }
        Ok((max_order, max_trade))
    }
}

/// An in-memory [`OrderStore`] with the same commit contract as
/// [`ParityStore`]: the whole tx is applied under one lock.
///
/// Used by tests and by `serve --ephemeral` runs where durability across
/// restarts is not wanted.
#[derive(Default)]
pub struct MemoryStore {
    inner: std::sync::Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    orders: std::collections::BTreeMap<u64, Order>,
    trades: std::collections::BTreeMap<(String, u64), Trade>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OrderStore for MemoryStore {
    fn commit(&self, tx: StoreTx) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        for order in tx.orders {
            inner.orders.insert(order.id, order);
        }
        for trade in tx.trades {
            inner.trades.insert((trade.symbol.clone(), trade.id), trade);
        }
        Ok(())
    }

    fn order(&self, id: u64) -> StoreResult<Option<Order>> {
        Ok(self.inner.lock().unwrap().orders.get(&id).cloned())
    }

    fn open_orders(&self, symbol: &str) -> StoreResult<Vec<Order>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .orders
            .values()
            .filter(|o| o.is_open() && o.symbol == symbol)
            .cloned()
            .collect())
    }

    fn all_open_orders(&self) -> StoreResult<Vec<Order>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.orders.values().filter(|o| o.is_open()).cloned().collect())
    }

    fn trades(&self, symbol: &str) -> StoreResult<Vec<Trade>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .trades
            .range((symbol.to_string(), 0)..=(symbol.to_string(), u64::MAX))
            .map(|(_, t)| t.clone())
            .collect())
    }

    fn id_watermarks(&self) -> StoreResult<(u64, u64)> {
        let inner = self.inner.lock().unwrap();
        let max_order = inner.orders.keys().max().copied().unwrap_or(0);
        let max_trade = inner.trades.values().map(|t| t.id).max().unwrap_or(0);
        Ok((max_order, max_trade))
    }
}
