use crate::orders::{Order, OrderStatus, OrderType, Side};
use std::collections::{BTreeMap, VecDeque, btree_map};
use tracing::warn;

/// One side of a symbol's book: price levels in a [`BTreeMap`], each level a
/// FIFO [`VecDeque`] of resting orders.
///
/// The map is keyed by price in ascending order; "best" is the **highest**
/// key for bids and the **lowest** key for asks, so best-price lookup and
/// level insert/remove are all O(log n). Within a level, strict FIFO by
/// arrival — together that is price-time priority.
pub struct BookSide {
    side: Side,
    levels: BTreeMap<u64, VecDeque<Order>>,
}

/// Internal enum to unify forward (`Iter`) and reverse (`Rev<Iter>`) BTreeMap iteration.
///
/// - [`EitherIter::Fwd`] handles ascending iteration over prices (asks).
/// - [`EitherIter::Rev`] handles descending iteration (bids: highest first).
enum EitherIter<'a> {
    /// Forward (ascending) iteration over the price levels.
    Fwd(btree_map::Iter<'a, u64, VecDeque<Order>>),
    /// Reverse (descending) iteration over the price levels.
    Rev(std::iter::Rev<btree_map::Iter<'a, u64, VecDeque<Order>>>),
}

impl<'a> Iterator for EitherIter<'a> {
    type Item = (&'a u64, &'a VecDeque<Order>);

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            EitherIter::Fwd(iter) => iter.next(),
            EitherIter::Rev(iter) => iter.next(),
        }
    }
}

impl BookSide {
    fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
        }
    }

    /// The best price on this side, if any resting orders exist.
    pub fn best_price(&self) -> Option<u64> {
        match self.side {
            Side::Buy => self.levels.last_key_value().map(|(p, _)| *p),
            Side::Sell => self.levels.first_key_value().map(|(p, _)| *p),
        }
    }

    /// Price levels from best to worst.
    fn levels_best_first(&self) -> EitherIter<'_> {
        match self.side {
            Side::Buy => EitherIter::Rev(self.levels.iter().rev()),
            Side::Sell => EitherIter::Fwd(self.levels.iter()),
        }
    }

    /// Append an open limit order at the tail of its price level, creating
    /// the level if absent. Appending preserves FIFO: the order is the newest
    /// arrival at that price.
    fn insert(&mut self, order: Order) {
        let Some(price) = order.price else {
            // Market orders never rest; reaching here is an engine bug.
            warn!(order_id = order.id, "refusing to rest priceless order");
            return;
        };
        self.levels.entry(price).or_default().push_back(order);
    }

    /// Remove an order from its level by identity; prunes the level if it
    /// becomes empty. Returns false if the order is not resting here.
    fn remove(&mut self, price: u64, order_id: u64) -> bool {
        let Some(level) = self.levels.get_mut(&price) else {
            return false;
        };
        let Some(pos) = level.iter().position(|o| o.id == order_id) else {
            return false;
        };
        level.remove(pos);
        if level.is_empty() {
            self.levels.remove(&price);
        }
        true
    }

    /// Apply one planned fill to the maker at the front of `price`'s queue:
    /// either pop it (fully filled) or write back its reduced remaining.
    fn consume(&mut self, price: u64, maker: &Order) {
        let Some(level) = self.levels.get_mut(&price) else {
            return;
        };
        debug_assert_eq!(level.front().map(|o| o.id), Some(maker.id));
        if maker.remaining_quantity == 0 {
            level.pop_front();
            if level.is_empty() {
                self.levels.remove(&price);
            }
        } else if let Some(front) = level.front_mut() {
            front.remaining_quantity = maker.remaining_quantity;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// One fill produced by the matching walk: `maker` is a copy of the resting
/// order **after** the fill (remaining decremented, status updated), ready to
/// be staged as a store update and applied to the book.
#[derive(Debug, Clone)]
pub struct Fill {
    pub maker: Order,
    pub price: u64,
    pub quantity: u64,
}

/// The outcome of walking the book for one incoming order, before anything
/// has been mutated or persisted.
#[derive(Debug)]
pub struct MatchPlan {
    pub fills: Vec<Fill>,
    pub taker_remaining: u64,
}

/// An [`OrderBook`] holds the **active** limit orders for one symbol, split
/// into a bid [`BookSide`] and an ask [`BookSide`].
///
/// Matching is two-phase so the persistence coordinator can commit before
/// anything becomes visible:
/// 1. [`OrderBook::plan_match`] walks the opposite side read-only and returns
///    a [`MatchPlan`] — the book is untouched, so a failed commit costs nothing.
/// 2. [`OrderBook::apply_fills`] replays the plan against the book once the
///    store transaction has committed.
pub struct OrderBook {
    bids: BookSide,
    asks: BookSide,
}

impl OrderBook {
    /// Creates a new, empty [`OrderBook`], with no active bids or asks.
    pub fn new() -> Self {
        Self {
            bids: BookSide::new(Side::Buy),
            asks: BookSide::new(Side::Sell),
        }
    }

    pub fn side(&self, side: Side) -> &BookSide {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut BookSide {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    /// Walk the side opposite `taker` best-price-first and compute the fills
    /// it would receive, without mutating the book.
    ///
    /// - A limit taker stops at the first non-marketable level (incoming buy:
    ///   level price above its limit; incoming sell: level price below it).
    ///   Levels are visited best-first, so nothing past that can cross either.
    /// - A market taker takes every level until it is satisfied or the side
    ///   is exhausted.
    /// - Within a level, makers are consumed strictly in arrival order, each
    ///   fill `min(taker remaining, maker remaining)` at the **maker's** price.
    pub fn plan_match(&self, taker: &Order) -> MatchPlan {
        let opposite = self.side(taker.side.opposite());
        let mut remaining = taker.remaining_quantity;
        let mut fills = Vec::new();

        'outer: for (&price, level) in opposite.levels_best_first() {
            if remaining == 0 {
                break;
            }
            if let (OrderType::Limit, Some(limit)) = (taker.order_type, taker.price) {
                let marketable = match taker.side {
                    Side::Buy => price <= limit,
                    Side::Sell => price >= limit,
                };
                if !marketable {
                    break;
                }
            }
            for resting in level {
                if remaining == 0 {
                    break 'outer;
                }
                let quantity = remaining.min(resting.remaining_quantity);
                let mut maker = resting.clone();
                maker.remaining_quantity -= quantity;
                if maker.remaining_quantity == 0 {
                    maker.status = OrderStatus::Filled;
                }
                remaining -= quantity;
                fills.push(Fill {
                    maker,
                    price,
                    quantity,
                });
            }
        }

        MatchPlan {
            fills,
            taker_remaining: remaining,
        }
    }

    /// Replay a committed plan against the book: decrement or pop each maker
    /// in order, pruning levels as they empty.
    ///
    /// Must be called with the same book state `plan_match` saw; the
    /// per-symbol lock guarantees that.
    pub fn apply_fills(&mut self, taker_side: Side, fills: &[Fill]) {
        let opposite = self.side_mut(taker_side.opposite());
        for fill in fills {
            opposite.consume(fill.price, &fill.maker);
        }
    }

    /// Rest an open limit order on its own side at its own price.
    pub fn insert(&mut self, order: Order) {
        self.side_mut(order.side).insert(order);
    }

    /// Remove a resting order by identity (used by cancellation).
    pub fn remove(&mut self, order: &Order) -> bool {
        match order.price {
            Some(price) => self.side_mut(order.side).remove(price, order.id),
            None => false,
        }
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

//tests
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn sample_limit_order(id: u64, side: Side, price: u64, quantity: u64) -> Order {
        Order {
            id,
            symbol: "BTC-USD".into(),
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            initial_quantity: quantity,
            remaining_quantity: quantity,
            status: OrderStatus::Open,
            created_at: SystemTime::now(),
        }
    }

    fn sample_market_order(id: u64, side: Side, quantity: u64) -> Order {
        Order {
            id,
            symbol: "BTC-USD".into(),
            side,
            order_type: OrderType::Market,
            price: None,
            initial_quantity: quantity,
            remaining_quantity: quantity,
            status: OrderStatus::Open,
            created_at: SystemTime::now(),
        }
    }

    /// Plan, apply, and rest the remainder — what the engine does around the
    /// store commit, minus the store.
    fn match_order(ob: &mut OrderBook, taker: Order) -> MatchPlan {
        let plan = ob.plan_match(&taker);
        ob.apply_fills(taker.side, &plan.fills);
        if taker.order_type == OrderType::Limit && plan.taker_remaining > 0 {
            let mut rest = taker;
            rest.remaining_quantity = plan.taker_remaining;
            ob.insert(rest);
        }
        plan
    }

    /// Tests a market buy order that partially fills against multiple sell orders.
    #[test]
    fn test_partial_fill_market_buy() {
        let mut ob = OrderBook::new();

        ob.insert(sample_limit_order(1, Side::Sell, 101, 5));
        ob.insert(sample_limit_order(2, Side::Sell, 102, 3));

        let plan = match_order(&mut ob, sample_market_order(100, Side::Buy, 6));

        assert_eq!(plan.fills.len(), 2);
        assert_eq!(plan.fills[0].quantity, 5);
        assert_eq!(plan.fills[0].price, 101);
        assert_eq!(plan.fills[1].quantity, 1);
        assert_eq!(plan.fills[1].price, 102);
        assert_eq!(plan.taker_remaining, 0);

        // the partially filled maker stays at the front with reduced quantity
        assert_eq!(ob.side(Side::Sell).best_price(), Some(102));
        let plan = ob.plan_match(&sample_market_order(101, Side::Buy, 10));
        assert_eq!(plan.fills[0].quantity, 2);
    }

    /// Tests a market sell order that partially fills against a smaller bid.
    #[test]
    fn test_partial_fill_market_sell() {
        let mut ob = OrderBook::new();

        ob.insert(sample_limit_order(1, Side::Buy, 100, 4));

        let plan = match_order(&mut ob, sample_market_order(200, Side::Sell, 10));

        assert_eq!(plan.fills.len(), 1);
        assert_eq!(plan.fills[0].quantity, 4);
        assert_eq!(plan.fills[0].price, 100);
        assert_eq!(plan.taker_remaining, 6);
        assert!(ob.side(Side::Buy).is_empty());
    }

    /// Tests that a market order does not match when there is no liquidity.
    #[test]
    fn test_no_match_for_market_order() {
        let mut ob = OrderBook::new();

        let plan = match_order(&mut ob, sample_market_order(300, Side::Buy, 10));

        assert!(plan.fills.is_empty());
        assert_eq!(plan.taker_remaining, 10);
        // market leftovers never rest
        assert!(ob.side(Side::Buy).is_empty());
        assert!(ob.side(Side::Sell).is_empty());
    }

    /// Tests a market order that exactly matches an available quantity.
    #[test]
    fn test_exact_match_market_order() {
        let mut ob = OrderBook::new();

        ob.insert(sample_limit_order(1, Side::Sell, 100, 5));
        let plan = match_order(&mut ob, sample_market_order(400, Side::Buy, 5));

        assert_eq!(plan.fills.len(), 1);
        assert_eq!(plan.fills[0].quantity, 5);
        assert_eq!(plan.fills[0].maker.status, OrderStatus::Filled);
        assert!(ob.side(Side::Sell).is_empty());
    }

    /// Tests a limit buy order that partially fills and rests the remainder.
    #[test]
    fn test_limit_order_partial_match_and_remainder() {
        let mut ob = OrderBook::new();

        ob.insert(sample_limit_order(1, Side::Sell, 100, 5));

        let plan = match_order(&mut ob, sample_limit_order(2, Side::Buy, 101, 10));

        assert_eq!(plan.fills.len(), 1);
        assert_eq!(plan.fills[0].quantity, 5);
        assert_eq!(ob.side(Side::Buy).best_price(), Some(101));
        // the rested remainder carries only the unfilled quantity
        let follow_up = ob.plan_match(&sample_market_order(3, Side::Sell, 10));
        assert_eq!(follow_up.fills[0].quantity, 5);
    }

    /// Tests a limit buy order that finds no match and gets added to the book.
    #[test]
    fn test_limit_order_no_match_goes_to_book() {
        let mut ob = OrderBook::new();

        let plan = match_order(&mut ob, sample_limit_order(10, Side::Buy, 90, 8));

        assert!(plan.fills.is_empty());
        assert_eq!(ob.side(Side::Buy).best_price(), Some(90));
    }

    /// Tests that a resting order on the same side is never matched against.
    #[test]
    fn test_same_side_orders_do_not_match() {
        let mut ob = OrderBook::new();

        ob.insert(sample_limit_order(1, Side::Buy, 100, 2));
        let plan = match_order(&mut ob, sample_limit_order(2, Side::Buy, 100, 5));

        assert!(plan.fills.is_empty());
        // both rest at 100, FIFO preserved
        let hit = ob.plan_match(&sample_market_order(3, Side::Sell, 3));
        assert_eq!(hit.fills[0].maker.id, 1);
        assert_eq!(hit.fills[1].maker.id, 2);
    }

    /// Tests that FIFO order is respected for multiple orders at the same price.
    #[test]
    fn test_queue_fairness_fifo_fill_order() {
        let mut ob = OrderBook::new();

        ob.insert(sample_limit_order(1, Side::Sell, 100, 4));
        ob.insert(sample_limit_order(2, Side::Sell, 100, 6));

        let plan = match_order(&mut ob, sample_market_order(3, Side::Buy, 9));

        assert_eq!(plan.fills.len(), 2);
        assert_eq!(plan.fills[0].maker.id, 1);
        assert_eq!(plan.fills[0].quantity, 4);
        assert_eq!(plan.fills[1].maker.id, 2);
        assert_eq!(plan.fills[1].quantity, 5);

        let remaining = ob.plan_match(&sample_market_order(4, Side::Buy, 10));
        assert_eq!(remaining.fills[0].maker.id, 2);
        assert_eq!(remaining.fills[0].quantity, 1);
    }

    /// Price priority dominates arrival order across levels.
    #[test]
    fn test_price_priority_beats_arrival_order() {
        let mut ob = OrderBook::new();

        // worse ask arrives first
        ob.insert(sample_limit_order(1, Side::Sell, 105, 5));
        ob.insert(sample_limit_order(2, Side::Sell, 101, 5));

        let plan = ob.plan_match(&sample_market_order(3, Side::Buy, 5));
        assert_eq!(plan.fills[0].maker.id, 2);
        assert_eq!(plan.fills[0].price, 101);
    }

    /// Tests that a limit buy above the ask price matches immediately (crossing).
    #[test]
    fn test_price_level_collision_limit_buy_matches_instead_of_resting() {
        let mut ob = OrderBook::new();

        ob.insert(sample_limit_order(1, Side::Sell, 105, 5));

        let plan = match_order(&mut ob, sample_limit_order(2, Side::Buy, 110, 3));

        assert_eq!(plan.fills.len(), 1);
        // trade executes at the maker's price, not the taker's limit
        assert_eq!(plan.fills[0].price, 105);
        assert_eq!(plan.fills[0].quantity, 3);
        assert!(ob.side(Side::Buy).is_empty());
    }

    /// Tests that a limit sell below the bid price matches immediately (crossing).
    #[test]
    fn test_price_level_collision_limit_sell_matches_instead_of_resting() {
        let mut ob = OrderBook::new();

        ob.insert(sample_limit_order(1, Side::Buy, 100, 5));

        let plan = match_order(&mut ob, sample_limit_order(2, Side::Sell, 90, 4));

        assert_eq!(plan.fills.len(), 1);
        assert_eq!(plan.fills[0].price, 100);
        assert_eq!(plan.fills[0].quantity, 4);
        assert!(ob.side(Side::Sell).is_empty());
    }

    /// A limit taker stops at the first non-marketable level even with
    /// liquidity further down.
    #[test]
    fn test_limit_taker_respects_its_price() {
        let mut ob = OrderBook::new();

        ob.insert(sample_limit_order(1, Side::Sell, 100, 2));
        ob.insert(sample_limit_order(2, Side::Sell, 103, 2));

        let plan = match_order(&mut ob, sample_limit_order(3, Side::Buy, 101, 5));

        assert_eq!(plan.fills.len(), 1);
        assert_eq!(plan.fills[0].price, 100);
        assert_eq!(plan.taker_remaining, 3);
        // the 103 ask is untouched, the remainder rests at 101
        assert_eq!(ob.side(Side::Sell).best_price(), Some(103));
        assert_eq!(ob.side(Side::Buy).best_price(), Some(101));
    }

    #[test]
    fn test_cancel_existing_order() {
        let mut ob = OrderBook::new();
        let order = sample_limit_order(42, Side::Buy, 101, 10);
        ob.insert(order.clone());

        assert!(ob.remove(&order));
        // emptied level is pruned
        assert!(ob.side(Side::Buy).is_empty());
    }

    #[test]
    fn test_cancel_nonexistent_order() {
        let mut ob = OrderBook::new();
        ob.insert(sample_limit_order(1, Side::Sell, 99, 5));

        let ghost = sample_limit_order(999, Side::Sell, 99, 5);
        assert!(!ob.remove(&ghost));
        // the resting order is untouched
        assert_eq!(ob.side(Side::Sell).best_price(), Some(99));
    }

    /// plan_match alone must leave the book untouched, so a failed store
    /// commit has no in-memory effect.
    #[test]
    fn test_planning_does_not_mutate_book() {
        let mut ob = OrderBook::new();
        ob.insert(sample_limit_order(1, Side::Sell, 100, 5));

        let plan = ob.plan_match(&sample_market_order(2, Side::Buy, 5));
        assert_eq!(plan.fills.len(), 1);

        // still fully available
        let again = ob.plan_match(&sample_market_order(3, Side::Buy, 5));
        assert_eq!(again.fills.len(), 1);
        assert_eq!(again.fills[0].quantity, 5);
        assert_eq!(ob.side(Side::Sell).best_price(), Some(100));
    }
}
