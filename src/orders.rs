use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Represents which side of the market the order is on.
///
/// # Intuition
/// - `Buy` (Bid): The trader wants to purchase the asset. Buy orders are sorted from **highest to lowest price**
///   because a higher price means more willingness to buy — i.e., more aggressive.
/// - `Sell` (Ask): The trader wants to sell the asset. Sell orders are sorted from **lowest to highest price**
///   because a lower price means more willingness to sell — i.e., more aggressive.
///
/// This sorting ensures the matching engine always finds the **best price first**:
/// - Buyers match with the **lowest ask**
/// - Sellers match with the **highest bid**
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub enum Side {
    Buy,  // Bid
    Sell, // Ask
}

impl Side {
    /// The side an incoming order matches against: buys consume asks, sells consume bids.
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Specifies whether an order is a Limit or Market order.
///
/// - `Limit`: Executes at a specific price or better
/// - `Market`: Executes immediately at the best available price
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub enum OrderType {
    Limit,
    Market,
}

/// Lifecycle state of an order.
///
/// Transitions are one-way: `Open` -> `Filled` or `Open` -> `Canceled`,
/// and both of those are terminal. A market order that cannot fully execute
/// ends up `Canceled` for the leftover — it never rests in the book.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub enum OrderStatus {
    Open,
    Filled,
    Canceled,
}

/// An order submitted by a trader.
///
/// - `id` is assigned by the engine from a monotonic counter, so ids double
///   as arrival order and are never reused
/// - `price` is `None` for market orders (there is no sentinel price)
/// - `remaining_quantity` only ever decreases; `initial_quantity` is fixed
///   at placement so fills can be audited against it
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Order {
    pub id: u64,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Option<u64>,
    pub initial_quantity: u64,
    pub remaining_quantity: u64,
    pub status: OrderStatus,
    pub created_at: SystemTime,
}

impl Order {
    pub fn is_open(&self) -> bool {
        self.status == OrderStatus::Open
    }
}
