use std::time::SystemTime;

/// A trade represents a matched transaction between two orders.
///
/// # Terminology
/// - **Maker**: The order that was already resting in the order book (providing liquidity).
///   - Can be either a Buy (bid) or Sell (ask) order.
/// - **Taker**: The incoming order that triggered the trade (taking liquidity).
///   - Can also be a Buy or Sell order.
///
/// # Behavior
/// - The trade always executes at the **maker's price** (book price).
/// - Partial fills may occur: multiple trades can be generated from one order.
/// - `buy_order_id` / `sell_order_id` name the buy-side and sell-side
///   participants regardless of which one was the taker: a market sell hitting
///   a resting bid yields `buy_order_id` = the resting bid.
///
/// Example:
/// - A market buy order (taker) matches a limit sell at 102 (maker).
/// - A trade is created at price 102.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize, bincode::Encode, bincode::Decode)]
pub struct Trade {
    pub id: u64,
    pub symbol: String,
    pub buy_order_id: u64,
    pub sell_order_id: u64,
    pub price: u64,
    pub quantity: u64,
    pub timestamp: SystemTime,
}
