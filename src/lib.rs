pub mod api;
pub mod cli;
pub mod engine;
pub mod errors;
pub mod orderbook;
pub mod orders;
pub mod state;
pub mod store;
pub mod trade;
pub mod utils;
