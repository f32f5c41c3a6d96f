use thiserror::Error;

use crate::store::StoreError;

/// Failure modes surfaced by [`crate::engine::Engine`].
///
/// Validation errors are raised before any shared state is touched; a
/// `Store` error means the transaction did not commit and the in-memory
/// book was left exactly as it was.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid order: {0}")]
    InvalidOrder(&'static str),

    #[error("order {0} not found")]
    OrderNotFound(u64),

    #[error("order {0} is not open")]
    OrderNotOpen(u64),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type EngineResult<T> = Result<T, EngineError>;
