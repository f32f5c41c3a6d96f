use crate::engine::Engine;
use crate::store::{MemoryStore, ParityStore};
use std::path::Path;
use std::sync::Arc;

/// Shared handle threaded through the axum router.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

impl AppState {
    /// Open (or create) the database at `path` and recover the books from it.
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let store = Arc::new(ParityStore::open(path)?);
        let engine = Arc::new(Engine::recover(store)?);
        Ok(Self { engine })
    }

    /// Fully in-memory state; nothing survives the process.
    pub fn ephemeral() -> anyhow::Result<Self> {
        let engine = Arc::new(Engine::recover(Arc::new(MemoryStore::new()))?);
        Ok(Self { engine })
    }
}
