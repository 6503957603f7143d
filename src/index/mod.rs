//! Vector index over the memory log.
//!
//! [`VectorIndex`] is the async face of [`vectors`]; every failure is
//! reported as [`Error::IndexUnavailable`]. [`MemoryIndexer`] keeps the index
//! in step with the store (reconciliation, background indexing) and runs
//! the per-turn retrieval, which never fails the caller.

pub mod indexer;
pub mod vectors;

use std::collections::HashSet;

pub use indexer::{MemoryIndexer, ReconcileReport};
pub use vectors::SearchHit;

use crate::error::{Error, Result};
use crate::store::Store;

fn unavailable(err: Error) -> Error {
    match err {
        Error::Persistence(msg) => Error::IndexUnavailable(msg),
        other => other,
    }
}

/// Handle to the `memories_vec` table, sharing the store's connection.
#[derive(Clone)]
pub struct VectorIndex {
    store: Store,
}

impl VectorIndex {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Make sure a table for `dim`-dimensional vectors exists.
    pub async fn ensure(&self, dim: usize, model: &str) -> Result<()> {
        let model = model.to_string();
        self.store
            .run(move |conn| vectors::ensure_table(conn, dim, &model))
            .await
            .map_err(unavailable)
    }

    /// Idempotent per memory id.
    pub async fn upsert(&self, persona_id: &str, memory_id: i64, embedding: Vec<f32>) -> Result<()> {
        let persona_id = persona_id.to_string();
        self.store
            .run(move |conn| vectors::upsert_vector(conn, &persona_id, memory_id, &embedding))
            .await
            .map_err(unavailable)
    }

    /// Up to `k` hits from the persona's partition, most similar first.
    pub async fn search(&self, persona_id: &str, query: Vec<f32>, k: usize) -> Result<Vec<SearchHit>> {
        let persona_id = persona_id.to_string();
        self.store
            .run(move |conn| vectors::search_vectors(conn, &persona_id, &query, k))
            .await
            .map_err(unavailable)
    }

    pub async fn remove(&self, memory_ids: Vec<i64>) -> Result<usize> {
        self.store
            .run(move |conn| vectors::delete_vectors(conn, &memory_ids))
            .await
            .map_err(unavailable)
    }

    pub async fn indexed_ids(&self) -> Result<HashSet<i64>> {
        self.store
            .run(|conn| vectors::indexed_ids(conn))
            .await
            .map_err(unavailable)
    }

    pub async fn count_for_persona(&self, persona_id: &str) -> Result<usize> {
        let persona_id = persona_id.to_string();
        self.store
            .run(move |conn| vectors::indexed_count_for_persona(conn, &persona_id))
            .await
            .map_err(unavailable)
    }

    /// Drop every vector so the next reconciliation re-embeds from scratch.
    pub async fn clear(&self) -> Result<()> {
        self.store
            .run(|conn| vectors::drop_table(conn))
            .await
            .map_err(unavailable)
    }
}
