//! Keeps the vector index in step with the memory log.
//!
//! Indexing is best effort: embedding or index failures are logged at warn
//! and leave the memory unindexed until the next reconciliation.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::task::JoinHandle;

use super::{vectors, VectorIndex};
use crate::embedding::Embedder;
use crate::error::Result;
use crate::store::memories::{all_memory_ids, list_memories, memory_ids_for_persona, MAX_IDS_PER_QUERY};
use crate::store::types::Memory;
use crate::store::Store;

/// Counts from one reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub total: usize,
    pub already_indexed: usize,
    pub upserted: usize,
    /// Memories left unindexed because embedding or the index failed.
    pub skipped: usize,
    /// Vectors removed again because their memory was deleted mid-pass.
    pub dropped: usize,
}

#[derive(Clone)]
pub struct MemoryIndexer {
    store: Store,
    index: VectorIndex,
    embedder: Arc<dyn Embedder>,
    /// Personas with a background rebuild in flight.
    rebuilding: Arc<Mutex<HashSet<String>>>,
}

impl MemoryIndexer {
    pub fn new(store: Store, index: VectorIndex, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            index,
            embedder,
            rebuilding: Arc::default(),
        }
    }

    /// Embed and upsert one memory.
    async fn embed_and_upsert(&self, memory: &Memory) -> Result<()> {
        let vector = self.embedder.embed(&memory.content).await?;
        self.index.ensure(vector.len(), self.embedder.model()).await?;
        self.index.upsert(&memory.persona_id, memory.id, vector).await
    }

    /// Index the given memories, skipping ids that are already indexed.
    ///
    /// Memories are loaded in chunks. Stops at the first failure; the rest
    /// are counted as skipped. `on_progress` receives `(done, pending)` after
    /// every memory.
    async fn index_missing(
        &self,
        ids: Vec<i64>,
        on_progress: &(dyn Fn(usize, usize) + Send + Sync),
    ) -> Result<ReconcileReport> {
        let indexed = self.index.indexed_ids().await?;
        let total = ids.len();
        let pending: Vec<i64> = ids.into_iter().filter(|id| !indexed.contains(id)).collect();
        let mut report = ReconcileReport {
            total,
            already_indexed: total - pending.len(),
            ..Default::default()
        };

        let mut done = 0;
        for chunk in pending.chunks(MAX_IDS_PER_QUERY) {
            let lookup = chunk.to_vec();
            let mut memories = self
                .store
                .run(move |conn| list_memories(conn, &lookup, None))
                .await?;

            let mut written = Vec::with_capacity(chunk.len());
            let mut stopped = false;
            for id in chunk {
                done += 1;
                let Some(memory) = memories.remove(id) else {
                    continue;
                };
                if let Err(e) = self.embed_and_upsert(&memory).await {
                    report.skipped = pending.len() - (done - 1);
                    tracing::warn!(
                        memory_id = memory.id,
                        error = %e,
                        skipped = report.skipped,
                        "indexing stopped"
                    );
                    stopped = true;
                    break;
                }
                written.push(memory.id);
                on_progress(done, pending.len());
            }

            let dropped = self.drop_orphans(written.clone()).await?;
            report.upserted += written.len() - dropped;
            report.dropped += dropped;
            if stopped {
                break;
            }
        }
        Ok(report)
    }

    /// Remove the vectors among `written` whose memory row no longer exists,
    /// e.g. a trait memory regenerated while its vector was being written.
    async fn drop_orphans(&self, written: Vec<i64>) -> Result<usize> {
        if written.is_empty() {
            return Ok(0);
        }
        let dropped = self
            .store
            .run(move |conn| {
                let live = list_memories(conn, &written, None)?;
                let gone: Vec<i64> = written.into_iter().filter(|id| !live.contains_key(id)).collect();
                vectors::delete_vectors(conn, &gone)
            })
            .await?;
        if dropped > 0 {
            tracing::debug!(dropped, "dropped vectors of deleted memories");
        }
        Ok(dropped)
    }

    /// Index every memory row that has no vector yet.
    ///
    /// Already-indexed ids are never re-embedded, so a second pass with no
    /// new memories upserts nothing.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.reconcile_with_progress(&|_, _| {}).await
    }

    pub async fn reconcile_with_progress(
        &self,
        on_progress: &(dyn Fn(usize, usize) + Send + Sync),
    ) -> Result<ReconcileReport> {
        let ids = self.store.run(|conn| all_memory_ids(conn)).await?;
        let report = self.index_missing(ids, on_progress).await?;
        tracing::info!(
            total = report.total,
            already_indexed = report.already_indexed,
            upserted = report.upserted,
            skipped = report.skipped,
            dropped = report.dropped,
            "vector index reconciled"
        );
        Ok(report)
    }

    /// Index a persona's memories if none of them are indexed yet. Returns
    /// the number of vectors written.
    pub async fn rebuild_if_empty(&self, persona_id: &str) -> Result<usize> {
        if self.index.count_for_persona(persona_id).await? > 0 {
            return Ok(0);
        }
        let owned = persona_id.to_string();
        let ids = self
            .store
            .run(move |conn| memory_ids_for_persona(conn, &owned))
            .await?;
        if ids.is_empty() {
            return Ok(0);
        }
        let report = self.index_missing(ids, &|_, _| {}).await?;
        if report.upserted > 0 {
            tracing::info!(persona_id, upserted = report.upserted, "persona index rebuilt");
        }
        Ok(report.upserted)
    }

    /// Index the given memories and drop the vectors of `removed` on a
    /// background task. Failures are logged, never returned.
    pub fn spawn_sync(&self, removed: Vec<i64>, inserted: Vec<i64>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            if !removed.is_empty() {
                if let Err(e) = this.index.remove(removed).await {
                    tracing::warn!(error = %e, "failed to drop stale vectors");
                }
            }
            if inserted.is_empty() {
                return;
            }
            match this.index_missing(inserted, &|_, _| {}).await {
                Ok(report) => {
                    tracing::debug!(upserted = report.upserted, skipped = report.skipped, "background indexing finished")
                }
                Err(e) => tracing::warn!(error = %e, "background indexing failed"),
            }
        })
    }

    /// Rebuild a persona's index on a background task, unless one is
    /// already running for it. Returns `None` when nothing was started.
    pub fn spawn_rebuild(&self, persona_id: &str) -> Option<JoinHandle<()>> {
        match self.rebuilding.lock() {
            Ok(mut running) => {
                if !running.insert(persona_id.to_string()) {
                    return None;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "rebuild registry poisoned");
                return None;
            }
        }

        let this = self.clone();
        let persona_id = persona_id.to_string();
        Some(tokio::spawn(async move {
            if let Err(e) = this.rebuild_if_empty(&persona_id).await {
                tracing::warn!(persona_id, error = %e, "persona index rebuild failed");
            }
            if let Ok(mut running) = this.rebuilding.lock() {
                running.remove(&persona_id);
            }
        }))
    }

    /// Index a single memory in the background.
    pub fn spawn_index(&self, memory_id: i64) -> JoinHandle<()> {
        self.spawn_sync(Vec::new(), vec![memory_id])
    }

    /// The `k` memories of `persona_id` most relevant to `query`, most
    /// relevant first. Any failure yields an empty list.
    pub async fn retrieve(&self, persona_id: &str, query: &str, k: usize) -> Vec<Memory> {
        if k == 0 || query.trim().is_empty() {
            return Vec::new();
        }
        match self.try_retrieve(persona_id, query, k).await {
            Ok(memories) => memories,
            Err(e) => {
                tracing::warn!(persona_id, error = %e, "memory retrieval degraded to empty");
                Vec::new()
            }
        }
    }

    async fn try_retrieve(&self, persona_id: &str, query: &str, k: usize) -> Result<Vec<Memory>> {
        // Memories of a persona with no vectors yet are indexed off the turn;
        // this retrieval sees whatever is indexed already.
        if self.index.count_for_persona(persona_id).await? == 0 {
            self.spawn_rebuild(persona_id);
        }

        let query_vector = self.embedder.embed(query).await?;
        let hits = self.index.search(persona_id, query_vector, k).await?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = hits.iter().map(|h| h.memory_id).collect();
        let lookup = ids.clone();
        let mut memories = self
            .store
            .run(move |conn| list_memories(conn, &lookup, None))
            .await?;

        Ok(ids
            .iter()
            .filter_map(|id| memories.remove(id))
            .filter(|m| m.persona_id == persona_id)
            .collect())
    }
}
