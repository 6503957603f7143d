//! Synchronous operations on the `memories_vec` table.
//!
//! The table is created the first time a vector of known dimensionality is
//! written. Until then every read behaves as an empty index.

use std::collections::HashSet;

use anyhow::{bail, Result};
use rusqlite::{params, params_from_iter, Connection};
use serde::Serialize;

use crate::db::migrations::{get_embedding_dim, set_embedding_dim, set_embedding_model};
use crate::db::schema::{create_vec_table, vec_table_exists};
use crate::embedding::embedding_to_bytes;
use crate::store::memories::MAX_IDS_PER_QUERY;

/// One nearest-neighbour result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub memory_id: i64,
    /// Cosine distance; lower is more similar.
    pub distance: f64,
}

/// Create the vector table for `dim` if it does not exist yet.
///
/// Fails if the table already exists with a different dimensionality.
pub fn ensure_table(conn: &Connection, dim: usize, model: &str) -> Result<()> {
    match get_embedding_dim(conn)? {
        Some(existing) if existing != dim => {
            bail!(
                "vector index was built with {existing} dimensions but the embedder returns {dim}; \
                 run `reverie reindex --rebuild`"
            );
        }
        Some(_) if vec_table_exists(conn)? => return Ok(()),
        _ => {}
    }

    create_vec_table(conn, dim)?;
    set_embedding_dim(conn, dim)?;
    set_embedding_model(conn, model)?;
    tracing::info!(dim, model, "vector index created");
    Ok(())
}

/// Drop the vector table and forget its dimensionality.
pub fn drop_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "DROP TABLE IF EXISTS memories_vec;
         DELETE FROM schema_meta WHERE key IN ('embedding_dim', 'embedding_model');",
    )?;
    Ok(())
}

/// Insert or replace the vector for one memory.
pub fn upsert_vector(
    conn: &mut Connection,
    persona_id: &str,
    memory_id: i64,
    embedding: &[f32],
) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM memories_vec WHERE memory_id = ?1",
        params![memory_id],
    )?;
    tx.execute(
        "INSERT INTO memories_vec (memory_id, persona_id, embedding) VALUES (?1, ?2, ?3)",
        params![memory_id, persona_id, embedding_to_bytes(embedding)],
    )?;
    tx.commit()?;
    Ok(())
}

/// K nearest neighbours of `query` within one persona's partition, ordered
/// by ascending distance then ascending memory id.
pub fn search_vectors(
    conn: &Connection,
    persona_id: &str,
    query: &[f32],
    k: usize,
) -> Result<Vec<SearchHit>> {
    if k == 0 || !vec_table_exists(conn)? {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT memory_id, distance FROM memories_vec \
         WHERE embedding MATCH ?1 AND k = ?2 AND persona_id = ?3 \
         ORDER BY distance",
    )?;
    let mut hits = stmt
        .query_map(
            params![embedding_to_bytes(query), k as i64, persona_id],
            |row| {
                Ok(SearchHit {
                    memory_id: row.get(0)?,
                    distance: row.get(1)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    hits.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then(a.memory_id.cmp(&b.memory_id))
    });
    Ok(hits)
}

/// Remove vectors by memory id. Returns the number of rows removed.
pub fn delete_vectors(conn: &Connection, memory_ids: &[i64]) -> Result<usize> {
    if memory_ids.is_empty() || !vec_table_exists(conn)? {
        return Ok(0);
    }
    let mut removed = 0;
    for chunk in memory_ids.chunks(MAX_IDS_PER_QUERY) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        removed += conn.execute(
            &format!("DELETE FROM memories_vec WHERE memory_id IN ({placeholders})"),
            params_from_iter(chunk.iter()),
        )?;
    }
    Ok(removed)
}

/// Every memory id that currently has a vector.
pub fn indexed_ids(conn: &Connection) -> Result<HashSet<i64>> {
    if !vec_table_exists(conn)? {
        return Ok(HashSet::new());
    }
    let mut stmt = conn.prepare("SELECT memory_id FROM memories_vec")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<HashSet<i64>, _>>()?;
    Ok(ids)
}

pub fn indexed_count_for_persona(conn: &Connection, persona_id: &str) -> Result<usize> {
    if !vec_table_exists(conn)? {
        return Ok(0);
    }
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM memories_vec WHERE persona_id = ?1",
        params![persona_id],
        |row| row.get(0),
    )?;
    Ok(n as usize)
}
