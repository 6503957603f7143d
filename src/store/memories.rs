//! The memory log: append-only facts that the vector index mirrors.

use std::collections::HashMap;

use anyhow::Result;
use rusqlite::{params, params_from_iter, Connection};

use super::now_timestamp;
use super::types::{Memory, MemoryKind};

/// Append one memory row. Returns its id.
pub fn append_memory(
    conn: &Connection,
    persona_id: &str,
    kind: MemoryKind,
    content: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO memories (persona_id, type, content, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![persona_id, kind.as_str(), content, now_timestamp()],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Upper bound on ids bound into one `IN (...)` list. SQLite rejects
/// statements with more than 32766 variables.
pub(crate) const MAX_IDS_PER_QUERY: usize = 500;

/// Fetch memories by id, optionally restricted to a set of kinds.
///
/// Unknown ids are simply absent from the returned map.
pub fn list_memories(
    conn: &Connection,
    ids: &[i64],
    kinds: Option<&[MemoryKind]>,
) -> Result<HashMap<i64, Memory>> {
    if ids.is_empty() || kinds.is_some_and(|k| k.is_empty()) {
        return Ok(HashMap::new());
    }

    let mut out = HashMap::with_capacity(ids.len());
    for chunk in ids.chunks(MAX_IDS_PER_QUERY) {
        load_chunk(conn, chunk, kinds, &mut out)?;
    }
    Ok(out)
}

fn load_chunk(
    conn: &Connection,
    ids: &[i64],
    kinds: Option<&[MemoryKind]>,
    out: &mut HashMap<i64, Memory>,
) -> Result<()> {
    let placeholders = vec!["?"; ids.len()].join(", ");
    let mut sql = format!(
        "SELECT id, persona_id, type, content, created_at FROM memories WHERE id IN ({placeholders})"
    );
    let mut values: Vec<rusqlite::types::Value> =
        ids.iter().map(|id| rusqlite::types::Value::Integer(*id)).collect();

    if let Some(kinds) = kinds {
        sql.push_str(&format!(" AND type IN ({})", vec!["?"; kinds.len()].join(", ")));
        values.extend(
            kinds
                .iter()
                .map(|k| rusqlite::types::Value::Text(k.as_str().to_string())),
        );
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (id, persona_id, kind, content, created_at) in rows {
        let kind = kind.parse::<MemoryKind>().map_err(anyhow::Error::msg)?;
        out.insert(
            id,
            Memory {
                id,
                persona_id,
                kind,
                content,
                created_at,
            },
        );
    }
    Ok(())
}

/// Every memory id in the store, ascending.
pub fn all_memory_ids(conn: &Connection) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT id FROM memories ORDER BY id")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(ids)
}

pub fn memory_ids_for_persona(conn: &Connection, persona_id: &str) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT id FROM memories WHERE persona_id = ?1 ORDER BY id")?;
    let ids = stmt
        .query_map(params![persona_id], |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(ids)
}

/// Delete every memory of `kind` for the persona and insert `contents` in
/// their place. Does not open a transaction; callers pass one in.
///
/// Returns `(removed_ids, inserted_ids)`.
pub(crate) fn replace_memories_of_kind(
    conn: &Connection,
    persona_id: &str,
    kind: MemoryKind,
    contents: &[String],
) -> Result<(Vec<i64>, Vec<i64>)> {
    let removed = {
        let mut stmt =
            conn.prepare("SELECT id FROM memories WHERE persona_id = ?1 AND type = ?2 ORDER BY id")?;
        let ids = stmt
            .query_map(params![persona_id, kind.as_str()], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        ids
    };
    conn.execute(
        "DELETE FROM memories WHERE persona_id = ?1 AND type = ?2",
        params![persona_id, kind.as_str()],
    )?;

    let mut inserted = Vec::with_capacity(contents.len());
    for content in contents {
        inserted.push(append_memory(conn, persona_id, kind, content)?);
    }
    Ok((removed, inserted))
}
