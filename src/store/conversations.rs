//! Conversation turns: append, list, reset, and the per-exchange write.

use anyhow::{bail, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use super::memories::append_memory;
use super::now_timestamp;
use super::types::{ChatSummary, MemoryKind, Role, Turn};

/// Append a single turn. Returns the new turn id.
pub fn append_turn(conn: &Connection, persona_id: &str, role: Role, content: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO conversations (persona_id, role, content, timestamp) VALUES (?1, ?2, ?3, ?4)",
        params![persona_id, role.as_str(), content, now_timestamp()],
    )?;
    Ok(conn.last_insert_rowid())
}

/// All turns of a persona, oldest first. Equal timestamps keep insertion order.
pub fn list_turns(conn: &Connection, persona_id: &str) -> Result<Vec<Turn>> {
    let mut stmt = conn.prepare(
        "SELECT id, role, content, timestamp FROM conversations \
         WHERE persona_id = ?1 ORDER BY timestamp ASC, id ASC",
    )?;
    let turns = stmt
        .query_map(params![persona_id], |row| {
            let role: String = row.get(1)?;
            Ok((row.get::<_, i64>(0)?, role, row.get::<_, String>(2)?, row.get::<_, String>(3)?))
        })?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|(id, role, content, timestamp)| {
            let role = role.parse::<Role>().map_err(anyhow::Error::msg)?;
            Ok(Turn { id, role, content, timestamp })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(turns)
}

/// Delete every turn of the persona and re-insert its introduction as the
/// single remaining `assistant` turn, atomically.
pub fn reset_conversation(conn: &mut Connection, persona_id: &str) -> Result<()> {
    let tx = conn.transaction()?;

    let introduction: Option<String> = tx
        .query_row(
            "SELECT introduction FROM personas WHERE id = ?1",
            params![persona_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(introduction) = introduction else {
        bail!("persona not found: {persona_id}");
    };

    let deleted = tx.execute(
        "DELETE FROM conversations WHERE persona_id = ?1",
        params![persona_id],
    )?;
    append_turn(&tx, persona_id, Role::Assistant, &introduction)?;
    tx.commit()?;

    tracing::info!(persona_id, deleted, "conversation reset");
    Ok(())
}

/// Persist one completed exchange: the user turn, the assistant turn and the
/// `conversation` memory that summarizes both. Returns the memory id.
pub fn record_exchange(
    conn: &mut Connection,
    persona_id: &str,
    user_text: &str,
    assistant_text: &str,
    memory_text: &str,
) -> Result<i64> {
    let tx: Transaction = conn.transaction()?;
    append_turn(&tx, persona_id, Role::User, user_text)?;
    append_turn(&tx, persona_id, Role::Assistant, assistant_text)?;
    let memory_id = append_memory(&tx, persona_id, MemoryKind::Conversation, memory_text)?;
    tx.commit()?;
    Ok(memory_id)
}

/// Personas the user has written to at least once, each with its latest
/// turn, most recent first.
pub fn list_chats(conn: &Connection) -> Result<Vec<ChatSummary>> {
    let mut stmt = conn.prepare(
        "SELECT p.id, p.name, p.label, p.image, c.content, c.role, c.timestamp \
         FROM personas p \
         JOIN conversations c ON c.id = ( \
             SELECT id FROM conversations WHERE persona_id = p.id \
             ORDER BY timestamp DESC, id DESC LIMIT 1) \
         WHERE EXISTS (SELECT 1 FROM conversations WHERE persona_id = p.id AND role = 'user') \
         ORDER BY c.timestamp DESC, c.id DESC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(persona_id, name, label, image, last_message, role, last_timestamp)| {
            Ok(ChatSummary {
                persona_id,
                name,
                label,
                image,
                last_message,
                last_role: role.parse().map_err(anyhow::Error::msg)?,
                last_timestamp,
            })
        })
        .collect()
}
