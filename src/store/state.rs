//! Structured state documents (character, relationship, outfit) and the
//! `static_persona` memories mirrored from their traits.

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use super::memories::replace_memories_of_kind;
use super::now_timestamp;
use super::personas::get_persona;
use super::types::{FullData, MemoryKind, PersonaState, StateDocument, StateKind};

/// Outcome of [`upsert_state`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StateUpsert {
    pub traits_changed: bool,
    /// `static_persona` memories deleted by the regeneration.
    pub removed_memories: Vec<i64>,
    /// `static_persona` memories inserted by the regeneration.
    pub inserted_memories: Vec<i64>,
}

pub fn get_state(
    conn: &Connection,
    persona_id: &str,
    kind: StateKind,
) -> Result<Option<StateDocument>> {
    let raw: Option<String> = conn
        .query_row(
            &format!("SELECT data FROM {} WHERE persona_id = ?1", kind.table()),
            params![persona_id],
            |row| row.get(0),
        )
        .optional()?;

    raw.map(|raw| {
        serde_json::from_str(&raw)
            .with_context(|| format!("corrupt {kind} document for persona {persona_id}"))
    })
    .transpose()
}

/// All three state documents of a persona, read fresh.
pub fn load_states(conn: &Connection, persona_id: &str) -> Result<PersonaState> {
    let mut state = PersonaState::default();
    for kind in StateKind::ALL {
        state.set(kind, get_state(conn, persona_id, kind)?);
    }
    Ok(state)
}

/// Trait texts of every document, in character, relationship, outfit order.
pub fn persona_traits(state: &PersonaState) -> Vec<String> {
    StateKind::ALL
        .iter()
        .filter_map(|kind| state.get(*kind))
        .flat_map(|doc| doc.dynamic_traits.iter())
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn write_state(
    conn: &Connection,
    persona_id: &str,
    kind: StateKind,
    doc: &StateDocument,
) -> Result<()> {
    let data = serde_json::to_string(doc)?;
    conn.execute(
        &format!(
            "INSERT INTO {} (persona_id, data, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(persona_id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            kind.table()
        ),
        params![persona_id, data, now_timestamp()],
    )?;
    Ok(())
}

/// Last-write-wins upsert of one state document.
///
/// When the document's `dynamic_traits` differ from the stored ones, the
/// persona's `static_persona` memories are regenerated from all three
/// documents in the same transaction.
pub fn upsert_state(
    conn: &mut Connection,
    persona_id: &str,
    kind: StateKind,
    doc: &StateDocument,
) -> Result<StateUpsert> {
    let tx = conn.transaction()?;

    if get_persona(&tx, persona_id)?.is_none() {
        bail!("persona not found: {persona_id}");
    }

    let previous = get_state(&tx, persona_id, kind)?;
    let traits_changed = previous.map(|p| p.dynamic_traits).unwrap_or_default() != doc.dynamic_traits;

    write_state(&tx, persona_id, kind, doc)?;

    let mut outcome = StateUpsert {
        traits_changed,
        ..Default::default()
    };
    if traits_changed {
        let traits = persona_traits(&load_states(&tx, persona_id)?);
        let (removed, inserted) =
            replace_memories_of_kind(&tx, persona_id, MemoryKind::StaticPersona, &traits)?;
        outcome.removed_memories = removed;
        outcome.inserted_memories = inserted;
    }

    tx.commit()?;

    tracing::debug!(
        persona_id,
        kind = %kind,
        traits_changed,
        "state document stored"
    );
    Ok(outcome)
}

/// Regenerate a persona's `static_persona` memories from its current state,
/// atomically. Returns `(removed_ids, inserted_ids)`.
pub fn replace_persona_trait_memories(
    conn: &mut Connection,
    persona_id: &str,
) -> Result<(Vec<i64>, Vec<i64>)> {
    let tx = conn.transaction()?;
    let traits = persona_traits(&load_states(&tx, persona_id)?);
    let result = replace_memories_of_kind(&tx, persona_id, MemoryKind::StaticPersona, &traits)?;
    tx.commit()?;
    Ok(result)
}

/// Persona plus its state documents, or `None` for an unknown persona.
pub fn full_data(conn: &Connection, persona_id: &str) -> Result<Option<FullData>> {
    let Some(persona) = get_persona(conn, persona_id)? else {
        return Ok(None);
    };
    let state = load_states(conn, persona_id)?;
    Ok(Some(FullData {
        persona,
        character: state.character,
        relationship: state.relationship,
        outfit: state.outfit,
    }))
}
