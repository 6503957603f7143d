//! Persona identity records.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::types::Persona;

const PERSONA_COLUMNS: &str = "id, name, label, nsfw, tags, introduction, environment, image";

fn persona_from_row(row: &Row<'_>) -> rusqlite::Result<Persona> {
    let tags: Option<String> = row.get(4)?;
    let id: String = row.get(0)?;
    let tags = match tags.as_deref() {
        Some(raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
            tracing::warn!(persona_id = %id, error = %e, "unparseable persona tags");
            Vec::new()
        }),
        None => Vec::new(),
    };
    Ok(Persona {
        id,
        name: row.get(1)?,
        label: row.get(2)?,
        nsfw: row.get::<_, i64>(3)? != 0,
        tags,
        introduction: row.get(5)?,
        environment: row.get(6)?,
        image: row.get(7)?,
    })
}

pub fn get_persona(conn: &Connection, persona_id: &str) -> Result<Option<Persona>> {
    let persona = conn
        .query_row(
            &format!("SELECT {PERSONA_COLUMNS} FROM personas WHERE id = ?1"),
            params![persona_id],
            persona_from_row,
        )
        .optional()?;
    Ok(persona)
}

pub fn list_personas(conn: &Connection) -> Result<Vec<Persona>> {
    let mut stmt = conn.prepare(&format!("SELECT {PERSONA_COLUMNS} FROM personas ORDER BY name, id"))?;
    let personas = stmt
        .query_map([], persona_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(personas)
}

/// Insert or update a persona's presentation fields. Returns `true` if the
/// persona did not exist before.
pub fn upsert_persona(conn: &Connection, persona: &Persona) -> Result<bool> {
    let existed: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM personas WHERE id = ?1",
        params![persona.id],
        |row| row.get(0),
    )?;
    let tags = serde_json::to_string(&persona.tags)?;

    conn.execute(
        "INSERT INTO personas (id, name, label, nsfw, tags, introduction, environment, image) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, label = excluded.label, \
         nsfw = excluded.nsfw, tags = excluded.tags, introduction = excluded.introduction, \
         environment = excluded.environment, image = excluded.image",
        params![
            persona.id,
            persona.name,
            persona.label,
            persona.nsfw as i64,
            tags,
            persona.introduction,
            persona.environment,
            persona.image,
        ],
    )
    .with_context(|| format!("failed to upsert persona {}", persona.id))?;

    Ok(!existed)
}
