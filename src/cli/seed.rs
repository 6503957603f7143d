//! CLI `seed` command: load persona definitions from a JSON file.

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Deserialize;
use std::path::Path;

use crate::context::AppContext;
use crate::store::conversations::append_turn;
use crate::store::memories::replace_memories_of_kind;
use crate::store::personas::upsert_persona;
use crate::store::state::upsert_state;
use crate::store::types::{MemoryKind, Persona, Role, StateDocument, StateKind};

/// One entry of the seed file: a persona with optional state documents and
/// `static` memories.
#[derive(Debug, Deserialize)]
pub struct PersonaSeed {
    #[serde(flatten)]
    pub persona: Persona,
    #[serde(default)]
    pub character: Option<StateDocument>,
    #[serde(default)]
    pub relationship: Option<StateDocument>,
    #[serde(default)]
    pub outfit: Option<StateDocument>,
    #[serde(default)]
    pub memories: Vec<String>,
}

impl PersonaSeed {
    fn documents(&self) -> [(StateKind, Option<&StateDocument>); 3] {
        [
            (StateKind::Character, self.character.as_ref()),
            (StateKind::Relationship, self.relationship.as_ref()),
            (StateKind::Outfit, self.outfit.as_ref()),
        ]
    }
}

#[derive(Debug, Default)]
pub struct SeedReport {
    pub created: usize,
    pub updated: usize,
    /// Memory rows deleted while reseeding, whose vectors must be dropped.
    pub stale_memories: Vec<i64>,
    pub new_memories: usize,
}

/// Write the seeds to the store. New personas get their introduction as the
/// first `assistant` turn; existing conversations are left alone.
pub fn apply_seeds(conn: &mut Connection, seeds: &[PersonaSeed]) -> Result<SeedReport> {
    let mut report = SeedReport::default();

    for seed in seeds {
        let persona = &seed.persona;
        let tx = conn.transaction()?;
        let created = upsert_persona(&tx, persona)?;
        if created {
            append_turn(&tx, &persona.id, Role::Assistant, &persona.introduction)?;
        }
        let (removed, inserted) =
            replace_memories_of_kind(&tx, &persona.id, MemoryKind::Static, &seed.memories)?;
        tx.commit()?;

        report.stale_memories.extend(removed);
        report.new_memories += inserted.len();

        for (kind, doc) in seed.documents() {
            let Some(doc) = doc else { continue };
            let upsert = upsert_state(conn, &persona.id, kind, doc)
                .with_context(|| format!("failed to store {kind} for {}", persona.id))?;
            report.stale_memories.extend(upsert.removed_memories);
            report.new_memories += upsert.inserted_memories.len();
        }

        if created {
            report.created += 1;
        } else {
            report.updated += 1;
        }
        tracing::info!(persona_id = %persona.id, created, "persona seeded");
    }

    Ok(report)
}

/// Seed personas from `file`. New memories are embedded by the next
/// `reverie reindex` or `reverie serve`.
pub async fn seed(ctx: &AppContext, file: &Path) -> Result<()> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read seed file: {}", file.display()))?;
    let seeds: Vec<PersonaSeed> =
        serde_json::from_str(&json).context("failed to parse seed JSON")?;

    println!("Seeding {} personas...", seeds.len());
    let report = ctx
        .store
        .run(move |conn| apply_seeds(conn, &seeds))
        .await?;

    if !report.stale_memories.is_empty() {
        let count = report.stale_memories.len();
        if let Err(e) = ctx.index.remove(report.stale_memories).await {
            tracing::warn!(error = %e, count, "stale vectors not dropped");
        }
    }

    println!("Seed complete:");
    println!("  Personas created: {}", report.created);
    println!("  Personas updated: {}", report.updated);
    println!("  Memories written: {} (run `reverie reindex` to embed them now)", report.new_memories);
    Ok(())
}
