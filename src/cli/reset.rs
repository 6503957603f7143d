//! CLI `reset` command: restart one persona's conversation after confirmation.

use anyhow::{bail, Result};
use std::io::Write;

use crate::context::AppContext;
use crate::store::conversations::reset_conversation;
use crate::store::personas::get_persona;

/// Delete a persona's conversation and restore its introduction. Memories
/// and structured state are kept.
pub async fn reset(ctx: &AppContext, persona_id: &str, yes: bool) -> Result<()> {
    let id = persona_id.to_string();
    let Some(persona) = ctx.store.run(move |conn| get_persona(conn, &id)).await? else {
        bail!("no persona with id '{persona_id}'");
    };

    if !yes {
        println!("This will delete every turn of the conversation with {}.", persona.name);
        print!("\nType YES to confirm: ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if input.trim() != "YES" {
            bail!("reset cancelled");
        }
    }

    let id = persona.id.clone();
    ctx.store
        .run(move |conn| reset_conversation(conn, &id))
        .await?;

    println!("Conversation with {} reset to its introduction.", persona.name);
    Ok(())
}
