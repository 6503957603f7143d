//! CLI `reindex` command: bring the vector index in line with the memory table.

use anyhow::{Context, Result};

use crate::context::AppContext;

/// Embed every memory that has no vector yet. With `rebuild`, drop the
/// index first so every memory is embedded again with the current model.
pub async fn reindex(ctx: &AppContext, rebuild: bool) -> Result<()> {
    if rebuild {
        ctx.index
            .clear()
            .await
            .context("failed to drop the vector index")?;
        println!("Vector index dropped; re-embedding with model '{}'.", ctx.embedder.model());
    }

    let pb = super::progress_bar(0);
    let on_progress = |done: usize, pending: usize| {
        pb.set_length(pending as u64);
        pb.set_position(done as u64);
    };

    let report = ctx
        .indexer
        .reconcile_with_progress(&on_progress)
        .await
        .context("reconciliation failed")?;
    pb.finish_and_clear();

    println!("Reconciled {} memories:", report.total);
    println!("  Already indexed: {}", report.already_indexed);
    println!("  Upserted:        {}", report.upserted);
    if report.dropped > 0 {
        println!("  Dropped:         {} (memory deleted while indexing)", report.dropped);
    }
    if report.skipped > 0 {
        println!("  Skipped:         {} (embedding unavailable, run again later)", report.skipped);
    }
    Ok(())
}
