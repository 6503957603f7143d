//! CLI `doctor` command: database diagnostics and a health report.

use anyhow::{Context, Result};

use crate::config::ReverieConfig;
use crate::db;

/// Run database diagnostics and print a health report.
pub fn doctor(config: &ReverieConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `reverie seed <personas.json>` to create it.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    let conn = db::open_database(&db_path).context("failed to open database (may be corrupt)")?;
    let report = db::check_database_health(&conn).context("failed to run health check")?;

    println!("Reverie Health Report");
    println!("=====================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!("sqlite-vec:        {}", report.sqlite_vec_version);
    println!();
    println!("Embeddings:");
    println!("  Stored model:    {}", report.embedding_model.as_deref().unwrap_or("(not set)"));
    println!("  Configured:      {}", config.ollama.embed_model);
    match report.embedding_dim {
        Some(dim) => println!("  Dimensions:      {dim}"),
        None => println!("  Dimensions:      (index not built yet)"),
    }
    if let Some(ref stored) = report.embedding_model {
        if stored != &config.ollama.embed_model {
            println!("  WARNING: model mismatch! Run `reverie reindex --rebuild` to re-embed.");
        }
    }
    println!();
    println!("Row counts:");
    println!("  Personas:        {}", report.persona_count);
    println!("  Turns:           {}", report.turn_count);
    println!("  Memories:        {}", report.memory_count);
    println!("  Indexed:         {}", report.indexed_count);
    if report.indexed_count < report.memory_count {
        println!(
            "  {} memories have no vector yet; `reverie reindex` or the next `serve` will index them.",
            report.memory_count - report.indexed_count
        );
    }
    println!();
    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
        println!();
        println!("Recovery: restore the database file from a backup, then run `reverie reindex --rebuild`.");
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
