use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use reverie::config::ReverieConfig;
use reverie::context::AppContext;
use reverie::{cli, server};

#[derive(Parser)]
#[command(name = "reverie", version, about = "Retrieval-augmented roleplay chat over Ollama")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index missing memories in the background and start the HTTP server
    Serve,
    /// Embed every memory that has no vector yet
    Reindex {
        /// Drop the vector index first and re-embed everything
        #[arg(long)]
        rebuild: bool,
    },
    /// Print a database health report
    Doctor,
    /// Load persona definitions from a JSON file
    Seed {
        /// JSON array of personas
        file: PathBuf,
    },
    /// Reset a persona's conversation to its introduction
    Reset {
        persona_id: String,
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
    /// List the models installed in Ollama
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ReverieConfig::load()?;

    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve => {
            let ctx = AppContext::from_config(config)?;
            let indexer = ctx.indexer.clone();
            tokio::spawn(async move {
                if let Err(e) = indexer.reconcile().await {
                    tracing::warn!(error = %e, "startup reconciliation failed");
                }
            });
            server::serve(ctx).await?;
        }
        Command::Reindex { rebuild } => {
            let ctx = AppContext::from_config(config)?;
            cli::reindex::reindex(&ctx, rebuild).await?;
        }
        Command::Doctor => cli::doctor::doctor(&config)?,
        Command::Seed { file } => {
            let ctx = AppContext::from_config(config)?;
            cli::seed::seed(&ctx, &file).await?;
        }
        Command::Reset { persona_id, yes } => {
            let ctx = AppContext::from_config(config)?;
            cli::reset::reset(&ctx, &persona_id, yes).await?;
        }
        Command::Models => cli::models(&config).await?,
    }

    Ok(())
}
