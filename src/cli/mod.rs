//! Command-line entry points behind `reverie <command>`.

pub mod doctor;
pub mod reindex;
pub mod reset;
pub mod seed;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::ReverieConfig;
use crate::llm;

/// List the models installed in the configured Ollama runtime.
pub async fn models(config: &ReverieConfig) -> Result<()> {
    let backend = llm::create_backend(&config.ollama)?;
    let models = backend
        .list_models()
        .await
        .with_context(|| format!("could not reach Ollama at {}", config.ollama.host))?;

    if models.is_empty() {
        println!("No models installed at {}.", config.ollama.host);
        return Ok(());
    }
    for name in &models {
        let mut marks = Vec::new();
        if *name == config.ollama.chat_model {
            marks.push("chat");
        }
        if *name == config.ollama.embed_model {
            marks.push("embeddings");
        }
        if marks.is_empty() {
            println!("  {name}");
        } else {
            println!("  {name}  ({})", marks.join(", "));
        }
    }
    Ok(())
}

/// Bar used by the long-running commands.
pub(crate) fn progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    match ProgressStyle::default_bar().template("  {bar:40.cyan/blue} {pos}/{len} ({eta})") {
        Ok(style) => pb.set_style(style.progress_chars("##-")),
        Err(e) => tracing::debug!(error = %e, "progress template rejected, using default"),
    }
    pb
}
