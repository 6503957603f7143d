//! Text-to-vector embedding.
//!
//! Provides the [`Embedder`] trait and an Ollama-backed implementation. The
//! vector dimensionality is whatever the serving model returns on the first
//! successful call; it stays fixed for the life of the process because the
//! vector table is declared with it.

pub mod ollama;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// Converts text to a fixed-length vector.
///
/// Every failure is reported as [`Error::EmbeddingUnavailable`](crate::error::Error::EmbeddingUnavailable).
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Dimensionality learned so far, if any call has succeeded.
    fn dimensions(&self) -> Option<usize>;

    /// Model name recorded alongside stored vectors.
    fn model(&self) -> &str;
}

/// Build the embedder described by the Ollama section of the config.
pub fn create_embedder(config: &crate::config::OllamaConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    Ok(Arc::new(ollama::OllamaEmbedder::new(config)?))
}

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            embedding.len() * std::mem::size_of::<f32>(),
        )
    }
}
