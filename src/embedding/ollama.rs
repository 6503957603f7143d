//! Ollama embedding client.
//!
//! Two request shapes exist in the wild:
//!
//! - legacy: `POST /api/embeddings {"model", "prompt"}` → `{"embedding": [..]}`
//! - OpenAI-compatible: `POST /v1/embeddings {"model", "input": [..]}` →
//!   `{"data": [{"embedding": [..]}]}`
//!
//! The legacy shape is tried first. A 404 moves on to the next shape; any
//! other failure is final for that call. The first shape that answers is
//! remembered for the rest of the process.

use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::Embedder;
use crate::config::OllamaConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointShape {
    Legacy,
    OpenAi,
}

impl EndpointShape {
    const PROBE_ORDER: [EndpointShape; 2] = [Self::Legacy, Self::OpenAi];

    fn path(&self) -> &'static str {
        match self {
            Self::Legacy => "/api/embeddings",
            Self::OpenAi => "/v1/embeddings",
        }
    }
}

#[derive(Deserialize)]
struct LegacyResponse {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiItem>,
}

#[derive(Deserialize)]
struct OpenAiItem {
    embedding: Vec<f32>,
}

/// Outcome of a single request against one shape.
enum Attempt {
    Vector(Vec<f32>),
    NotFound,
}

pub struct OllamaEmbedder {
    client: reqwest::Client,
    host: String,
    model: String,
    shape: Mutex<Option<EndpointShape>>,
    dim: OnceLock<usize>,
}

impl OllamaEmbedder {
    pub fn new(config: &OllamaConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            model: config.embed_model.clone(),
            shape: Mutex::new(None),
            dim: OnceLock::new(),
        })
    }

    /// The shape learned so far.
    pub fn shape(&self) -> Option<EndpointShape> {
        self.shape.lock().ok().and_then(|s| *s)
    }

    fn remember_shape(&self, shape: EndpointShape) {
        if let Ok(mut slot) = self.shape.lock() {
            if slot.is_none() {
                tracing::info!(endpoint = shape.path(), model = %self.model, "embedding endpoint detected");
            }
            *slot = Some(shape);
        }
    }

    async fn request(&self, shape: EndpointShape, text: &str) -> Result<Attempt> {
        let body = match shape {
            EndpointShape::Legacy => json!({ "model": self.model, "prompt": text }),
            EndpointShape::OpenAi => json!({ "model": self.model, "input": [text] }),
        };
        let url = format!("{}{}", self.host, shape.path());

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::EmbeddingUnavailable(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Attempt::NotFound);
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::EmbeddingUnavailable(format!(
                "{url} returned {status}: {}",
                detail.trim()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::EmbeddingUnavailable(format!("reading {url} failed: {e}")))?;
        let vector = parse_vector(shape, &bytes)?;
        Ok(Attempt::Vector(vector))
    }

    fn check_dimension(&self, vector: Vec<f32>) -> Result<Vec<f32>> {
        let expected = *self.dim.get_or_init(|| {
            tracing::info!(dim = vector.len(), "embedding dimension learned");
            vector.len()
        });
        if vector.len() != expected {
            return Err(Error::EmbeddingUnavailable(format!(
                "embedding has {} dimensions, expected {expected}",
                vector.len()
            )));
        }
        Ok(vector)
    }
}

/// Decode a response body for the given shape. Empty vectors are malformed.
pub(crate) fn parse_vector(shape: EndpointShape, body: &[u8]) -> Result<Vec<f32>> {
    let vector = match shape {
        EndpointShape::Legacy => serde_json::from_slice::<LegacyResponse>(body)
            .map(|r| r.embedding)
            .map_err(|e| Error::EmbeddingUnavailable(format!("malformed embedding response: {e}")))?,
        EndpointShape::OpenAi => serde_json::from_slice::<OpenAiResponse>(body)
            .map_err(|e| Error::EmbeddingUnavailable(format!("malformed embedding response: {e}")))?
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .unwrap_or_default(),
    };
    if vector.is_empty() {
        return Err(Error::EmbeddingUnavailable("empty embedding vector".into()));
    }
    Ok(vector)
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(shape) = self.shape() {
            return match self.request(shape, text).await? {
                Attempt::Vector(v) => self.check_dimension(v),
                Attempt::NotFound => Err(Error::EmbeddingUnavailable(format!(
                    "{} returned 404 for model {}",
                    shape.path(),
                    self.model
                ))),
            };
        }

        for shape in EndpointShape::PROBE_ORDER {
            match self.request(shape, text).await? {
                Attempt::Vector(v) => {
                    self.remember_shape(shape);
                    return self.check_dimension(v);
                }
                Attempt::NotFound => {
                    tracing::debug!(endpoint = shape.path(), "embedding endpoint not found, trying next");
                }
            }
        }
        Err(Error::EmbeddingUnavailable(
            "no embedding endpoint answered (tried /api/embeddings and /v1/embeddings)".into(),
        ))
    }

    fn dimensions(&self) -> Option<usize> {
        self.dim.get().copied()
    }

    fn model(&self) -> &str {
        &self.model
    }
}
