//! Error taxonomy for the chat pipeline.
//!
//! Store and CLI plumbing use `anyhow`; the components that must decide
//! whether a failure reaches the caller (LLM, embeddings, index, state
//! deltas, persistence) speak [`Error`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// LLM runtime unreachable, non-2xx, or a broken stream.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Embedding endpoint failed or returned an unusable vector.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Vector index could not be opened, written or queried.
    #[error("vector index unavailable: {0}")]
    IndexUnavailable(String),

    /// A state block in the model output failed validation.
    #[error("invalid state delta: {0}")]
    InvalidStateDelta(String),

    /// A store write or read failed.
    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap a store-level error.
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
