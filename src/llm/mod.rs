//! Boundary to the LLM runtime.
//!
//! [`ChatBackend`] is a streaming token source plus a one-shot completion
//! call. The pipeline only ever talks to the trait, so tests swap in a
//! scripted backend.

pub mod ollama;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::config::{GenerationConfig, ReverieConfig};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One prompt segment or history message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling options sent with every call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub repeat_penalty: f32,
    pub context_window: u32,
}

impl From<&GenerationConfig> for GenerationOptions {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            repeat_penalty: config.repeat_penalty,
            context_window: config.context_window,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub options: GenerationOptions,
}

impl ChatRequest {
    pub fn new(config: &ReverieConfig, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: config.ollama.chat_model.clone(),
            messages,
            options: GenerationOptions::from(&config.generation),
        }
    }
}

/// Incremental text fragments, ending after the runtime's completion
/// signal. An `Err` item is terminal.
pub type TokenStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Start a streaming completion. Failing to connect, or a non-2xx
    /// status, is reported here rather than as a stream item.
    async fn stream_chat(&self, request: &ChatRequest) -> Result<TokenStream>;

    /// Non-streaming completion returning the whole text.
    async fn complete(&self, request: &ChatRequest) -> Result<String>;

    /// Names of the models the runtime has available.
    async fn list_models(&self) -> Result<Vec<String>>;
}

pub fn create_backend(config: &crate::config::OllamaConfig) -> anyhow::Result<Arc<dyn ChatBackend>> {
    Ok(Arc::new(ollama::OllamaChat::new(config)?))
}
