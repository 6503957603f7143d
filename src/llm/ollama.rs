//! Ollama `/api/chat` client.
//!
//! The streaming body is newline-delimited JSON. Objects may be split
//! across network chunks, so bytes are buffered until a full line arrives.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;

use super::{ChatBackend, ChatRequest, TokenStream};
use crate::config::OllamaConfig;
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

/// One line of the `/api/chat` response.
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

pub struct OllamaChat {
    client: reqwest::Client,
    host: String,
    timeout: Duration,
}

impl OllamaChat {
    pub fn new(config: &OllamaConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn body(request: &ChatRequest, stream: bool) -> serde_json::Value {
        json!({
            "model": request.model,
            "messages": request.messages,
            "stream": stream,
            "options": {
                "temperature": request.options.temperature,
                "top_p": request.options.top_p,
                "repeat_penalty": request.options.repeat_penalty,
                "num_ctx": request.options.context_window,
            }
        })
    }

    async fn post_chat(&self, request: &ChatRequest, stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/api/chat", self.host);
        let mut builder = self.client.post(&url).json(&Self::body(request, stream));
        if !stream {
            builder = builder.timeout(self.timeout);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamUnavailable(format!(
                "LLM returned {status}: {}",
                detail.trim()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatBackend for OllamaChat {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<TokenStream> {
        let response = self.post_chat(request, true).await?;
        tracing::debug!(model = %request.model, messages = request.messages.len(), "LLM stream opened");
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(|e| e.to_string()))
            .boxed();
        Ok(decode_ndjson(body))
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let response = self.post_chat(request, false).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("reading LLM response failed: {e}")))?;
        let chunk: ChatChunk = serde_json::from_slice(&bytes)
            .map_err(|e| Error::UpstreamUnavailable(format!("malformed LLM response: {e}")))?;
        if let Some(err) = chunk.error {
            return Err(Error::UpstreamUnavailable(err));
        }
        Ok(chunk.message.map(|m| m.content).unwrap_or_default())
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.host);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("request to {url} failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::UpstreamUnavailable(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("malformed model list: {e}")))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

/// Splits a byte stream into complete lines.
#[derive(Default)]
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            lines.push(line);
        }
        lines
    }

    fn take_rest(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

struct DecodeState<S> {
    body: S,
    lines: LineBuffer,
    ready: VecDeque<Result<String>>,
    finished: bool,
}

impl<S> DecodeState<S> {
    /// Queue the fragment (or error) carried by one line. Returns `true`
    /// once the stream is complete, successfully or not.
    fn accept_line(&mut self, line: &[u8]) -> bool {
        if line.iter().all(u8::is_ascii_whitespace) {
            return false;
        }
        let chunk: ChatChunk = match serde_json::from_slice(line) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.ready.push_back(Err(Error::UpstreamUnavailable(format!(
                    "malformed stream line: {e}"
                ))));
                return true;
            }
        };
        if let Some(err) = chunk.error {
            self.ready.push_back(Err(Error::UpstreamUnavailable(err)));
            return true;
        }
        if let Some(message) = chunk.message {
            if !message.content.is_empty() {
                self.ready.push_back(Ok(message.content));
            }
        }
        chunk.done
    }
}

/// Turn a newline-delimited `/api/chat` body into text fragments.
///
/// The stream ends after the `done` line. A body that ends without one,
/// an `error` line or an undecodable line yields a final `Err`.
pub fn decode_ndjson<S>(body: S) -> TokenStream
where
    S: Stream<Item = std::result::Result<Vec<u8>, String>> + Send + Unpin + 'static,
{
    let state = DecodeState {
        body,
        lines: LineBuffer::default(),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.ready.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.body.next().await {
                Some(Ok(bytes)) => {
                    for line in st.lines.push(&bytes) {
                        if st.accept_line(&line) {
                            st.finished = true;
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    st.ready
                        .push_back(Err(Error::UpstreamUnavailable(format!("stream read failed: {e}"))));
                    st.finished = true;
                }
                None => {
                    let rest = st.lines.take_rest();
                    if !st.accept_line(&rest) {
                        st.ready.push_back(Err(Error::UpstreamUnavailable(
                            "stream ended before completion".into(),
                        )));
                    }
                    st.finished = true;
                }
            }
        }
    })
    .boxed()
}
