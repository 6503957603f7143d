#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use reverie::config::ReverieConfig;
use reverie::context::AppContext;
use reverie::embedding::Embedder;
use reverie::error::{Error, Result};
use reverie::llm::{ChatBackend, ChatRequest, TokenStream};
use reverie::store::conversations::append_turn;
use reverie::store::memories::append_memory;
use reverie::store::personas::upsert_persona;
use reverie::store::types::{MemoryKind, Persona, Role};
use reverie::store::Store;

pub const DIM: usize = 16;

/// Deterministic embedding with a spike at position `seed`.
pub fn test_embedding(seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    v[seed % DIM] = 1.0;
    v
}

pub fn persona(id: &str, name: &str, nsfw: bool) -> Persona {
    Persona {
        id: id.into(),
        name: name.into(),
        label: "barista".into(),
        nsfw,
        tags: vec!["slice-of-life".into()],
        introduction: "Hi.".into(),
        environment: Some("A quiet café at dusk.".into()),
        image: None,
    }
}

/// Insert a persona with its introduction as the first turn.
pub fn seed_persona(store: &Store, persona: &Persona) {
    let persona = persona.clone();
    store
        .blocking(move |conn| {
            upsert_persona(conn, &persona)?;
            append_turn(conn, &persona.id, Role::Assistant, &persona.introduction)?;
            Ok(())
        })
        .unwrap();
}

pub fn add_memory(store: &Store, persona_id: &str, kind: MemoryKind, content: &str) -> i64 {
    let persona_id = persona_id.to_string();
    let content = content.to_string();
    store
        .blocking(move |conn| append_memory(conn, &persona_id, kind, &content))
        .unwrap()
}

/// Maps keywords to spike dimensions; text with no keyword gets the last
/// dimension.
pub struct FakeEmbedder {
    keywords: Vec<(&'static str, usize)>,
    pub calls: AtomicUsize,
}

impl FakeEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            keywords: vec![("rain", 0), ("café", 1), ("cat", 2), ("yourself", 3), ("coat", 4)],
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let lower = text.to_lowercase();
        let mut v = vec![0.0f32; DIM];
        for (word, dim) in &self.keywords {
            if lower.contains(word) {
                v[*dim] += 1.0;
            }
        }
        if v.iter().all(|x| *x == 0.0) {
            v[DIM - 1] = 1.0;
        }
        Ok(v)
    }

    fn dimensions(&self) -> Option<usize> {
        Some(DIM)
    }

    fn model(&self) -> &str {
        "fake-embed"
    }
}

/// Embeds queries (text ending in `?`) right away and holds every other
/// text until [`GatedEmbedder::open`] is called.
pub struct GatedEmbedder {
    inner: Arc<FakeEmbedder>,
    gate: tokio::sync::watch::Sender<bool>,
}

impl GatedEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: FakeEmbedder::new(),
            gate: tokio::sync::watch::Sender::new(false),
        })
    }

    pub fn open(&self) {
        self.gate.send_replace(true);
    }
}

#[async_trait]
impl Embedder for GatedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if !text.trim_end().ends_with('?') {
            let mut rx = self.gate.subscribe();
            rx.wait_for(|open| *open)
                .await
                .map_err(|e| Error::EmbeddingUnavailable(e.to_string()))?;
        }
        self.inner.embed(text).await
    }

    fn dimensions(&self) -> Option<usize> {
        Some(DIM)
    }

    fn model(&self) -> &str {
        "fake-embed"
    }
}

/// Deletes the memory row holding `doomed` while that text is being
/// embedded, the way trait regeneration can race an indexing pass.
pub struct DeletingEmbedder {
    inner: Arc<FakeEmbedder>,
    store: Store,
    doomed: String,
}

impl DeletingEmbedder {
    pub fn new(store: Store, doomed: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: FakeEmbedder::new(),
            store,
            doomed: doomed.to_string(),
        })
    }
}

#[async_trait]
impl Embedder for DeletingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text == self.doomed {
            let doomed = self.doomed.clone();
            self.store
                .run(move |conn| {
                    conn.execute("DELETE FROM memories WHERE content = ?1", [&doomed])?;
                    Ok(())
                })
                .await?;
        }
        self.inner.embed(text).await
    }

    fn dimensions(&self) -> Option<usize> {
        Some(DIM)
    }

    fn model(&self) -> &str {
        "fake-embed"
    }
}

/// Embedding endpoint that is always down.
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::EmbeddingUnavailable("connection refused".into()))
    }

    fn dimensions(&self) -> Option<usize> {
        None
    }

    fn model(&self) -> &str {
        "down"
    }
}

/// Scripted LLM: streams `fragments`, answers `complete` from a queue and
/// records every request.
#[derive(Default)]
pub struct FakeChatBackend {
    pub fragments: Vec<String>,
    /// Error yielded after the fragments, if any.
    pub stream_error: Option<String>,
    /// Keep the stream open after the fragments instead of finishing.
    pub hang: bool,
    pub completions: Mutex<VecDeque<String>>,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl FakeChatBackend {
    pub fn streaming(fragments: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            ..Default::default()
        })
    }

    pub fn completing(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            completions: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            ..Default::default()
        })
    }

    pub fn recorded(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for FakeChatBackend {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<TokenStream> {
        self.requests.lock().unwrap().push(request.clone());
        let items: Vec<Result<String>> = self.fragments.iter().cloned().map(Ok).collect();
        let mut tokens = stream::iter(items).boxed();
        if let Some(err) = &self.stream_error {
            let err = Error::UpstreamUnavailable(err.clone());
            tokens = tokens.chain(stream::once(async move { Err(err) })).boxed();
        }
        if self.hang {
            tokens = tokens.chain(stream::pending()).boxed();
        }
        Ok(tokens)
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        self.completions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::UpstreamUnavailable("no scripted completion left".into()))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec!["fake-chat".into()])
    }
}

pub fn test_config() -> ReverieConfig {
    let mut config = ReverieConfig::default();
    config.ollama.chat_model = "fake-chat".into();
    config.ollama.embed_model = "fake-embed".into();
    config.chat.allow_nsfw = true;
    config
}

/// Context over a fresh in-memory store.
pub fn test_context(
    config: ReverieConfig,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn ChatBackend>,
) -> AppContext {
    let store = Store::open_in_memory().unwrap();
    AppContext::new(config, store, embedder, llm)
}
