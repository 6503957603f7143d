//! Retrieval-augmented roleplay chat on top of a local Ollama runtime.
//!
//! Reverie keeps one conversation per persona, assembles a layered system
//! prompt for every turn and streams the model's reply back over SSE.
//! Long-term memories live next to the conversation and are retrieved by
//! vector similarity:
//!
//! | Memory kind | Written by | Lifecycle |
//! |-------------|------------|-----------|
//! | **static** | `reverie seed` | Replaced on reseed |
//! | **static_persona** | structured state `dynamic_traits` | Regenerated whenever traits change |
//! | **conversation** | every completed turn pair | Append-only |
//!
//! The model may end a reply with a `<state>{...}</state>` block; its
//! `outfit` patch is merged into the persona's outfit document and its
//! `events` are folded into the turn's memory.
//!
//! # Architecture
//!
//! - **Storage**: SQLite (personas, turns, state documents, memories) with
//!   [sqlite-vec](https://github.com/asg017/sqlite-vec) for the per-persona vector index
//! - **Embeddings**: Ollama embedding endpoint, legacy or OpenAI-compatible shape
//! - **Generation**: Ollama `/api/chat`, NDJSON streaming
//! - **Transport**: HTTP JSON plus Server-Sent Events for streamed turns
//!
//! A failing embedder or index never blocks a turn: retrieval degrades to
//! no memories and the turn proceeds.
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`db`]: SQLite initialization, schema, migrations, and health checks
//! - [`store`]: Personas, conversations, structured state and memories
//! - [`embedding`]: Text-to-vector embedding through Ollama
//! - [`index`]: sqlite-vec index, reconciliation and retrieval
//! - [`llm`]: Chat backend trait and the Ollama streaming client
//! - [`prompt`]: Layered system prompt assembly
//! - [`postprocess`]: State delta extraction and narration cleanup
//! - [`chat`]: Turn orchestration and the client event stream
//! - [`server`]: axum routes
//! - [`cli`]: Operator commands

pub mod chat;
pub mod cli;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod error;
pub mod index;
pub mod llm;
pub mod postprocess;
pub mod prompt;
pub mod server;
pub mod store;
