//! Layered system prompt assembly.
//!
//! Segment order for every turn:
//!
//! 1. global narration rules
//! 2. explicit-content permission, only when allowed for the persona
//! 3. persona identity rendered from the structured state
//! 4. long-term memories retrieved for the latest user message
//! 5. the scene description
//! 6. the conversation history, oldest first
//!
//! A segment whose source is empty or unavailable is left out; assembly
//! itself never fails.

pub mod render;
pub mod style;

use serde::Serialize;

use crate::index::MemoryIndexer;
use crate::llm::{ChatMessage, MessageRole};
use crate::store::state::load_states;
use crate::store::types::{Memory, Persona, PersonaState, Role, Turn};
use crate::store::Store;

/// Inputs of [`build_segments`], all already loaded.
pub struct PromptParts<'a> {
    pub persona: &'a Persona,
    pub state: &'a PersonaState,
    pub memories: &'a [Memory],
    pub history: &'a [ChatMessage],
    pub nsfw_allowed: bool,
}

/// Pure segment builder.
pub fn build_segments(parts: &PromptParts<'_>) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(style::GLOBAL_STYLE)];

    if parts.nsfw_allowed {
        messages.push(ChatMessage::system(style::NSFW_SEGMENT));
    }

    messages.push(ChatMessage::system(render::render_identity(
        parts.persona,
        parts.state,
    )));

    if !parts.memories.is_empty() {
        let lines: Vec<String> = parts
            .memories
            .iter()
            .map(|m| format!("- {}", m.content.trim().replace('\n', " / ")))
            .collect();
        messages.push(ChatMessage::system(format!(
            "{}\n{}",
            style::MEMORY_HEADER,
            lines.join("\n")
        )));
    }

    if let Some(scene) = parts
        .persona
        .environment
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        messages.push(ChatMessage::system(format!("{}\n{scene}", style::SCENE_HEADER)));
    }

    messages.extend(parts.history.iter().cloned());
    messages
}

/// Stored turns as prompt history.
pub fn history_from_turns(turns: &[Turn]) -> Vec<ChatMessage> {
    turns
        .iter()
        .map(|t| match t.role {
            Role::User => ChatMessage::user(t.content.clone()),
            Role::Assistant => ChatMessage::assistant(t.content.clone()),
        })
        .collect()
}

/// Assembled prompt plus what went into it, for the diagnostic echo.
#[derive(Debug, Clone, Serialize)]
pub struct AssembledPrompt {
    pub messages: Vec<ChatMessage>,
    pub memory_ids: Vec<i64>,
    pub nsfw_allowed: bool,
}

/// Reads structured state and memories fresh for every call.
#[derive(Clone)]
pub struct PromptAssembler {
    store: Store,
    indexer: MemoryIndexer,
    max_memories: usize,
}

impl PromptAssembler {
    pub fn new(store: Store, indexer: MemoryIndexer, max_memories: usize) -> Self {
        Self {
            store,
            indexer,
            max_memories,
        }
    }

    pub async fn assemble(
        &self,
        persona: &Persona,
        history: &[ChatMessage],
        nsfw_allowed: bool,
    ) -> AssembledPrompt {
        let persona_id = persona.id.clone();
        let state = match self.store.run(move |conn| load_states(conn, &persona_id)).await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(persona_id = %persona.id, error = %e, "structured state unavailable");
                PersonaState::default()
            }
        };

        let query = history
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let memories = self
            .indexer
            .retrieve(&persona.id, query, self.max_memories)
            .await;

        let messages = build_segments(&PromptParts {
            persona,
            state: &state,
            memories: &memories,
            history,
            nsfw_allowed,
        });
        tracing::debug!(
            persona_id = %persona.id,
            segments = messages.len(),
            memories = memories.len(),
            nsfw_allowed,
            "prompt assembled"
        );

        AssembledPrompt {
            messages,
            memory_ids: memories.iter().map(|m| m.id).collect(),
            nsfw_allowed,
        }
    }
}
