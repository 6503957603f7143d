//! One chat turn, from validated request to persisted exchange.
//!
//! Streaming turns move through `Connected → Streaming → Finalizing` and end
//! `Completed`, `Failed` or `Cancelled`. Events go out over an mpsc channel;
//! a closed channel means the client disconnected, after which nothing is
//! sent or persisted.

use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;

use super::events::ChatEvent;
use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::llm::{ChatMessage, ChatRequest};
use crate::postprocess::{self, Processed};
use crate::prompt::{history_from_turns, style, AssembledPrompt};
use crate::store::conversations::{list_turns, record_exchange};
use crate::store::personas::get_persona;
use crate::store::state::{get_state, upsert_state};
use crate::store::types::{Persona, StateKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Completed,
    Failed,
    Cancelled,
}

/// What happened to one turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub status: TurnStatus,
    /// Accumulated model output, exactly as streamed.
    pub raw: String,
    /// Sanitized narration; set once the turn reached finalization.
    pub narration: Option<String>,
    /// The `conversation` memory written for the exchange.
    pub memory_id: Option<i64>,
}

impl TurnOutcome {
    fn ended(status: TurnStatus, raw: String) -> Self {
        Self {
            status,
            raw,
            narration: None,
            memory_id: None,
        }
    }
}

/// Validate a chat request before any LLM call: the message must not be
/// blank and the persona must exist.
pub async fn prepare_turn(ctx: &AppContext, persona_id: &str, message: &str) -> Result<Persona> {
    if message.trim().is_empty() {
        return Err(Error::BadRequest("message must not be empty".into()));
    }
    let owned = persona_id.to_string();
    ctx.store
        .run(move |conn| get_persona(conn, &owned))
        .await?
        .ok_or_else(|| Error::NotFound(format!("persona {persona_id}")))
}

/// Load history, append the new user message and assemble the prompt.
async fn build_request(
    ctx: &AppContext,
    persona: &Persona,
    message: &str,
) -> Result<(ChatRequest, AssembledPrompt)> {
    let persona_id = persona.id.clone();
    let turns = ctx.store.run(move |conn| list_turns(conn, &persona_id)).await?;
    let mut history = history_from_turns(&turns);
    history.push(ChatMessage::user(message));

    let nsfw_allowed = ctx.config.nsfw_allowed_for(persona.nsfw);
    let assembled = ctx.prompts.assemble(persona, &history, nsfw_allowed).await;
    let request = ChatRequest::new(&ctx.config, assembled.messages.clone());
    Ok((request, assembled))
}

fn params_echo(request: &ChatRequest, assembled: &AssembledPrompt) -> serde_json::Value {
    json!({
        "model": request.model,
        "options": request.options,
        "segments": request.messages.len(),
        "memory_ids": assembled.memory_ids,
        "nsfw_allowed": assembled.nsfw_allowed,
    })
}

/// Drive one streaming turn. Holds the persona's turn lock until the
/// exchange is persisted.
pub async fn run_turn(
    ctx: AppContext,
    persona: Persona,
    message: String,
    events: mpsc::Sender<ChatEvent>,
) -> TurnOutcome {
    let _turn = ctx.turn_locks.acquire(&persona.id).await;

    let (request, assembled) = match build_request(&ctx, &persona, &message).await {
        Ok(built) => built,
        Err(e) => {
            tracing::warn!(error = %e, "turn setup failed");
            let _ = events.send(ChatEvent::Error { error: e.to_string() }).await;
            return TurnOutcome::ended(TurnStatus::Failed, String::new());
        }
    };

    let params = ChatEvent::Params {
        params: params_echo(&request, &assembled),
    };
    if events.send(params).await.is_err() {
        tracing::info!("client went away before streaming");
        return TurnOutcome::ended(TurnStatus::Cancelled, String::new());
    }

    let mut tokens = match ctx.llm.stream_chat(&request).await {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::warn!(error = %e, "LLM call failed");
            let _ = events.send(ChatEvent::Error { error: e.to_string() }).await;
            return TurnOutcome::ended(TurnStatus::Failed, String::new());
        }
    };

    let mut raw = String::new();
    loop {
        let next = tokio::select! {
            next = tokens.next() => next,
            _ = events.closed() => {
                tracing::info!(received = raw.len(), "client disconnected mid-stream");
                return TurnOutcome::ended(TurnStatus::Cancelled, raw);
            }
        };
        match next {
            Some(Ok(fragment)) => {
                raw.push_str(&fragment);
                if events.send(ChatEvent::Delta { delta: fragment }).await.is_err() {
                    tracing::info!(received = raw.len(), "client disconnected mid-stream");
                    return TurnOutcome::ended(TurnStatus::Cancelled, raw);
                }
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, received = raw.len(), "LLM stream failed");
                let _ = events.send(ChatEvent::Error { error: e.to_string() }).await;
                return TurnOutcome::ended(TurnStatus::Failed, raw);
            }
            None => break,
        }
    }

    let processed = postprocess::process(&raw);
    if events.send(ChatEvent::Done).await.is_err() {
        tracing::info!("client disconnected before completion");
        return TurnOutcome::ended(TurnStatus::Cancelled, raw);
    }

    let memory_id = persist_turn(&ctx, &persona, &message, &processed).await;
    TurnOutcome {
        status: TurnStatus::Completed,
        raw,
        narration: Some(processed.narration),
        memory_id,
    }
}

/// Text of the `conversation` memory for one exchange.
pub fn conversation_memory_text(persona: &Persona, user_text: &str, processed: &Processed) -> String {
    let mut text = format!(
        "The user said: {}\n{} replied: {}",
        user_text.trim(),
        persona.name,
        processed.narration
    );
    for event in &processed.delta.events {
        text.push_str(&format!("\nEvent: {event}"));
    }
    text
}

/// Persist a finished exchange and apply its state delta. Failures are
/// logged, never returned: the caller already has the narration.
async fn persist_turn(
    ctx: &AppContext,
    persona: &Persona,
    user_text: &str,
    processed: &Processed,
) -> Option<i64> {
    if let Some(err) = &processed.error {
        tracing::warn!(error = %err, "state delta discarded");
    }

    let persona_id = persona.id.clone();
    let user = user_text.to_string();
    let narration = processed.narration.clone();
    let memory_text = conversation_memory_text(persona, user_text, processed);
    let memory_id = match ctx
        .store
        .run(move |conn| record_exchange(conn, &persona_id, &user, &narration, &memory_text))
        .await
    {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(error = %e, "completed turn was not persisted");
            return None;
        }
    };
    ctx.indexer.spawn_index(memory_id);

    if let Some(patch) = processed.delta.outfit.clone() {
        apply_outfit_delta(ctx, &persona.id, patch).await;
    }

    tracing::info!(memory_id, "turn persisted");
    Some(memory_id)
}

async fn apply_outfit_delta(
    ctx: &AppContext,
    persona_id: &str,
    patch: serde_json::Map<String, serde_json::Value>,
) {
    let owned = persona_id.to_string();
    let result = ctx
        .store
        .run(move |conn| {
            let current = get_state(conn, &owned, StateKind::Outfit)?.unwrap_or_default();
            let updated = postprocess::apply_outfit_patch(&current, &patch);
            upsert_state(conn, &owned, StateKind::Outfit, &updated)
        })
        .await;

    match result {
        Ok(upsert) => {
            tracing::info!(persona_id, "outfit updated from state delta");
            if upsert.traits_changed {
                ctx.indexer
                    .spawn_sync(upsert.removed_memories, upsert.inserted_memories);
            }
        }
        Err(e) => tracing::error!(persona_id, error = %e, "outfit delta not applied"),
    }
}

/// Non-streaming reply: same assembly and persistence as [`run_turn`],
/// plus at most one rewrite pass when the narration is off-format.
pub async fn reply_turn(ctx: &AppContext, persona: &Persona, message: &str) -> Result<TurnOutcome> {
    let _turn = ctx.turn_locks.acquire(&persona.id).await;

    let (request, assembled) = build_request(ctx, persona, message).await?;
    let raw = ctx.llm.complete(&request).await?;
    let mut processed = postprocess::process(&raw);

    if ctx.config.chat.rewrite_enabled && !postprocess::looks_narrative_ok(&processed.narration) {
        match rewrite(ctx, &processed.narration, assembled.nsfw_allowed).await {
            Ok(rewritten) if !rewritten.is_empty() => {
                tracing::debug!("reply rewritten to narration format");
                processed.narration = rewritten;
            }
            Ok(_) => tracing::warn!("rewrite pass returned nothing, keeping original"),
            Err(e) => tracing::warn!(error = %e, "rewrite pass failed, keeping original"),
        }
    }

    let memory_id = persist_turn(ctx, persona, message, &processed).await;
    Ok(TurnOutcome {
        status: TurnStatus::Completed,
        raw,
        narration: Some(processed.narration),
        memory_id,
    })
}

async fn rewrite(ctx: &AppContext, narration: &str, nsfw_allowed: bool) -> Result<String> {
    let mut messages = vec![ChatMessage::system(style::GLOBAL_STYLE)];
    if nsfw_allowed {
        messages.push(ChatMessage::system(style::NSFW_SEGMENT));
    }
    messages.push(ChatMessage::user(format!(
        "{}\n\nTEXT:\n{narration}",
        style::REWRITE_INSTRUCTION
    )));
    let raw = ctx.llm.complete(&ChatRequest::new(&ctx.config, messages)).await?;
    Ok(postprocess::process(&raw).narration)
}
