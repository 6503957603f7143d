//! HTTP surface: persona and conversation routes plus the chat endpoints.
//!
//! [`router`] builds the axum app over an [`AppContext`]; [`serve`] binds it
//! and runs until ctrl-c.

use std::convert::Infallible;
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::chat::{self, ChatEvent};
use crate::context::AppContext;
use crate::error::{self, Error};
use crate::store::conversations::{list_chats, list_turns, reset_conversation};
use crate::store::personas::{get_persona, list_personas};
use crate::store::state::{full_data, upsert_state};
use crate::store::types::{ChatSummary, FullData, Persona, StateDocument, StateKind, Turn};

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ReplyBody {
    pub content: String,
}

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/models", get(models))
        .route("/api/personas", get(personas))
        .route("/api/chats", get(chats))
        .route(
            "/api/personas/{id}/conversation",
            get(conversation).delete(reset),
        )
        .route("/api/personas/{id}/full-data", get(persona_full_data))
        .route("/api/personas/{id}/state/{kind}", put(put_state))
        .route("/api/personas/{id}/chat", post(chat_stream))
        .route("/api/personas/{id}/reply", post(reply))
        .with_state(ctx)
}

/// Bind the configured address and serve until ctrl-c.
pub async fn serve(ctx: AppContext) -> Result<()> {
    let bind_addr = format!("{}:{}", ctx.config.server.host, ctx.config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "reverie listening at http://{bind_addr}/api");

    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutting down HTTP server");
        })
        .await?;

    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}

async fn models(State(ctx): State<AppContext>) -> Json<Vec<String>> {
    match ctx.llm.list_models().await {
        Ok(models) => Json(models),
        Err(e) => {
            tracing::warn!(error = %e, "model list unavailable");
            Json(Vec::new())
        }
    }
}

async fn personas(State(ctx): State<AppContext>) -> error::Result<Json<Vec<Persona>>> {
    Ok(Json(ctx.store.run(|conn| list_personas(conn)).await?))
}

async fn chats(State(ctx): State<AppContext>) -> error::Result<Json<Vec<ChatSummary>>> {
    Ok(Json(ctx.store.run(|conn| list_chats(conn)).await?))
}

async fn require_persona(ctx: &AppContext, id: &str) -> error::Result<Persona> {
    let owned = id.to_string();
    ctx.store
        .run(move |conn| get_persona(conn, &owned))
        .await?
        .ok_or_else(|| Error::NotFound(format!("persona {id}")))
}

async fn conversation(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> error::Result<Json<Vec<Turn>>> {
    require_persona(&ctx, &id).await?;
    Ok(Json(ctx.store.run(move |conn| list_turns(conn, &id)).await?))
}

async fn reset(State(ctx): State<AppContext>, Path(id): Path<String>) -> error::Result<StatusCode> {
    require_persona(&ctx, &id).await?;
    let _turn = ctx.turn_locks.acquire(&id).await;
    ctx.store
        .run(move |conn| reset_conversation(conn, &id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn persona_full_data(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> error::Result<Json<FullData>> {
    let owned = id.clone();
    ctx.store
        .run(move |conn| full_data(conn, &owned))
        .await?
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("persona {id}")))
}

async fn put_state(
    State(ctx): State<AppContext>,
    Path((id, kind)): Path<(String, String)>,
    Json(doc): Json<StateDocument>,
) -> error::Result<StatusCode> {
    let kind: StateKind = kind.parse().map_err(Error::BadRequest)?;
    require_persona(&ctx, &id).await?;

    let owned = id.clone();
    let upsert = ctx
        .store
        .run(move |conn| upsert_state(conn, &owned, kind, &doc))
        .await?;
    if upsert.traits_changed {
        ctx.indexer
            .spawn_sync(upsert.removed_memories, upsert.inserted_memories);
    }
    tracing::info!(persona_id = %id, kind = %kind, traits_changed = upsert.traits_changed, "state document updated");
    Ok(StatusCode::NO_CONTENT)
}

async fn chat_stream(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(body): Json<ChatBody>,
) -> error::Result<impl IntoResponse> {
    let persona = chat::prepare_turn(&ctx, &id, &body.message).await?;
    let keep_alive = Duration::from_secs(ctx.config.server.keep_alive_secs.max(1));
    let (events, _turn) = chat::spawn_turn(ctx, persona, body.message);

    Ok(Sse::new(event_stream(events)).keep_alive(KeepAlive::new().interval(keep_alive)))
}

/// SSE body over a turn's event channel. Ends after the terminal event.
fn event_stream(
    events: tokio::sync::mpsc::Receiver<ChatEvent>,
) -> impl Stream<Item = std::result::Result<Event, Infallible>> {
    stream::unfold(events, |mut events| async move {
        let event = events.recv().await?;
        Some((Ok(event.to_sse()), events))
    })
}

async fn reply(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(body): Json<ChatBody>,
) -> error::Result<Json<ReplyBody>> {
    let persona = chat::prepare_turn(&ctx, &id, &body.message).await?;
    let outcome = chat::reply_turn(&ctx, &persona, &body.message).await?;
    Ok(Json(ReplyBody {
        content: outcome.narration.unwrap_or_default(),
    }))
}
