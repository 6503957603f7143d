mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use helpers::{persona, seed_persona, test_config, test_context, FakeChatBackend, FakeEmbedder};
use reverie::context::AppContext;
use reverie::server::router;

fn app(llm: std::sync::Arc<FakeChatBackend>) -> (AppContext, Router) {
    let ctx = test_context(test_config(), FakeEmbedder::new(), llm);
    seed_persona(&ctx.store, &persona("mei", "Mei", false));
    (ctx.clone(), router(ctx))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

fn json_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let (_, app) = app(FakeChatBackend::streaming(&[]));
    let (status, body) = send(&app, "GET", "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["status"], "ok");
}

#[tokio::test]
async fn personas_and_conversation_are_listed() {
    let (_, app) = app(FakeChatBackend::streaming(&[]));

    let (status, body) = send(&app, "GET", "/api/personas", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)[0]["id"], "mei");

    let (status, body) = send(&app, "GET", "/api/personas/mei/conversation", None).await;
    assert_eq!(status, StatusCode::OK);
    let turns = json_body(&body);
    assert_eq!(turns.as_array().unwrap().len(), 1);
    assert_eq!(turns[0]["role"], "assistant");
    assert_eq!(turns[0]["content"], "Hi.");
}

#[tokio::test]
async fn unknown_persona_is_404() {
    let llm = FakeChatBackend::streaming(&["unused"]);
    let (_, app) = app(llm.clone());

    for (method, uri, body) in [
        ("GET", "/api/personas/nobody/conversation", None),
        ("DELETE", "/api/personas/nobody/conversation", None),
        ("GET", "/api/personas/nobody/full-data", None),
        ("POST", "/api/personas/nobody/chat", Some(json!({"message": "Hello"}))),
        ("POST", "/api/personas/nobody/reply", Some(json!({"message": "Hello"}))),
    ] {
        let (status, body) = send(&app, method, uri, body).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
        assert!(json_body(&body)["error"].as_str().unwrap().contains("nobody"));
    }
    assert!(llm.recorded().is_empty());
}

#[tokio::test]
async fn empty_message_is_400_before_any_llm_call() {
    let llm = FakeChatBackend::streaming(&["unused"]);
    let (_, app) = app(llm.clone());

    let (status, _) = send(&app, "POST", "/api/personas/mei/chat", Some(json!({"message": "  "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, "POST", "/api/personas/mei/chat", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(llm.recorded().is_empty());
}

#[tokio::test]
async fn chat_streams_sse_events_in_order() {
    let (_, app) = app(FakeChatBackend::streaming(&["Hello", " ", "world"]));

    let request = Request::builder()
        .method("POST")
        .uri("/api/personas/mei/chat")
        .header("content-type", "application/json")
        .body(Body::from(json!({"message": "Hi"}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let events: Vec<Value> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect();

    let kinds: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
    assert_eq!(kinds, vec!["params", "delta", "delta", "delta", "done"]);
    let text: String = events
        .iter()
        .filter_map(|e| e["delta"].as_str())
        .collect();
    assert_eq!(text, "Hello world");

    let (_, body) = send(&app, "GET", "/api/personas/mei/conversation", None).await;
    assert_eq!(json_body(&body).as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn reply_returns_narration() {
    let (_, app) = app(FakeChatBackend::completing(&["She waves. \"Hello!\""]));

    let (status, body) = send(&app, "POST", "/api/personas/mei/reply", Some(json!({"message": "Hi"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body), json!({"content": "She waves. \"Hello!\""}));
}

#[tokio::test]
async fn reset_returns_204_and_restores_introduction() {
    let (_, app) = app(FakeChatBackend::completing(&["\"Sure.\""]));
    send(&app, "POST", "/api/personas/mei/reply", Some(json!({"message": "Hi"}))).await;

    let (status, _) = send(&app, "DELETE", "/api/personas/mei/conversation", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(&app, "GET", "/api/personas/mei/conversation", None).await;
    let turns = json_body(&body);
    assert_eq!(turns.as_array().unwrap().len(), 1);
    assert_eq!(turns[0]["content"], "Hi.");
}

#[tokio::test]
async fn state_documents_round_trip_through_full_data() {
    let (ctx, app) = app(FakeChatBackend::streaming(&[]));

    let doc = json!({
        "core_context": {"hair": "black", "age": 24},
        "dynamic_traits": ["Shy around strangers"],
        "notes": "kept as-is"
    });
    let (status, _) = send(&app, "PUT", "/api/personas/mei/state/character", Some(doc)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, "PUT", "/api/personas/mei/state/mood", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, "GET", "/api/personas/mei/full-data", None).await;
    assert_eq!(status, StatusCode::OK);
    let data = json_body(&body);
    assert_eq!(data["persona"]["name"], "Mei");
    assert_eq!(data["character"]["core_context"]["hair"], "black");
    assert_eq!(data["character"]["notes"], "kept as-is");
    assert!(data["outfit"].is_null());

    let traits = ctx
        .store
        .blocking(|conn| {
            let ids = reverie::store::memories::memory_ids_for_persona(conn, "mei")?;
            reverie::store::memories::list_memories(conn, &ids, None)
        })
        .unwrap();
    assert!(traits.values().any(|m| m.content == "Shy around strangers"));
}

#[tokio::test]
async fn models_are_listed_from_the_backend() {
    let (_, app) = app(FakeChatBackend::streaming(&[]));
    let (status, body) = send(&app, "GET", "/api/models", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body), json!(["fake-chat"]));
}
