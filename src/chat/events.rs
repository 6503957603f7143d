//! Client-facing stream events.

use axum::response::sse::Event;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One `data:` payload of the chat event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChatEvent {
    /// Diagnostic echo of the request sent to the LLM, once, first.
    Params { params: Value },
    Delta { delta: String },
    Done,
    Error { error: String },
}

impl ChatEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }

    pub fn to_sse(&self) -> Event {
        match serde_json::to_string(self) {
            Ok(json) => Event::default().data(json),
            Err(e) => Event::default().data(error_payload(&format!("event encoding failed: {e}"))),
        }
    }
}

/// JSON text of an `error` event, built without going through [`ChatEvent`].
fn error_payload(message: &str) -> String {
    serde_json::json!({"type": "error", "error": message}).to_string()
}
