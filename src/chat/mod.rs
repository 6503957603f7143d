//! Chat turn orchestration.
//!
//! [`spawn_turn`] starts a streaming turn on its own task and hands back the
//! event receiver; the HTTP layer turns that into an SSE body.

pub mod events;
pub mod orchestrator;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::Instrument;

pub use events::ChatEvent;
pub use orchestrator::{prepare_turn, reply_turn, run_turn, TurnOutcome, TurnStatus};

use crate::context::AppContext;
use crate::store::types::Persona;

/// Buffered events between the turn task and the response body.
const EVENT_BUFFER: usize = 64;

/// One async mutex per persona; turns on the same persona run one at a time.
#[derive(Clone, Default)]
pub struct TurnLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl TurnLocks {
    pub async fn acquire(&self, persona_id: &str) -> Option<OwnedMutexGuard<()>> {
        let lock = match self.inner.lock() {
            Ok(mut map) => Arc::clone(map.entry(persona_id.to_string()).or_default()),
            Err(e) => {
                tracing::error!(error = %e, "turn lock map poisoned, running unserialized");
                return None;
            }
        };
        Some(lock.lock_owned().await)
    }
}

/// Start a streaming turn. The returned receiver yields every event of the
/// turn and closes after the terminal one.
pub fn spawn_turn(
    ctx: AppContext,
    persona: Persona,
    message: String,
) -> (mpsc::Receiver<ChatEvent>, JoinHandle<TurnOutcome>) {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let span = tracing::info_span!(
        "chat_turn",
        persona_id = %persona.id,
        request_id = %uuid::Uuid::now_v7()
    );
    let handle = tokio::spawn(run_turn(ctx, persona, message, tx).instrument(span));
    (rx, handle)
}
