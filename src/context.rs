//! The service context handed to every request handler and CLI command.

use std::sync::Arc;

use anyhow::Result;

use crate::chat::TurnLocks;
use crate::config::ReverieConfig;
use crate::embedding::{self, Embedder};
use crate::index::{MemoryIndexer, VectorIndex};
use crate::llm::{self, ChatBackend};
use crate::prompt::PromptAssembler;
use crate::store::Store;

/// Store, embedder, index and LLM handles, built once and cloned cheaply.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ReverieConfig>,
    pub store: Store,
    pub embedder: Arc<dyn Embedder>,
    pub index: VectorIndex,
    pub indexer: MemoryIndexer,
    pub llm: Arc<dyn ChatBackend>,
    pub prompts: PromptAssembler,
    pub turn_locks: TurnLocks,
}

impl AppContext {
    pub fn new(
        config: ReverieConfig,
        store: Store,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn ChatBackend>,
    ) -> Self {
        let index = VectorIndex::new(store.clone());
        let indexer = MemoryIndexer::new(store.clone(), index.clone(), Arc::clone(&embedder));
        let prompts = PromptAssembler::new(
            store.clone(),
            indexer.clone(),
            config.retrieval.max_memories,
        );
        Self {
            config: Arc::new(config),
            store,
            embedder,
            index,
            indexer,
            llm,
            prompts,
            turn_locks: TurnLocks::default(),
        }
    }

    /// Open the configured database and build the Ollama clients.
    pub fn from_config(config: ReverieConfig) -> Result<Self> {
        let store = Store::open(config.resolved_db_path())?;
        let embedder = embedding::create_embedder(&config.ollama)?;
        let llm = llm::create_backend(&config.ollama)?;
        Ok(Self::new(config, store, embedder, llm))
    }
}
