use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Upper bound for the number of memories injected into one prompt.
pub const MAX_RETRIEVAL_K: usize = 20;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ReverieConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub ollama: OllamaConfig,
    pub generation: GenerationConfig,
    pub retrieval: RetrievalConfig,
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// Interval of the SSE keep-alive comment.
    pub keep_alive_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OllamaConfig {
    pub host: String,
    pub chat_model: String,
    pub embed_model: String,
    pub request_timeout_secs: u64,
}

/// Sampling options forwarded to the LLM runtime on every turn.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub repeat_penalty: f32,
    pub context_window: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub max_memories: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChatConfig {
    /// Global gate for explicit content. A persona's own nsfw flag only
    /// takes effect when this is also set.
    pub allow_nsfw: bool,
    /// Allow one rewrite pass on the non-streaming reply path.
    pub rewrite_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            log_level: "info".into(),
            keep_alive_secs: 15,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_reverie_dir()
            .join("reverie.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".into(),
            chat_model: "llama3.1".into(),
            embed_model: "nomic-embed-text".into(),
            request_timeout_secs: 300,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            repeat_penalty: 1.15,
            context_window: 8192,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { max_memories: 5 }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            allow_nsfw: true,
            rewrite_enabled: true,
        }
    }
}

/// Returns `~/.reverie/`
pub fn default_reverie_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".reverie")
}

/// Returns the default config file path: `~/.reverie/config.toml`
pub fn default_config_path() -> PathBuf {
    default_reverie_dir().join("config.toml")
}

impl ReverieConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            ReverieConfig::default()
        };

        config.apply_env_overrides();
        config.normalize();
        Ok(config)
    }

    /// Apply environment variable overrides
    /// (REVERIE_DB, REVERIE_LOG_LEVEL, REVERIE_MODEL, REVERIE_PORT, OLLAMA_HOST).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("REVERIE_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("REVERIE_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("REVERIE_MODEL") {
            self.ollama.chat_model = val;
        }
        if let Ok(val) = std::env::var("REVERIE_PORT") {
            match val.parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!(value = %val, "ignoring invalid REVERIE_PORT"),
            }
        }
        if let Ok(val) = std::env::var("OLLAMA_HOST") {
            self.ollama.host = val;
        }
    }

    /// Clamp values that would otherwise break retrieval or streaming.
    fn normalize(&mut self) {
        let k = self.retrieval.max_memories;
        if !(1..=MAX_RETRIEVAL_K).contains(&k) {
            let clamped = k.clamp(1, MAX_RETRIEVAL_K);
            warn!(configured = k, clamped, "retrieval.max_memories out of range");
            self.retrieval.max_memories = clamped;
        }
        if self.server.keep_alive_secs == 0 {
            self.server.keep_alive_secs = 15;
        }
        self.ollama.host = self.ollama.host.trim_end_matches('/').to_string();
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    /// Whether explicit content may be enabled for a persona flagged nsfw.
    pub fn nsfw_allowed_for(&self, persona_nsfw: bool) -> bool {
        persona_nsfw && self.chat.allow_nsfw
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ReverieConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.server.keep_alive_secs, 15);
        assert_eq!(config.retrieval.max_memories, 5);
        assert_eq!(config.ollama.embed_model, "nomic-embed-text");
        assert!(config.storage.db_path.ends_with("reverie.db"));
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[server]
log_level = "debug"
port = 9000

[ollama]
host = "http://gpu-box:11434/"
chat_model = "mistral"

[generation]
temperature = 0.5
"#;
        let mut config: ReverieConfig = toml::from_str(toml_str).unwrap();
        config.normalize();
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.ollama.chat_model, "mistral");
        assert_eq!(config.ollama.host, "http://gpu-box:11434");
        assert_eq!(config.generation.temperature, 0.5);
        // defaults still apply for unset fields
        assert_eq!(config.generation.top_p, 0.9);
        assert_eq!(config.ollama.embed_model, "nomic-embed-text");
    }

    #[test]
    fn retrieval_k_is_clamped() {
        let mut config: ReverieConfig =
            toml::from_str("[retrieval]\nmax_memories = 500\n").unwrap();
        config.normalize();
        assert_eq!(config.retrieval.max_memories, MAX_RETRIEVAL_K);

        let mut config: ReverieConfig =
            toml::from_str("[retrieval]\nmax_memories = 0\n").unwrap();
        config.normalize();
        assert_eq!(config.retrieval.max_memories, 1);
    }

    #[test]
    fn nsfw_requires_both_flags() {
        let mut config = ReverieConfig::default();
        assert!(config.nsfw_allowed_for(true));
        assert!(!config.nsfw_allowed_for(false));
        config.chat.allow_nsfw = false;
        assert!(!config.nsfw_allowed_for(true));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = ReverieConfig::default();
        std::env::set_var("REVERIE_DB", "/tmp/override.db");
        std::env::set_var("REVERIE_LOG_LEVEL", "trace");
        std::env::set_var("REVERIE_PORT", "not-a-port");
        std::env::set_var("OLLAMA_HOST", "http://ollama:11434");

        config.apply_env_overrides();

        assert_eq!(config.storage.db_path, "/tmp/override.db");
        assert_eq!(config.server.log_level, "trace");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.ollama.host, "http://ollama:11434");

        // Clean up
        std::env::remove_var("REVERIE_DB");
        std::env::remove_var("REVERIE_LOG_LEVEL");
        std::env::remove_var("REVERIE_PORT");
        std::env::remove_var("OLLAMA_HOST");
    }
}
