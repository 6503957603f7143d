//! Record types for the persistent store.
//!
//! [`Persona`] (identity), [`Turn`] (one conversation message),
//! [`StateDocument`] (one of the three structured state documents, keyed by
//! [`StateKind`]) and [`Memory`] (an atomic fact eligible for retrieval).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A configured character driving one conversation thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub nsfw: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    /// First assistant turn of every conversation.
    pub introduction: String,
    /// Scene-setting system text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

/// One stored conversation message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub id: i64,
    pub role: Role,
    pub content: String,
    /// RFC 3339, UTC, microsecond precision.
    pub timestamp: String,
}

/// The three structured state documents every persona may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Character,
    Relationship,
    Outfit,
}

impl StateKind {
    pub const ALL: [StateKind; 3] = [Self::Character, Self::Relationship, Self::Outfit];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Relationship => "relationship",
            Self::Outfit => "outfit",
        }
    }

    /// Backing table (one row per persona).
    pub(crate) fn table(&self) -> &'static str {
        match self {
            Self::Character => "characters",
            Self::Relationship => "relationships",
            Self::Outfit => "outfits",
        }
    }
}

impl std::fmt::Display for StateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StateKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "character" => Ok(Self::Character),
            "relationship" => Ok(Self::Relationship),
            "outfit" => Ok(Self::Outfit),
            _ => Err(format!("unknown state kind: {s}")),
        }
    }
}

/// A structured state document.
///
/// `core_context` holds slowly-changing identity facts, `dynamic_traits`
/// short standalone facts that are mirrored as `static_persona` memories.
/// Fields the authoring surface adds beyond these round-trip through `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    #[serde(default)]
    pub core_context: Map<String, Value>,
    #[serde(default)]
    pub dynamic_traits: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The structured state of one persona, each document optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PersonaState {
    pub character: Option<StateDocument>,
    pub relationship: Option<StateDocument>,
    pub outfit: Option<StateDocument>,
}

impl PersonaState {
    pub fn get(&self, kind: StateKind) -> Option<&StateDocument> {
        match kind {
            StateKind::Character => self.character.as_ref(),
            StateKind::Relationship => self.relationship.as_ref(),
            StateKind::Outfit => self.outfit.as_ref(),
        }
    }

    pub fn set(&mut self, kind: StateKind, doc: Option<StateDocument>) {
        match kind {
            StateKind::Character => self.character = doc,
            StateKind::Relationship => self.relationship = doc,
            StateKind::Outfit => self.outfit = doc,
        }
    }

    pub fn is_empty(&self) -> bool {
        StateKind::ALL.iter().all(|k| self.get(*k).is_none())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// Authored fact about the persona.
    Static,
    /// Excerpt of one completed exchange.
    Conversation,
    /// Mirror of a structured-state trait, regenerated on every trait change.
    StaticPersona,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Conversation => "conversation",
            Self::StaticPersona => "static_persona",
        }
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "static" => Ok(Self::Static),
            "conversation" => Ok(Self::Conversation),
            "static_persona" => Ok(Self::StaticPersona),
            _ => Err(format!("unknown memory kind: {s}")),
        }
    }
}

/// A row of the `memories` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Memory {
    pub id: i64,
    pub persona_id: String,
    pub kind: MemoryKind,
    pub content: String,
    pub created_at: String,
}

/// Persona plus its structured state, as served to the authoring surface.
#[derive(Debug, Clone, Serialize)]
pub struct FullData {
    pub persona: Persona,
    pub character: Option<StateDocument>,
    pub relationship: Option<StateDocument>,
    pub outfit: Option<StateDocument>,
}

/// One entry of the chat list: a persona and its latest turn.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub persona_id: String,
    pub name: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub last_message: String,
    pub last_role: Role,
    pub last_timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_document_keeps_unknown_fields() {
        let raw = serde_json::json!({
            "core_context": {"name": "Mei", "age": 24},
            "dynamic_traits": ["Loves rainy afternoons"],
            "appearance": {"hair": {"color": "black"}}
        });
        let doc: StateDocument = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(doc.dynamic_traits, vec!["Loves rainy afternoons"]);
        assert!(doc.extra.contains_key("appearance"));
        assert_eq!(serde_json::to_value(&doc).unwrap(), raw);
    }

    #[test]
    fn state_document_defaults_missing_sections() {
        let doc: StateDocument = serde_json::from_str("{}").unwrap();
        assert!(doc.core_context.is_empty());
        assert!(doc.dynamic_traits.is_empty());
    }

    #[test]
    fn kinds_parse_from_sql_strings() {
        for kind in [MemoryKind::Static, MemoryKind::Conversation, MemoryKind::StaticPersona] {
            assert_eq!(kind.as_str().parse::<MemoryKind>().unwrap(), kind);
        }
        for kind in StateKind::ALL {
            assert_eq!(kind.as_str().parse::<StateKind>().unwrap(), kind);
        }
        assert!("episodic".parse::<MemoryKind>().is_err());
        assert_eq!("assistant".parse::<Role>().unwrap(), Role::Assistant);
    }
}
