//! Output post-processing: splits a finished model response into narration
//! and an optional `<state>{...}</state>` block, validates the block, and
//! sanitizes the narration.
//!
//! Only the fully accumulated text is scanned, once per turn.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::Error;
use crate::store::types::StateDocument;

/// Keys a state block may carry.
pub const DELTA_KEYS: [&str; 2] = ["outfit", "events"];

static STATE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<state>(.*?)</state>").unwrap());
static OPEN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<state>").unwrap());
static CLOSE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</state>").unwrap());

static HEADER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*#.*$").unwrap());
static ROLE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[ \t]*(instruction|response|system|assistant|user)[ \t]*:.*$")
        .unwrap()
});
static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*[-*•][ \t]+").unwrap());
static BLANK_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n(?:[ \t]*\n){2,}").unwrap());

static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""[^"]+""#).unwrap());
static META: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)###|(?:instruction|response|system|assistant)\s*:")
        .unwrap()
});

/// A validated state delta. The default value means "no change".
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StateDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outfit: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<String>,
}

impl StateDelta {
    pub fn is_empty(&self) -> bool {
        self.outfit.is_none() && self.events.is_empty()
    }

    /// JSON object form; `{}` when empty.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

/// Result of [`process`].
#[derive(Debug)]
pub struct Processed {
    /// Sanitized narration with any state block removed.
    pub narration: String,
    pub delta: StateDelta,
    /// Set when a state block was present but rejected.
    pub error: Option<Error>,
}

/// Split `raw` into narration and state delta.
///
/// A missing block is not an error. A block that is unclosed, repeated,
/// not a JSON object, or carries keys outside [`DELTA_KEYS`] is discarded
/// and reported through `error`; the narration is returned either way.
pub fn process(raw: &str) -> Processed {
    let (narration, extracted) = extract_block(raw);
    let (delta, error) = match extracted {
        Extracted::None => (StateDelta::default(), None),
        Extracted::Invalid(reason) => (StateDelta::default(), Some(reason)),
        Extracted::Block(inner) => match validate_delta(&inner) {
            Ok(delta) => (delta, None),
            Err(reason) => (StateDelta::default(), Some(reason)),
        },
    };

    Processed {
        narration: sanitize(&narration),
        delta,
        error: error.map(Error::InvalidStateDelta),
    }
}

enum Extracted {
    None,
    Block(String),
    Invalid(String),
}

fn extract_block(raw: &str) -> (String, Extracted) {
    let blocks: Vec<String> = STATE_BLOCK
        .captures_iter(raw)
        .map(|c| c.get(1).map(|m| m.as_str().to_string()).unwrap_or_default())
        .collect();

    let without_blocks = STATE_BLOCK.replace_all(raw, "").into_owned();

    // An opening tag left after removing complete blocks is unclosed; drop
    // everything from it onwards.
    let (narration, unclosed) = match OPEN_TAG.find(&without_blocks) {
        Some(m) => (without_blocks[..m.start()].to_string(), true),
        None => (without_blocks, false),
    };
    let narration = CLOSE_TAG.replace_all(&narration, "").into_owned();

    let extracted = match (blocks.len(), unclosed) {
        (_, true) => Extracted::Invalid("unclosed <state> block".into()),
        (0, false) => Extracted::None,
        (1, false) => Extracted::Block(blocks.into_iter().next().unwrap_or_default()),
        (n, false) => Extracted::Invalid(format!("{n} <state> blocks, expected at most one")),
    };
    (narration, extracted)
}

fn validate_delta(inner: &str) -> Result<StateDelta, String> {
    let value: Value =
        serde_json::from_str(inner.trim()).map_err(|e| format!("state block is not JSON: {e}"))?;
    let Value::Object(map) = value else {
        return Err("state block must be a JSON object".into());
    };

    if let Some(key) = map.keys().find(|k| !DELTA_KEYS.contains(&k.as_str())) {
        return Err(format!("unexpected key {key:?} in state block"));
    }

    let outfit = match map.get("outfit") {
        None | Some(Value::Null) => None,
        Some(Value::Object(patch)) => Some(patch.clone()),
        Some(_) => return Err("outfit must be an object".into()),
    };

    let events = match map.get("events") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.trim().to_string()),
                _ => Err("events must be strings".to_string()),
            })
            .filter(|e| !matches!(e, Ok(s) if s.is_empty()))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err("events must be an array".into()),
    };

    Ok(StateDelta { outfit, events })
}

/// Recursive merge of `patch` into `target`, returning a new value.
///
/// `null` removes a key, objects merge key by key, anything else replaces.
/// Neither argument is modified.
pub fn merge_patch(target: &Value, patch: &Value) -> Value {
    let Value::Object(patch_map) = patch else {
        return patch.clone();
    };
    let mut merged = match target {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    for (key, value) in patch_map {
        if value.is_null() {
            merged.remove(key);
        } else {
            let current = merged.get(key).cloned().unwrap_or(Value::Null);
            merged.insert(key.clone(), merge_patch(&current, value));
        }
    }
    Value::Object(merged)
}

/// Apply an outfit patch to the outfit document's `core_context`.
pub fn apply_outfit_patch(doc: &StateDocument, patch: &Map<String, Value>) -> StateDocument {
    let current = Value::Object(doc.core_context.clone());
    let merged = merge_patch(&current, &Value::Object(patch.clone()));
    StateDocument {
        core_context: match merged {
            Value::Object(map) => map,
            _ => Map::new(),
        },
        dynamic_traits: doc.dynamic_traits.clone(),
        extra: doc.extra.clone(),
    }
}

/// Strip header and role-label lines and bullet markers, collapse runs of
/// blank lines to a single one, and trim.
pub fn sanitize(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    let text = HEADER_LINE.replace_all(&text, "");
    let text = ROLE_LINE.replace_all(&text, "");
    let text = BULLET.replace_all(&text, "");
    let text = BLANK_RUN.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Whether a reply already follows the narration format: at least one
/// quoted line of dialogue, at most one question, no meta labels, no
/// bullet lines.
pub fn looks_narrative_ok(text: &str) -> bool {
    if text.trim().is_empty() || !QUOTED.is_match(text) {
        return false;
    }
    if text.matches('?').count() > 1 {
        return false;
    }
    !META.is_match(text) && !BULLET.is_match(text)
}
