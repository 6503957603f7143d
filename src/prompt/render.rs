//! Renders persona identity and structured state as labeled plain text.
//!
//! Output is always `Label: value` lines under section headings, never
//! JSON, so the model has nothing to echo back verbatim.

use serde_json::{Map, Value};

use crate::store::types::{Persona, PersonaState, StateDocument, StateKind};

fn section_title(kind: StateKind) -> &'static str {
    match kind {
        StateKind::Character => "Character",
        StateKind::Relationship => "Relationship with the user",
        StateKind::Outfit => "Current outfit",
    }
}

/// `hair_color` → `Hair color`.
fn humanize(key: &str) -> String {
    let spaced = key.replace(['_', '-'], " ");
    let mut chars = spaced.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(true) => Some("yes".into()),
        Value::Bool(false) => Some("no".into()),
        _ => None,
    }
}

fn render_map(map: &Map<String, Value>, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    for (key, value) in map {
        let label = humanize(key);
        match value {
            Value::Object(inner) if !inner.is_empty() => {
                out.push_str(&format!("{indent}- {label}:\n"));
                render_map(inner, depth + 1, out);
            }
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().filter_map(scalar).collect();
                if !parts.is_empty() {
                    out.push_str(&format!("{indent}- {label}: {}\n", parts.join(", ")));
                }
            }
            other => {
                if let Some(text) = scalar(other) {
                    out.push_str(&format!("{indent}- {label}: {text}\n"));
                }
            }
        }
    }
}

/// Render one document. Falls back to the document's other fields when
/// `core_context` is empty. Returns `None` if nothing renders.
pub fn render_document(kind: StateKind, doc: &StateDocument) -> Option<String> {
    let source = if doc.core_context.is_empty() {
        &doc.extra
    } else {
        &doc.core_context
    };
    let mut body = String::new();
    render_map(source, 0, &mut body);
    if body.is_empty() {
        return None;
    }
    Some(format!("{}\n{}", section_title(kind), body.trim_end()))
}

/// The persona identity segment: name and label, then every state
/// document that renders.
pub fn render_identity(persona: &Persona, state: &PersonaState) -> String {
    let mut header = format!("You are {}", persona.name);
    if !persona.label.trim().is_empty() {
        header.push_str(&format!(", {}", persona.label.trim()));
    }
    header.push('.');

    let sections: Vec<String> = StateKind::ALL
        .iter()
        .filter_map(|kind| state.get(*kind).and_then(|doc| render_document(*kind, doc)))
        .collect();

    if sections.is_empty() {
        header
    } else {
        format!("{header}\n\n{}", sections.join("\n\n"))
    }
}
