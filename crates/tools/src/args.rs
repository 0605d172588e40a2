//! Argument helpers shared by the operations.

use deckhand_core::collection::{Collection, NoteId};
use deckhand_core::error::{StoreError, ToolError};
use serde_json::Value;

pub fn required_str<'a>(arguments: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    arguments[key]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
}

pub fn optional_str<'a>(arguments: &'a Value, key: &str) -> Option<&'a str> {
    arguments[key]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Tags given as an array of strings or one comma/space separated string.
/// Leading `#` is dropped.
pub fn tags(arguments: &Value, key: &str) -> Vec<String> {
    let raw: Vec<String> = match &arguments[key] {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Value::String(s) => s
            .split(|c: char| c == ',' || c.is_whitespace())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };
    let mut out: Vec<String> = Vec::new();
    for tag in raw {
        let tag = tag.trim().trim_start_matches('#').to_string();
        if !tag.is_empty() && !out.iter().any(|t| t.eq_ignore_ascii_case(&tag)) {
            out.push(tag);
        }
    }
    out
}

/// The notes a batch operation targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Targets {
    /// Existing notes, in request order
    pub found: Vec<NoteId>,
    /// Requested entries that are not existing notes
    pub skipped: usize,
}

/// Resolve `note_ids` (preferred) or `query` to existing note ids.
///
/// Ids that are not integers or name no existing note are counted as
/// skipped rather than failing the batch.
pub fn resolve_targets(
    collection: &dyn Collection,
    arguments: &Value,
) -> Result<Targets, ToolError> {
    if let Some(ids) = arguments["note_ids"].as_array() {
        let mut found = Vec::new();
        let mut skipped = 0;
        for raw in ids {
            let id = raw
                .as_i64()
                .or_else(|| raw.as_str().and_then(|s| s.trim().parse().ok()));
            match id {
                Some(id) if found.contains(&id) => {}
                Some(id) if collection.note(id)?.is_some() => found.push(id),
                _ => skipped += 1,
            }
        }
        return Ok(Targets { found, skipped });
    }

    if let Some(query) = optional_str(arguments, "query") {
        let found = collection.find_notes(query)?;
        return Ok(Targets { found, skipped: 0 });
    }

    Err(ToolError::InvalidArguments(
        "Provide either 'note_ids' or 'query'".into(),
    ))
}

/// Notes of `note_type` whose `field` equals `value` (case-insensitive, trimmed).
pub fn find_by_field(
    collection: &dyn Collection,
    note_type: &str,
    field: &str,
    value: &str,
) -> Result<Vec<NoteId>, StoreError> {
    let wanted = value.trim().to_lowercase();
    let mut matches = Vec::new();
    for id in collection.find_notes(&format!("\"note:{note_type}\""))? {
        if let Some(note) = collection.note(id)? {
            if note
                .field(field)
                .is_some_and(|v| v.trim().to_lowercase() == wanted)
            {
                matches.push(id);
            }
        }
    }
    Ok(matches)
}

/// Schema fragment for operations that target notes by id or query.
pub fn target_properties() -> Value {
    serde_json::json!({
        "note_ids": {
            "type": "array",
            "items": { "type": "integer" },
            "description": "Explicit note ids. Ids that do not exist are skipped."
        },
        "query": {
            "type": "string",
            "description": "Search query selecting the notes (used when note_ids is absent)"
        }
    })
}
