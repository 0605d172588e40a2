//! Progress payload analysis.
//!
//! A reassembled or uploaded JSON payload is usually an export from a
//! character-learning app. It is saved as a timestamped snapshot, described,
//! compared with the previous snapshot, and checked against the collection
//! for multi-character vocabulary built only from mastered characters.

use deckhand_core::collection::{CollectionGuard, KnowledgeStore, NoteId};
use deckhand_core::error::StoreError;
use deckhand_core::pending::PendingAction;
use regex_lite::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const TOP_LEVEL_KEYS: usize = 20;
const NESTED_KEYS: usize = 10;
const SAMPLE_SIZE: usize = 20;
const NEWLY_MASTERED_SHOWN: usize = 30;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Failed to write snapshot {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("Failed to read snapshot {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Analysis text plus an optional follow-up the user can confirm.
#[derive(Debug, Clone)]
pub struct PayloadReport {
    pub text: String,
    pub confirmation: Option<PendingAction>,
}

pub fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c) || ('\u{3400}'..='\u{4dbf}').contains(&c)
}

fn has_cjk(s: &str) -> bool {
    s.chars().any(is_cjk)
}

/// Words with their learning progress, found anywhere in `data`.
///
/// CJK object keys count as words (a `_reverse` suffix is ignored) and take
/// their progress from a `progressPercent` member, defaulting to fully
/// learned. CJK string values count as fully learned unless already seen.
pub fn extract_words(data: &Value) -> BTreeMap<String, f64> {
    let mut words = BTreeMap::new();
    match data {
        Value::Object(map) => {
            for (key, value) in map {
                let clean = key.replace("_reverse", "").trim().to_string();
                let word_key = !clean.is_empty() && has_cjk(&clean);
                if word_key {
                    let progress = value
                        .as_object()
                        .and_then(|o| o.get("progressPercent"))
                        .map_or(1.0, |p| p.as_f64().unwrap_or(0.0));
                    if words.get(&clean).is_none_or(|&seen| progress > seen) {
                        words.insert(clean, progress);
                    }
                }
                match value {
                    Value::String(s) if has_cjk(s) => {
                        words.entry(s.trim().to_string()).or_insert(1.0);
                    }
                    Value::Object(_) | Value::Array(_) if !word_key => {
                        words.extend(extract_words(value));
                    }
                    _ => {}
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::String(s) if has_cjk(s) => {
                        words.entry(s.trim().to_string()).or_insert(1.0);
                    }
                    Value::Object(_) | Value::Array(_) => words.extend(extract_words(item)),
                    _ => {}
                }
            }
        }
        _ => {}
    }
    words
}

fn mastered(words: &BTreeMap<String, f64>) -> BTreeSet<String> {
    words
        .iter()
        .filter(|(_, p)| **p >= 1.0)
        .map(|(w, _)| w.clone())
        .collect()
}

/// Unique CJK characters across `words`.
pub fn characters<'a>(words: impl IntoIterator<Item = &'a String>) -> BTreeSet<char> {
    words
        .into_iter()
        .flat_map(|w| w.chars())
        .filter(|c| is_cjk(*c))
        .collect()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Object(_) => "object",
        Value::Array(_) => "array",
        Value::String(_) => "string",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::Null => "null",
    }
}

/// One-line shape of a value, nested up to `max_depth`.
pub fn describe_value(value: &Value, depth: usize, max_depth: usize) -> String {
    if depth >= max_depth {
        return type_name(value).to_string();
    }
    match value {
        Value::Object(map) if map.is_empty() => "{}".into(),
        Value::Object(map) => {
            let items: Vec<String> = map
                .iter()
                .take(NESTED_KEYS)
                .map(|(k, v)| format!("{k}: {}", describe_value(v, depth + 1, max_depth)))
                .collect();
            let more = if map.len() > NESTED_KEYS {
                format!(" ... +{} more", map.len() - NESTED_KEYS)
            } else {
                String::new()
            };
            format!("{{ {}{more} }}", items.join(", "))
        }
        Value::Array(items) => match items.first() {
            None => "[]".into(),
            Some(first) => format!(
                "[{}, ...] ({} items)",
                describe_value(first, depth + 1, max_depth),
                items.len()
            ),
        },
        Value::String(s) if s.chars().count() > 50 => {
            format!("\"{}...\"", s.chars().take(50).collect::<String>())
        }
        Value::String(s) => format!("\"{s}\""),
        other => other.to_string(),
    }
}

/// Structure description and word counts.
pub fn analyze_structure(data: &Value) -> String {
    let mut lines = vec![format!("Type: {}", type_name(data))];
    match data {
        Value::Object(map) => {
            lines.push(format!("Top-level keys ({}):", map.len()));
            for (key, value) in map.iter().take(TOP_LEVEL_KEYS) {
                lines.push(format!("  {key}: {}", describe_value(value, 1, 3)));
            }
            if map.len() > TOP_LEVEL_KEYS {
                lines.push(format!("  ... +{} more keys", map.len() - TOP_LEVEL_KEYS));
            }
        }
        Value::Array(items) => {
            lines.push(format!("Array with {} items", items.len()));
            if let Some(first) = items.first() {
                lines.push(format!("First item: {}", describe_value(first, 0, 4)));
            }
        }
        _ => {}
    }

    let words = extract_words(data);
    let done = mastered(&words);
    let partial = words.values().filter(|p| **p > 0.0 && **p < 1.0).count();
    lines.push(String::new());
    lines.push(format!("CJK words found: {}", words.len()));
    lines.push(format!("Fully mastered (100%): {}", done.len()));
    lines.push(format!("Partially learned: {partial}"));
    lines.push(format!("Unique mastered characters: {}", characters(&done).len()));
    if !done.is_empty() {
        let sample: Vec<&str> = done.iter().take(SAMPLE_SIZE).map(String::as_str).collect();
        lines.push(format!("Sample mastered: {}", sample.join(", ")));
    }
    lines.join("\n")
}

/// Mastery changes since `previous`.
pub fn diff_words(current: &Value, previous: &Value, previous_name: &str) -> Vec<String> {
    let now = mastered(&extract_words(current));
    let before = mastered(&extract_words(previous));
    let newly: Vec<&String> = now.difference(&before).collect();
    let lost = before.difference(&now).count();
    let new_chars: String = characters(&now)
        .difference(&characters(&before))
        .collect();

    let mut lines = vec![
        format!("Previous snapshot: {previous_name}"),
        format!("Mastered before: {} -> now: {}", before.len(), now.len()),
        format!("Newly mastered: {}", newly.len()),
        format!("Lost mastery: {lost}"),
        format!("New characters: {}", new_chars.chars().count()),
    ];
    if !newly.is_empty() {
        let shown: Vec<&str> = newly
            .iter()
            .take(NEWLY_MASTERED_SHOWN)
            .map(|w| w.as_str())
            .collect();
        lines.push(String::new());
        lines.push(format!("Newly mastered: {}", shown.join(", ")));
        if newly.len() > NEWLY_MASTERED_SHOWN {
            lines.push(format!("  ... +{} more", newly.len() - NEWLY_MASTERED_SHOWN));
        }
    }
    if !new_chars.is_empty() {
        lines.push(format!("New chars: {new_chars}"));
    }
    lines
}

fn strip_html(text: &str) -> String {
    match Regex::new(r"<[^>]+>") {
        Ok(re) => re.replace_all(text, "").trim().to_string(),
        Err(_) => text.trim().to_string(),
    }
}

/// Saves, analyses and follows up on progress payloads.
pub struct PayloadProcessor {
    snapshots_dir: PathBuf,
    store: Arc<dyn KnowledgeStore>,
    vocab_note_type: String,
    known_words_tag: String,
}

impl PayloadProcessor {
    pub fn new(
        snapshots_dir: PathBuf,
        store: Arc<dyn KnowledgeStore>,
        vocab_note_type: impl Into<String>,
        known_words_tag: impl Into<String>,
    ) -> Self {
        Self {
            snapshots_dir,
            store,
            vocab_note_type: vocab_note_type.into(),
            known_words_tag: known_words_tag.into(),
        }
    }

    /// Write `data` to `<dir>/YYYYmmdd_HHMMSS.json`, suffixed on collision.
    pub fn save_snapshot(&self, data: &Value) -> Result<PathBuf, SnapshotError> {
        let write_err = |path: &Path, reason: String| SnapshotError::Write {
            path: path.to_path_buf(),
            reason,
        };
        std::fs::create_dir_all(&self.snapshots_dir)
            .map_err(|e| write_err(&self.snapshots_dir, e.to_string()))?;

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut path = self.snapshots_dir.join(format!("{stamp}.json"));
        let mut n = 1;
        while path.exists() {
            path = self.snapshots_dir.join(format!("{stamp}_{n}.json"));
            n += 1;
        }
        let body = serde_json::to_string_pretty(data).map_err(|e| write_err(&path, e.to_string()))?;
        std::fs::write(&path, body).map_err(|e| write_err(&path, e.to_string()))?;
        Ok(path)
    }

    /// The newest snapshot other than `current`.
    pub fn previous_snapshot(&self, current: &Path) -> Option<PathBuf> {
        let entries = std::fs::read_dir(&self.snapshots_dir).ok()?;
        entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json") && p != current)
            .max()
    }

    fn load(path: &Path) -> Result<Value, SnapshotError> {
        let read_err = |reason: String| SnapshotError::Read {
            path: path.to_path_buf(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| read_err(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| read_err(e.to_string()))
    }

    /// Vocabulary notes whose characters are all known, and how many of
    /// those already carry the known-words tag.
    pub async fn find_candidates(
        &self,
        known: &BTreeSet<char>,
    ) -> Result<(Vec<(NoteId, String)>, usize), SnapshotError> {
        let col = CollectionGuard::acquire(self.store.as_ref()).await?;
        let ids = col.find_notes(&format!("note:\"{}\"", self.vocab_note_type))?;
        let mut candidates = Vec::new();
        let mut already_tagged = 0;
        for id in ids {
            let Some(note) = col.note(id)? else {
                continue;
            };
            let Some(simplified) = note.field("Simplified").map(strip_html) else {
                continue;
            };
            let chars: BTreeSet<char> = simplified.chars().filter(|c| is_cjk(*c)).collect();
            if chars.len() < 2 || simplified.chars().count() < 2 || !chars.is_subset(known) {
                continue;
            }
            if note.has_tag(&self.known_words_tag) {
                already_tagged += 1;
            } else {
                candidates.push((id, simplified));
            }
        }
        col.close()?;
        Ok((candidates, already_tagged))
    }

    /// Save and analyse a payload.
    pub async fn process(&self, data: &Value) -> Result<PayloadReport, SnapshotError> {
        let path = self.save_snapshot(data)?;
        let name = file_name(&path);
        info!(snapshot = %name, "Saved snapshot");

        let mut sections = vec![
            format!("Saved snapshot: {name}"),
            format!("=== Structure ===\n{}", analyze_structure(data)),
        ];

        if let Some(previous) = self.previous_snapshot(&path) {
            match Self::load(&previous) {
                Ok(before) => {
                    let lines = diff_words(data, &before, &file_name(&previous));
                    sections.push(format!("=== Diff vs Previous ===\n{}", lines.join("\n")));
                }
                Err(e) => warn!(error = %e, "Skipping diff against unreadable snapshot"),
            }
        }

        let known = characters(&mastered(&extract_words(data)));
        let mut confirmation = None;
        if !known.is_empty() {
            let (candidates, already) = self.find_candidates(&known).await?;
            let tag = &self.known_words_tag;
            sections.push(format!(
                "=== Known-word candidates (multi-char words from {} mastered chars) ===\n\
                 Already tagged '{tag}': {already}\nNew candidates: {}",
                known.len(),
                candidates.len()
            ));
            if !candidates.is_empty() {
                let mut preview: Vec<String> = candidates
                    .iter()
                    .take(SAMPLE_SIZE)
                    .map(|(id, word)| format!("  {word} (note {id})"))
                    .collect();
                if candidates.len() > SAMPLE_SIZE {
                    preview.push(format!("  ... +{} more", candidates.len() - SAMPLE_SIZE));
                }
                confirmation = Some(PendingAction::KnownWordsTagConfirm {
                    note_ids: candidates.iter().map(|(id, _)| *id).collect(),
                    tag: tag.clone(),
                    preview: preview.join("\n"),
                });
            }
        }

        Ok(PayloadReport {
            text: sections.join("\n\n"),
            confirmation,
        })
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
