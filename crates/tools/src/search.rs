//! Read-only operations: search, fetch, decks, note types, tags, stats.

use crate::args::{optional_str, required_str};
use crate::{Tool, ToolContext, ToolOutput};
use async_trait::async_trait;
use deckhand_core::collection::{Collection, Note};
use deckhand_core::error::{StoreError, ToolError};
use serde_json::{Value, json};

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 100;

/// A note as the reasoning service sees it.
pub fn note_json(collection: &dyn Collection, note: &Note) -> Result<Value, StoreError> {
    let cards = collection.cards_of_note(note.id)?;
    let fields: serde_json::Map<String, Value> = note
        .fields
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    Ok(json!({
        "id": note.id,
        "note_type": note.note_type,
        "fields": fields,
        "tags": note.tags,
        "deck": cards.first().map(|c| c.deck.as_str()),
        "cards": cards.len(),
        "suspended": !cards.is_empty() && cards.iter().all(|c| c.suspended),
    }))
}

pub struct SearchNotesTool;

#[async_trait]
impl Tool for SearchNotesTool {
    fn name(&self) -> &str {
        "search_notes"
    }

    fn description(&self) -> &str {
        "Search the flashcard collection. Query terms: deck:NAME, tag:NAME, note:TYPE, \
         is:new|learn|review|due|suspended, nid:1,2, Field:value, or plain text. \
         '*' is a wildcard, '-' negates a term, quotes group words."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query, e.g. 'deck:Chinese tag:hsk1' or '猫'"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum notes to return (default 20, max 100)",
                    "default": 20
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        ctx: &mut ToolContext<'_>,
        arguments: Value,
    ) -> Result<ToolOutput, ToolError> {
        let query = required_str(&arguments, "query")?;
        let limit = arguments["limit"]
            .as_u64()
            .map(|l| l as usize)
            .unwrap_or(DEFAULT_LIMIT)
            .clamp(1, MAX_LIMIT);

        let ids = ctx.collection.find_notes(query)?;
        let mut notes = Vec::new();
        for id in ids.iter().take(limit) {
            if let Some(note) = ctx.collection.note(*id)? {
                notes.push(note_json(&*ctx.collection, &note)?);
            }
        }

        Ok(ToolOutput::ok(json!({
            "query": query,
            "total": ids.len(),
            "returned": notes.len(),
            "notes": notes,
        })))
    }
}

pub struct GetNotesTool;

#[async_trait]
impl Tool for GetNotesTool {
    fn name(&self) -> &str {
        "get_notes"
    }

    fn description(&self) -> &str {
        "Fetch full notes by id. Ids that do not exist are reported in 'missing'."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "note_ids": {
                    "type": "array",
                    "items": { "type": "integer" },
                    "description": "Note ids to fetch"
                }
            },
            "required": ["note_ids"]
        })
    }

    async fn execute(
        &self,
        ctx: &mut ToolContext<'_>,
        arguments: Value,
    ) -> Result<ToolOutput, ToolError> {
        let ids = arguments["note_ids"]
            .as_array()
            .ok_or_else(|| ToolError::InvalidArguments("'note_ids' must be an array".into()))?;

        let mut notes = Vec::new();
        let mut missing = Vec::new();
        for raw in ids {
            let note = match raw.as_i64() {
                Some(id) => ctx.collection.note(id)?,
                None => None,
            };
            match note {
                Some(note) => notes.push(note_json(&*ctx.collection, &note)?),
                None => missing.push(raw.clone()),
            }
        }

        Ok(ToolOutput::ok(json!({
            "found": notes.len(),
            "skipped": missing.len(),
            "missing": missing,
            "notes": notes,
        })))
    }
}

pub struct ListDecksTool;

#[async_trait]
impl Tool for ListDecksTool {
    fn name(&self) -> &str {
        "list_decks"
    }

    fn description(&self) -> &str {
        "List every deck with its card and new-card counts."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(
        &self,
        ctx: &mut ToolContext<'_>,
        _arguments: Value,
    ) -> Result<ToolOutput, ToolError> {
        let decks = ctx.collection.decks()?;
        Ok(ToolOutput::ok(json!({ "decks": decks })))
    }
}

pub struct ListNoteTypesTool;

#[async_trait]
impl Tool for ListNoteTypesTool {
    fn name(&self) -> &str {
        "list_note_types"
    }

    fn description(&self) -> &str {
        "List note types and their fields."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(
        &self,
        ctx: &mut ToolContext<'_>,
        _arguments: Value,
    ) -> Result<ToolOutput, ToolError> {
        let note_types = ctx.collection.note_types()?;
        Ok(ToolOutput::ok(json!({ "note_types": note_types })))
    }
}

pub struct ListTagsTool;

#[async_trait]
impl Tool for ListTagsTool {
    fn name(&self) -> &str {
        "list_tags"
    }

    fn description(&self) -> &str {
        "List every tag in the collection with how many notes carry it."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(
        &self,
        ctx: &mut ToolContext<'_>,
        _arguments: Value,
    ) -> Result<ToolOutput, ToolError> {
        let tags = ctx.collection.tags()?;
        Ok(ToolOutput::ok(json!({ "total": tags.len(), "tags": tags })))
    }
}

pub struct CollectionStatsTool;

#[async_trait]
impl Tool for CollectionStatsTool {
    fn name(&self) -> &str {
        "collection_stats"
    }

    fn description(&self) -> &str {
        "Card counts for the whole collection, or for the notes matching an optional query."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Optional search query to restrict the counts"
                }
            }
        })
    }

    async fn execute(
        &self,
        ctx: &mut ToolContext<'_>,
        arguments: Value,
    ) -> Result<ToolOutput, ToolError> {
        let stats = ctx.collection.stats()?;
        let mut payload = json!({ "collection": stats });
        if let Some(query) = optional_str(&arguments, "query") {
            let notes = ctx.collection.find_notes(query)?.len();
            let cards = ctx.collection.find_cards(query)?.len();
            let new = ctx.collection.find_cards(&format!("{query} is:new"))?.len();
            payload["matching"] = json!({
                "query": query,
                "notes": notes,
                "cards": cards,
                "new": new,
            });
        }
        Ok(ToolOutput::ok(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    #[tokio::test]
    async fn search_returns_matching_notes_with_limit() {
        let fx = Fixture::new();
        fx.seed_vocab(&[("猫", "cat"), ("小猫", "kitten"), ("狗", "dog")]);

        let out = fx
            .run(&SearchNotesTool, json!({"query": "猫", "limit": 1}), false)
            .await
            .unwrap();
        assert!(!out.is_error);
        assert_eq!(out.payload["total"], 2);
        assert_eq!(out.payload["returned"], 1);
        assert_eq!(out.payload["notes"][0]["fields"]["Simplified"], "猫");
        assert!(out.payload["notes"][0]["fields"].get("Traditional").is_none());
    }

    #[tokio::test]
    async fn bad_query_is_a_store_error() {
        let fx = Fixture::new();
        let err = fx
            .run(&SearchNotesTool, json!({"query": "is:sleepy"}), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Store(StoreError::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn get_notes_reports_missing_ids() {
        let fx = Fixture::new();
        let ids = fx.seed_vocab(&[("一", "one"), ("二", "two"), ("三", "three")]);
        let out = fx
            .run(
                &GetNotesTool,
                json!({"note_ids": [ids[0], 404, ids[1], ids[2], 405]}),
                false,
            )
            .await
            .unwrap();
        assert_eq!(out.payload["found"], 3);
        assert_eq!(out.payload["skipped"], 2);
        assert_eq!(out.payload["missing"], json!([404, 405]));
    }

    #[tokio::test]
    async fn stats_with_query() {
        let fx = Fixture::new();
        fx.seed_vocab(&[("猫", "cat"), ("狗", "dog")]);
        let out = fx
            .run(&CollectionStatsTool, json!({"query": "meaning:cat"}), false)
            .await
            .unwrap();
        assert_eq!(out.payload["collection"]["notes"], 2);
        assert_eq!(out.payload["collection"]["cards"], 4);
        assert_eq!(out.payload["matching"]["notes"], 1);
        assert_eq!(out.payload["matching"]["new"], 2);
    }

    #[tokio::test]
    async fn list_decks_and_note_types() {
        let fx = Fixture::new();
        fx.seed_vocab(&[("猫", "cat")]);
        let decks = fx.run(&ListDecksTool, json!({}), false).await.unwrap();
        let names: Vec<&str> = decks.payload["decks"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|d| d["name"].as_str())
            .collect();
        assert!(names.contains(&"Knowledge::Languages::Chinese::Vocabulary"));

        let types = fx.run(&ListNoteTypesTool, json!({}), false).await.unwrap();
        assert_eq!(types.payload["note_types"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn list_tags_counts_notes() {
        let fx = Fixture::new();
        let empty = fx.run(&ListTagsTool, json!({}), false).await.unwrap();
        assert_eq!(empty.payload["total"], 0);

        fx.seed_vocab(&[("猫", "cat"), ("狗", "dog")]);
        let out = fx.run(&ListTagsTool, json!({}), false).await.unwrap();
        assert_eq!(out.payload["total"], 1);
        assert_eq!(out.payload["tags"][0], json!({"name": "chinese", "note_count": 2}));
    }
}
