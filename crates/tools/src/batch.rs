//! Bulk mutations selected by note ids or a search query.
//!
//! Every batch proceeds on the notes that exist and reports how many
//! requested ids were skipped. Deletion is staged behind a confirmation.

use crate::args::{optional_str, required_str, resolve_targets, tags, target_properties, Targets};
use crate::{Tool, ToolContext, ToolOutput};
use async_trait::async_trait;
use deckhand_core::collection::{CardId, Collection, NoteId};
use deckhand_core::error::{StoreError, ToolError};
use deckhand_core::pending::PendingAction;
use serde_json::{Value, json};

/// Notes shown in a delete preview.
const DELETE_PREVIEW_NOTES: usize = 5;

fn schema_with(extra: Value, required: &[&str]) -> Value {
    let mut properties = target_properties();
    if let (Some(props), Some(extra)) = (properties.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            props.insert(k.clone(), v.clone());
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn cards_of(collection: &dyn Collection, notes: &[NoteId]) -> Result<Vec<CardId>, StoreError> {
    let mut cards = Vec::new();
    for id in notes {
        cards.extend(collection.cards_of_note(*id)?.into_iter().map(|c| c.id));
    }
    Ok(cards)
}

fn nothing_matched(targets: &Targets) -> ToolOutput {
    ToolOutput::ok(json!({
        "affected": 0,
        "skipped": targets.skipped,
        "message": "No matching notes.",
    }))
}

fn set_suspended(
    ctx: &mut ToolContext<'_>,
    arguments: &Value,
    suspended: bool,
) -> Result<ToolOutput, ToolError> {
    let targets = resolve_targets(&*ctx.collection, arguments)?;
    if targets.found.is_empty() {
        return Ok(nothing_matched(&targets));
    }
    let cards = cards_of(&*ctx.collection, &targets.found)?;
    let touched = ctx.collection.set_suspended(&cards, suspended)?;
    let action = if suspended { "suspend" } else { "unsuspend" };
    ctx.changes.record(
        action,
        &targets.found,
        json!({ "cards": touched, "query": optional_str(arguments, "query") }),
    );
    Ok(ToolOutput::ok(json!({
        "affected": targets.found.len(),
        "cards": touched,
        "skipped": targets.skipped,
    })))
}

pub struct SuspendCardsTool;

#[async_trait]
impl Tool for SuspendCardsTool {
    fn name(&self) -> &str {
        "suspend_cards"
    }

    fn description(&self) -> &str {
        "Suspend every card of the selected notes."
    }

    fn parameters_schema(&self) -> Value {
        schema_with(json!({}), &[])
    }

    async fn execute(
        &self,
        ctx: &mut ToolContext<'_>,
        arguments: Value,
    ) -> Result<ToolOutput, ToolError> {
        set_suspended(ctx, &arguments, true)
    }
}

pub struct UnsuspendCardsTool;

#[async_trait]
impl Tool for UnsuspendCardsTool {
    fn name(&self) -> &str {
        "unsuspend_cards"
    }

    fn description(&self) -> &str {
        "Unsuspend every card of the selected notes."
    }

    fn parameters_schema(&self) -> Value {
        schema_with(json!({}), &[])
    }

    async fn execute(
        &self,
        ctx: &mut ToolContext<'_>,
        arguments: Value,
    ) -> Result<ToolOutput, ToolError> {
        set_suspended(ctx, &arguments, false)
    }
}

pub struct DeleteNotesTool;

#[async_trait]
impl Tool for DeleteNotesTool {
    fn name(&self) -> &str {
        "delete_notes"
    }

    fn description(&self) -> &str {
        "Delete the selected notes and their cards. The user must confirm first."
    }

    fn parameters_schema(&self) -> Value {
        schema_with(json!({}), &[])
    }

    async fn execute(
        &self,
        ctx: &mut ToolContext<'_>,
        arguments: Value,
    ) -> Result<ToolOutput, ToolError> {
        let targets = resolve_targets(&*ctx.collection, &arguments)?;
        if targets.found.is_empty() {
            return Ok(nothing_matched(&targets));
        }

        if !ctx.confirmed {
            let mut lines = Vec::new();
            for id in targets.found.iter().take(DELETE_PREVIEW_NOTES) {
                if let Some(note) = ctx.collection.note(*id)? {
                    let first = note.fields.first().map(|(_, v)| v.as_str()).unwrap_or("");
                    lines.push(format!("- {first} (#{id})"));
                }
            }
            if targets.found.len() > DELETE_PREVIEW_NOTES {
                lines.push(format!("...and {} more", targets.found.len() - DELETE_PREVIEW_NOTES));
            }
            let preview = lines.join("\n");
            return Ok(ToolOutput::awaiting(
                json!({
                    "status": "awaiting_confirmation",
                    "notes": targets.found.len(),
                    "skipped": targets.skipped,
                    "message": "The user has been asked to confirm the deletion.",
                }),
                PendingAction::DeleteConfirm {
                    note_ids: targets.found,
                    preview,
                },
            ));
        }

        let removed = ctx.collection.remove_notes(&targets.found)?;
        ctx.changes.record("delete_notes", &targets.found, json!({}));
        tracing::info!(removed, "Notes deleted");
        Ok(ToolOutput::ok(json!({
            "affected": removed,
            "skipped": targets.skipped + (targets.found.len() - removed),
        })))
    }
}

pub struct AddTagsTool;

#[async_trait]
impl Tool for AddTagsTool {
    fn name(&self) -> &str {
        "add_tags"
    }

    fn description(&self) -> &str {
        "Add tags to the selected notes."
    }

    fn parameters_schema(&self) -> Value {
        schema_with(
            json!({ "tags": { "type": "array", "items": { "type": "string" } } }),
            &["tags"],
        )
    }

    async fn execute(
        &self,
        ctx: &mut ToolContext<'_>,
        arguments: Value,
    ) -> Result<ToolOutput, ToolError> {
        let new_tags = tags(&arguments, "tags");
        if new_tags.is_empty() {
            return Err(ToolError::InvalidArguments("No tags given".into()));
        }
        let targets = resolve_targets(&*ctx.collection, &arguments)?;
        if targets.found.is_empty() {
            return Ok(nothing_matched(&targets));
        }
        let touched = ctx.collection.add_tags(&targets.found, &new_tags)?;
        ctx.changes
            .record("add_tags", &targets.found, json!({ "tags": new_tags }));
        Ok(ToolOutput::ok(json!({
            "affected": touched,
            "skipped": targets.skipped,
            "tags": new_tags,
        })))
    }
}

pub struct RemoveTagsTool;

#[async_trait]
impl Tool for RemoveTagsTool {
    fn name(&self) -> &str {
        "remove_tags"
    }

    fn description(&self) -> &str {
        "Remove tags from the selected notes."
    }

    fn parameters_schema(&self) -> Value {
        schema_with(
            json!({ "tags": { "type": "array", "items": { "type": "string" } } }),
            &["tags"],
        )
    }

    async fn execute(
        &self,
        ctx: &mut ToolContext<'_>,
        arguments: Value,
    ) -> Result<ToolOutput, ToolError> {
        let old_tags = tags(&arguments, "tags");
        if old_tags.is_empty() {
            return Err(ToolError::InvalidArguments("No tags given".into()));
        }
        let targets = resolve_targets(&*ctx.collection, &arguments)?;
        if targets.found.is_empty() {
            return Ok(nothing_matched(&targets));
        }
        let touched = ctx.collection.remove_tags(&targets.found, &old_tags)?;
        ctx.changes
            .record("remove_tags", &targets.found, json!({ "tags": old_tags }));
        Ok(ToolOutput::ok(json!({
            "affected": touched,
            "skipped": targets.skipped,
        })))
    }
}

pub struct MoveCardsTool;

#[async_trait]
impl Tool for MoveCardsTool {
    fn name(&self) -> &str {
        "move_cards"
    }

    fn description(&self) -> &str {
        "Move every card of the selected notes to another deck (created if missing)."
    }

    fn parameters_schema(&self) -> Value {
        schema_with(
            json!({ "deck": { "type": "string", "description": "Destination deck" } }),
            &["deck"],
        )
    }

    async fn execute(
        &self,
        ctx: &mut ToolContext<'_>,
        arguments: Value,
    ) -> Result<ToolOutput, ToolError> {
        let deck = required_str(&arguments, "deck")?;
        let targets = resolve_targets(&*ctx.collection, &arguments)?;
        if targets.found.is_empty() {
            return Ok(nothing_matched(&targets));
        }
        let cards = cards_of(&*ctx.collection, &targets.found)?;
        let moved = ctx.collection.move_cards(&cards, deck)?;
        ctx.changes
            .record("move_cards", &targets.found, json!({ "deck": deck, "cards": moved }));
        Ok(ToolOutput::ok(json!({
            "affected": targets.found.len(),
            "cards": moved,
            "skipped": targets.skipped,
            "deck": deck,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use deckhand_core::collection::CollectionGuard;

    #[tokio::test]
    async fn partial_batch_reports_affected_and_skipped() {
        let fx = Fixture::new();
        let ids = fx.seed_vocab(&[("一", "one"), ("二", "two"), ("三", "three")]);
        let out = fx
            .run(
                &AddTagsTool,
                json!({"note_ids": [ids[0], 9001, ids[1], 9002, ids[2]], "tags": ["hsk1"]}),
                false,
            )
            .await
            .unwrap();
        assert_eq!(out.payload["affected"], 3);
        assert_eq!(out.payload["skipped"], 2);

        let col = CollectionGuard::open(&fx.store).unwrap();
        assert_eq!(col.find_notes("tag:hsk1").unwrap(), ids);
    }

    #[tokio::test]
    async fn suspend_by_query_and_log() {
        let fx = Fixture::new();
        fx.seed_vocab(&[("猫", "cat"), ("狗", "dog")]);
        let out = fx
            .run(&SuspendCardsTool, json!({"query": "meaning:cat"}), false)
            .await
            .unwrap();
        assert_eq!(out.payload["affected"], 1);
        assert_eq!(out.payload["cards"], 2);

        let col = CollectionGuard::open(&fx.store).unwrap();
        assert_eq!(col.find_cards("is:suspended").unwrap().len(), 2);
        drop(col);

        let log = fx.changes.recent(1).unwrap();
        assert_eq!(log[0].action, "suspend");
        assert_eq!(log[0].details["query"], "meaning:cat");
    }

    #[tokio::test]
    async fn delete_requires_confirmation() {
        let fx = Fixture::new();
        let ids = fx.seed_vocab(&[("猫", "cat"), ("狗", "dog")]);

        let staged = fx
            .run(&DeleteNotesTool, json!({"note_ids": [ids[0], 77]}), false)
            .await
            .unwrap();
        match &staged.confirmation {
            Some(PendingAction::DeleteConfirm { note_ids, preview }) => {
                assert_eq!(note_ids, &vec![ids[0]]);
                assert!(preview.contains("猫"));
            }
            other => panic!("unexpected confirmation {other:?}"),
        }
        {
            let col = CollectionGuard::open(&fx.store).unwrap();
            assert!(col.note(ids[0]).unwrap().is_some());
        }

        let done = fx
            .run(&DeleteNotesTool, json!({"note_ids": [ids[0]]}), true)
            .await
            .unwrap();
        assert_eq!(done.payload["affected"], 1);
        let col = CollectionGuard::open(&fx.store).unwrap();
        assert!(col.note(ids[0]).unwrap().is_none());
        assert!(col.note(ids[1]).unwrap().is_some());
    }

    #[tokio::test]
    async fn move_cards_to_new_deck() {
        let fx = Fixture::new();
        let ids = fx.seed_vocab(&[("猫", "cat")]);
        let out = fx
            .run(&MoveCardsTool, json!({"note_ids": ids, "deck": "Chinese::Animals"}), false)
            .await
            .unwrap();
        assert_eq!(out.payload["cards"], 2);
        let col = CollectionGuard::open(&fx.store).unwrap();
        assert_eq!(col.find_cards("deck:Chinese::Animals").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn empty_selection_is_not_an_error() {
        let fx = Fixture::new();
        let out = fx
            .run(&RemoveTagsTool, json!({"query": "tag:nothing", "tags": ["x"]}), false)
            .await
            .unwrap();
        assert!(!out.is_error);
        assert_eq!(out.payload["affected"], 0);
    }

    #[tokio::test]
    async fn missing_selector_is_invalid() {
        let fx = Fixture::new();
        let err = fx
            .run(&SuspendCardsTool, json!({}), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
