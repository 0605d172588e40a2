//! Card creation and editing.
//!
//! Adding is a two-step operation. The first call checks for duplicates and
//! stages the add behind a confirmation; the confirmed replay commits it.
//! Edits are staged the same way.

use crate::args::{find_by_field, optional_str, required_str, tags};
use crate::{Tool, ToolContext, ToolOutput, ToolSettings};
use async_trait::async_trait;
use deckhand_core::collection::{NoteDraft, NoteId};
use deckhand_core::error::{StoreError, ToolError};
use deckhand_core::pending::{EDIT_NOTE, PendingAction, StagedCall};
use serde_json::{Value, json};

/// Existing notes tagged on a "tag them" reply.
pub const DUPLICATE_TAG_LIMIT: usize = 5;

/// Vocabulary field names and their argument keys.
const VOCAB_FIELDS: &[(&str, &str)] = &[
    ("Simplified", "simplified"),
    ("Traditional", "traditional"),
    ("Pinyin", "pinyin"),
    ("Meaning", "meaning"),
    ("PartOfSpeech", "part_of_speech"),
    ("SentenceSimplified", "sentence_simplified"),
    ("SentencePinyin", "sentence_pinyin"),
    ("SentenceMeaning", "sentence_meaning"),
];

pub fn vocab_draft(arguments: &Value, settings: &ToolSettings) -> Result<NoteDraft, ToolError> {
    required_str(arguments, "simplified")?;
    let fields = VOCAB_FIELDS
        .iter()
        .filter_map(|(field, key)| {
            optional_str(arguments, key).map(|v| (field.to_string(), v.to_string()))
        })
        .collect();
    let mut all_tags = vec![settings.assistant_tag.clone(), settings.language_tag.clone()];
    all_tags.extend(tags(arguments, "tags"));
    Ok(NoteDraft {
        note_type: settings.vocab_note_type.clone(),
        deck: optional_str(arguments, "deck")
            .unwrap_or(&settings.default_deck)
            .to_string(),
        fields,
        tags: all_tags,
    })
}

pub fn basic_draft(arguments: &Value, settings: &ToolSettings) -> Result<NoteDraft, ToolError> {
    let front = required_str(arguments, "front")?;
    let back = required_str(arguments, "back")?;
    let mut all_tags = vec![settings.assistant_tag.clone()];
    all_tags.extend(tags(arguments, "tags"));
    Ok(NoteDraft {
        note_type: "Basic".into(),
        deck: optional_str(arguments, "deck")
            .unwrap_or(&settings.default_deck)
            .to_string(),
        fields: vec![("Front".into(), front.into()), ("Back".into(), back.into())],
        tags: all_tags,
    })
}

/// Human-readable card preview.
pub fn preview(draft: &NoteDraft) -> String {
    let mut lines: Vec<String> = draft
        .fields
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{k}: {v}"))
        .collect();
    lines.push(format!("Deck: {}", draft.deck));
    lines.push(format!("Tags: {}", draft.tags.join(", ")));
    lines.join("\n")
}

/// Stage or commit an add.
fn stage_or_commit(
    ctx: &mut ToolContext<'_>,
    operation: &str,
    arguments: Value,
    draft: NoteDraft,
    duplicates: Vec<NoteId>,
) -> Result<ToolOutput, ToolError> {
    if ctx.confirmed {
        let note_id = ctx.collection.add_note(&draft)?;
        let first = draft.fields.first().map(|(_, v)| v.as_str()).unwrap_or("");
        ctx.changes.record(
            "add_note",
            &[note_id],
            json!({ "note_type": draft.note_type, "deck": draft.deck, "front": first }),
        );
        tracing::info!(note_id, deck = %draft.deck, "Note added");
        return Ok(ToolOutput::ok(json!({
            "status": "added",
            "note_id": note_id,
            "deck": draft.deck,
        })));
    }

    let call = StagedCall::new(operation, arguments);
    let shown = preview(&draft);
    if duplicates.is_empty() {
        return Ok(ToolOutput::awaiting(
            json!({
                "status": "awaiting_confirmation",
                "preview": shown,
                "message": "The user has been asked to confirm this card. Do not add it again.",
            }),
            PendingAction::CardConfirm {
                call,
                preview: shown,
            },
        ));
    }

    let tag_with = draft.tags.clone();
    Ok(ToolOutput::awaiting(
        json!({
            "status": "duplicate",
            "existing_note_ids": duplicates,
            "message": "A matching note already exists. The user has been asked whether \
                        to tag it, create a new one anyway, or skip.",
        }),
        PendingAction::DuplicateConfirm {
            call,
            existing: duplicates.into_iter().take(DUPLICATE_TAG_LIMIT).collect(),
            tags: tag_with,
            preview: shown,
        },
    ))
}

pub struct AddVocabCardTool;

#[async_trait]
impl Tool for AddVocabCardTool {
    fn name(&self) -> &str {
        "add_vocab_card"
    }

    fn description(&self) -> &str {
        "Create a Chinese vocabulary card. The user is shown a preview and must \
         confirm before it is added; duplicates are detected by the Simplified field."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "simplified": { "type": "string", "description": "Simplified characters" },
                "traditional": { "type": "string", "description": "Traditional characters" },
                "pinyin": { "type": "string", "description": "Pinyin with tone marks" },
                "meaning": { "type": "string", "description": "English meaning" },
                "part_of_speech": { "type": "string" },
                "sentence_simplified": { "type": "string", "description": "Example sentence" },
                "sentence_pinyin": { "type": "string" },
                "sentence_meaning": { "type": "string" },
                "deck": { "type": "string", "description": "Target deck (defaults to the vocabulary deck)" },
                "tags": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["simplified", "pinyin", "meaning"]
        })
    }

    async fn execute(
        &self,
        ctx: &mut ToolContext<'_>,
        arguments: Value,
    ) -> Result<ToolOutput, ToolError> {
        let draft = vocab_draft(&arguments, ctx.settings)?;
        let simplified = required_str(&arguments, "simplified")?;
        let duplicates = find_by_field(
            &*ctx.collection,
            &ctx.settings.vocab_note_type,
            "Simplified",
            simplified,
        )?;
        stage_or_commit(ctx, self.name(), arguments, draft, duplicates)
    }
}

pub struct AddBasicCardTool;

#[async_trait]
impl Tool for AddBasicCardTool {
    fn name(&self) -> &str {
        "add_basic_card"
    }

    fn description(&self) -> &str {
        "Create a front/back card. The user is shown a preview and must confirm \
         before it is added; duplicates are detected by the Front field."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "front": { "type": "string" },
                "back": { "type": "string" },
                "deck": { "type": "string" },
                "tags": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["front", "back"]
        })
    }

    async fn execute(
        &self,
        ctx: &mut ToolContext<'_>,
        arguments: Value,
    ) -> Result<ToolOutput, ToolError> {
        let draft = basic_draft(&arguments, ctx.settings)?;
        let front = required_str(&arguments, "front")?;
        let duplicates = find_by_field(&*ctx.collection, "Basic", "Front", front)?;
        stage_or_commit(ctx, self.name(), arguments, draft, duplicates)
    }
}

pub struct EditNoteTool;

#[async_trait]
impl Tool for EditNoteTool {
    fn name(&self) -> &str {
        EDIT_NOTE
    }

    fn description(&self) -> &str {
        "Change field values of an existing note. Only the fields given are changed. \
         The user is shown the old and new values and must confirm."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "note_id": { "type": "integer" },
                "fields": {
                    "type": "object",
                    "description": "Field name to new value, e.g. {\"Meaning\": \"cat; kitty\"}",
                    "additionalProperties": { "type": "string" }
                }
            },
            "required": ["note_id", "fields"]
        })
    }

    async fn execute(
        &self,
        ctx: &mut ToolContext<'_>,
        arguments: Value,
    ) -> Result<ToolOutput, ToolError> {
        let id = arguments["note_id"]
            .as_i64()
            .ok_or_else(|| ToolError::InvalidArguments("'note_id' must be an integer".into()))?;
        let changes = arguments["fields"]
            .as_object()
            .ok_or_else(|| ToolError::InvalidArguments("'fields' must be an object".into()))?
            .iter()
            .map(|(name, value)| match value.as_str() {
                Some(v) => Ok((name.clone(), v.to_string())),
                None => Err(ToolError::InvalidArguments(format!(
                    "value for field '{name}' must be a string"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        if changes.is_empty() {
            return Err(ToolError::InvalidArguments(
                "'fields' must name at least one field".into(),
            ));
        }

        let note = ctx
            .collection
            .note(id)?
            .ok_or(StoreError::NoteNotFound(id))?;
        let mut lines = vec![format!("Note {id} ({})", note.note_type)];
        for (name, value) in &changes {
            let Some(old) = note.field(name) else {
                return Err(ToolError::InvalidArguments(format!(
                    "note {id} has no field '{name}'"
                )));
            };
            lines.push(format!("{name}: {old} -> {value}"));
        }

        if ctx.confirmed {
            ctx.collection.update_note(id, &changes)?;
            let names: Vec<&str> = changes.iter().map(|(n, _)| n.as_str()).collect();
            ctx.changes
                .record("edit_note", &[id], json!({ "fields": names }));
            tracing::info!(note_id = id, "Note edited");
            return Ok(ToolOutput::ok(json!({ "status": "updated", "note_id": id })));
        }

        let shown = lines.join("\n");
        Ok(ToolOutput::awaiting(
            json!({
                "status": "awaiting_confirmation",
                "preview": shown,
                "message": "The user has been asked to confirm this edit. Do not apply it again.",
            }),
            PendingAction::CardConfirm {
                call: StagedCall::new(self.name(), arguments),
                preview: shown,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use deckhand_core::collection::CollectionGuard;

    fn cat() -> Value {
        json!({"simplified": "猫", "pinyin": "māo", "meaning": "cat", "tags": ["#animals"]})
    }

    #[tokio::test]
    async fn first_call_stages_a_card_confirmation() {
        let fx = Fixture::new();
        let out = fx.run(&AddVocabCardTool, cat(), false).await.unwrap();
        assert_eq!(out.payload["status"], "awaiting_confirmation");
        match out.confirmation {
            Some(PendingAction::CardConfirm { call, preview }) => {
                assert_eq!(call.operation, "add_vocab_card");
                assert!(preview.contains("Simplified: 猫"));
                assert!(preview.contains("Tags: claude, chinese, animals"));
            }
            other => panic!("unexpected confirmation {other:?}"),
        }
        let col = CollectionGuard::open(&fx.store).unwrap();
        assert!(col.find_notes("猫").unwrap().is_empty());
    }

    #[tokio::test]
    async fn confirmed_call_adds_and_logs() {
        let fx = Fixture::new();
        let out = fx.run(&AddVocabCardTool, cat(), true).await.unwrap();
        assert_eq!(out.payload["status"], "added");
        assert!(out.confirmation.is_none());

        let col = CollectionGuard::open(&fx.store).unwrap();
        let ids = col.find_notes("tag:animals tag:claude").unwrap();
        assert_eq!(ids.len(), 1);
        let log = fx.changes.recent(5).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, "add_note");
    }

    #[tokio::test]
    async fn existing_word_stages_duplicate_confirmation() {
        let fx = Fixture::new();
        let existing = fx.seed_vocab(&[("猫", "cat")]);
        let out = fx.run(&AddVocabCardTool, cat(), false).await.unwrap();
        assert_eq!(out.payload["status"], "duplicate");
        match out.confirmation {
            Some(PendingAction::DuplicateConfirm { existing: ids, tags, .. }) => {
                assert_eq!(ids, existing);
                assert!(tags.contains(&"claude".to_string()));
                assert!(tags.contains(&"animals".to_string()));
            }
            other => panic!("unexpected confirmation {other:?}"),
        }
    }

    #[tokio::test]
    async fn basic_card_requires_back() {
        let fx = Fixture::new();
        let err = fx
            .run(&AddBasicCardTool, json!({"front": "capital of France"}), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn basic_card_goes_to_requested_deck() {
        let fx = Fixture::new();
        let args = json!({"front": "capital of France", "back": "Paris", "deck": "Geography"});
        fx.run(&AddBasicCardTool, args, true).await.unwrap();
        let col = CollectionGuard::open(&fx.store).unwrap();
        assert_eq!(col.find_notes("deck:Geography note:Basic").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn edit_is_staged_then_applied() {
        let fx = Fixture::new();
        let ids = fx.seed_vocab(&[("猫", "cat")]);
        let args = json!({"note_id": ids[0], "fields": {"Meaning": "cat; kitty"}});

        let staged = fx.run(&EditNoteTool, args.clone(), false).await.unwrap();
        match &staged.confirmation {
            Some(PendingAction::CardConfirm { call, preview }) => {
                assert!(call.is_edit());
                assert!(preview.contains("Meaning: cat -> cat; kitty"));
            }
            other => panic!("unexpected confirmation {other:?}"),
        }
        {
            let col = CollectionGuard::open(&fx.store).unwrap();
            assert_eq!(col.note(ids[0]).unwrap().unwrap().field("Meaning"), Some("cat"));
        }

        let done = fx.run(&EditNoteTool, args, true).await.unwrap();
        assert_eq!(done.payload["status"], "updated");
        let col = CollectionGuard::open(&fx.store).unwrap();
        assert_eq!(col.note(ids[0]).unwrap().unwrap().field("Meaning"), Some("cat; kitty"));
        assert_eq!(fx.changes.recent(1).unwrap()[0].action, "edit_note");
    }

    #[tokio::test]
    async fn edit_rejects_unknown_notes_and_fields() {
        let fx = Fixture::new();
        let ids = fx.seed_vocab(&[("猫", "cat")]);
        let err = fx
            .run(&EditNoteTool, json!({"note_id": 404, "fields": {"Meaning": "x"}}), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Store(StoreError::NoteNotFound(404))));

        let err = fx
            .run(&EditNoteTool, json!({"note_id": ids[0], "fields": {"Colour": "orange"}}), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        let err = fx
            .run(&EditNoteTool, json!({"note_id": ids[0], "fields": {}}), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
