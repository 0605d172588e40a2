//! Word lists proposed for card creation (typically read from a photo).

use crate::args::{find_by_field, optional_str, tags};
use crate::{Tool, ToolContext, ToolOutput};
use async_trait::async_trait;
use deckhand_core::error::ToolError;
use deckhand_core::pending::{PendingAction, ProposedWord, StagedCall};
use serde_json::{Map, Value, json};

const WORD_KEYS: &[&str] = &[
    "simplified",
    "traditional",
    "pinyin",
    "meaning",
    "part_of_speech",
];

fn label(word: &Value) -> String {
    let mut label = word["simplified"].as_str().unwrap_or("").trim().to_string();
    if let Some(pinyin) = optional_str(word, "pinyin") {
        label.push_str(&format!(" ({pinyin})"));
    }
    if let Some(meaning) = optional_str(word, "meaning") {
        label.push(' ');
        label.push_str(meaning);
    }
    label
}

pub struct ProposeVocabListTool;

#[async_trait]
impl Tool for ProposeVocabListTool {
    fn name(&self) -> &str {
        "propose_vocab_list"
    }

    fn description(&self) -> &str {
        "Offer a list of Chinese words (for example read from a photo) for card \
         creation. The user picks all, some by number, or none. Words that already \
         exist are marked and never added twice."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "words": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "simplified": { "type": "string" },
                            "traditional": { "type": "string" },
                            "pinyin": { "type": "string" },
                            "meaning": { "type": "string" },
                            "part_of_speech": { "type": "string" }
                        },
                        "required": ["simplified"]
                    }
                },
                "deck": { "type": "string" },
                "tags": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["words"]
        })
    }

    async fn execute(
        &self,
        ctx: &mut ToolContext<'_>,
        arguments: Value,
    ) -> Result<ToolOutput, ToolError> {
        let raw = arguments["words"]
            .as_array()
            .ok_or_else(|| ToolError::InvalidArguments("'words' must be an array".into()))?;
        let extra_tags = tags(&arguments, "tags");
        let deck = optional_str(&arguments, "deck");

        let mut words = Vec::new();
        for word in raw {
            let Some(simplified) = optional_str(word, "simplified") else {
                continue;
            };
            let duplicate_of = find_by_field(
                &*ctx.collection,
                &ctx.settings.vocab_note_type,
                "Simplified",
                simplified,
            )?;

            let mut call_args = Map::new();
            for key in WORD_KEYS {
                if let Some(v) = optional_str(word, key) {
                    call_args.insert((*key).into(), Value::String(v.into()));
                }
            }
            if let Some(deck) = deck {
                call_args.insert("deck".into(), Value::String(deck.into()));
            }
            if !extra_tags.is_empty() {
                call_args.insert("tags".into(), json!(extra_tags));
            }

            words.push(ProposedWord {
                label: label(word),
                call: StagedCall::new("add_vocab_card", Value::Object(call_args)),
                duplicate_of,
            });
        }

        if words.is_empty() {
            return Ok(ToolOutput::ok(json!({
                "status": "empty",
                "message": "No usable words were given.",
            })));
        }

        let duplicates = words.iter().filter(|w| w.is_duplicate()).count();
        Ok(ToolOutput::awaiting(
            json!({
                "status": "awaiting_selection",
                "words": words.len(),
                "duplicates": duplicates,
                "message": "The user has been shown the numbered list and asked which words to add.",
            }),
            PendingAction::ImageWordConfirm { words },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    #[tokio::test]
    async fn proposes_words_and_marks_existing() {
        let fx = Fixture::new();
        let existing = fx.seed_vocab(&[("好", "good")]);
        let out = fx
            .run(
                &ProposeVocabListTool,
                json!({
                    "words": [
                        {"simplified": "好", "pinyin": "hǎo", "meaning": "good"},
                        {"simplified": "猫", "pinyin": "māo", "meaning": "cat"},
                        {"pinyin": "no characters"}
                    ],
                    "tags": ["menu"]
                }),
                false,
            )
            .await
            .unwrap();
        assert_eq!(out.payload["words"], 2);
        assert_eq!(out.payload["duplicates"], 1);

        let Some(PendingAction::ImageWordConfirm { words }) = out.confirmation else {
            panic!("expected an image word confirmation");
        };
        assert_eq!(words[0].label, "好 (hǎo) good");
        assert_eq!(words[0].duplicate_of, existing);
        assert!(!words[1].is_duplicate());
        assert_eq!(words[1].call.operation, "add_vocab_card");
        assert_eq!(words[1].call.arguments["tags"], json!(["menu"]));
        assert_eq!(words[1].call.arguments["meaning"], "cat");
    }

    #[tokio::test]
    async fn empty_list_stages_nothing() {
        let fx = Fixture::new();
        let out = fx
            .run(&ProposeVocabListTool, json!({"words": []}), false)
            .await
            .unwrap();
        assert!(out.confirmation.is_none());
        assert_eq!(out.payload["status"], "empty");
    }
}
