//! Collection operations the reasoning service can invoke.
//!
//! Every operation is a [`Tool`]: a name, a description, a JSON schema for
//! its arguments and a handler that runs against an open collection. The
//! [`ToolCatalog`] is the static registry the turn loop advertises.
//!
//! Operations that add or destroy notes do not act on the first call.
//! They return a [`PendingAction`] describing what would happen and only
//! commit when re-run with [`ToolContext::confirmed`] set, which only the
//! confirmation flow does.

pub mod args;
pub mod batch;
pub mod cards;
pub mod search;
pub mod sync;
pub mod vocab_list;

use async_trait::async_trait;
use deckhand_audit::ChangeLog;
use deckhand_core::collection::Collection;
use deckhand_core::error::ToolError;
use deckhand_core::pending::PendingAction;
use deckhand_core::provider::ToolDefinition;
use std::path::PathBuf;

/// Collection conventions the operations apply.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub default_deck: String,
    pub vocab_note_type: String,
    /// Tag on every note the assistant creates
    pub assistant_tag: String,
    /// Extra tag on vocabulary notes
    pub language_tag: String,
    pub auth_path: PathBuf,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            default_deck: "Knowledge::Languages::Chinese::Vocabulary".into(),
            vocab_note_type: "ChineseVocabulary".into(),
            assistant_tag: "claude".into(),
            language_tag: "chinese".into(),
            auth_path: PathBuf::from("sync_auth.json"),
        }
    }
}

/// What a handler gets to work with.
pub struct ToolContext<'a> {
    pub collection: &'a mut dyn Collection,
    pub changes: &'a ChangeLog,
    pub settings: &'a ToolSettings,
    /// Set only when replaying a staged call after the user confirmed it
    pub confirmed: bool,
}

/// The outcome of one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub payload: serde_json::Value,
    pub is_error: bool,
    /// A staged action the user must confirm before it commits
    pub confirmation: Option<PendingAction>,
}

impl ToolOutput {
    pub fn ok(payload: serde_json::Value) -> Self {
        Self {
            payload,
            is_error: false,
            confirmation: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            payload: serde_json::json!({ "error": message.into() }),
            is_error: true,
            confirmation: None,
        }
    }

    pub fn awaiting(payload: serde_json::Value, action: PendingAction) -> Self {
        Self {
            payload,
            is_error: false,
            confirmation: Some(action),
        }
    }
}

/// A collection operation.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this operation (e.g., "search_notes").
    fn name(&self) -> &str;

    /// A description of what this operation does (sent to the reasoning service).
    fn description(&self) -> &str;

    /// JSON Schema describing this operation's arguments.
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(
        &self,
        ctx: &mut ToolContext<'_>,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, ToolError>;

    /// Convert this operation into a ToolDefinition for the reasoning service.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// The static registry of operations, in registration order.
#[derive(Default)]
pub struct ToolCatalog {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation. Replaces any existing one with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// All definitions (for sending to the reasoning service).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Check `arguments` is an object carrying every key the schema requires.
pub fn check_required(
    schema: &serde_json::Value,
    arguments: &serde_json::Value,
) -> Result<(), ToolError> {
    let Some(object) = arguments.as_object() else {
        return Err(ToolError::InvalidArguments(
            "arguments must be a JSON object".into(),
        ));
    };
    let missing: Vec<&str> = schema["required"]
        .as_array()
        .map(|req| {
            req.iter()
                .filter_map(|k| k.as_str())
                .filter(|k| object.get(*k).is_none_or(|v| v.is_null()))
                .collect()
        })
        .unwrap_or_default();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ToolError::InvalidArguments(format!(
            "missing required argument(s): {}",
            missing.join(", ")
        )))
    }
}

/// Create the catalog with every built-in operation.
pub fn default_catalog() -> ToolCatalog {
    let mut catalog = ToolCatalog::new();
    catalog.register(Box::new(search::SearchNotesTool));
    catalog.register(Box::new(search::GetNotesTool));
    catalog.register(Box::new(search::ListDecksTool));
    catalog.register(Box::new(search::ListNoteTypesTool));
    catalog.register(Box::new(search::ListTagsTool));
    catalog.register(Box::new(search::CollectionStatsTool));
    catalog.register(Box::new(cards::AddVocabCardTool));
    catalog.register(Box::new(cards::AddBasicCardTool));
    catalog.register(Box::new(cards::EditNoteTool));
    catalog.register(Box::new(vocab_list::ProposeVocabListTool));
    catalog.register(Box::new(batch::SuspendCardsTool));
    catalog.register(Box::new(batch::UnsuspendCardsTool));
    catalog.register(Box::new(batch::DeleteNotesTool));
    catalog.register(Box::new(batch::AddTagsTool));
    catalog.register(Box::new(batch::RemoveTagsTool));
    catalog.register(Box::new(batch::MoveCardsTool));
    catalog.register(Box::new(sync::SyncCollectionTool));
    catalog
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use deckhand_collection::InMemoryStore;
    use deckhand_core::collection::{CollectionGuard, NoteDraft, NoteId};

    /// A store plus the pieces a context borrows.
    pub struct Fixture {
        pub store: InMemoryStore,
        pub changes: ChangeLog,
        pub settings: ToolSettings,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self {
                store: InMemoryStore::new(),
                changes: ChangeLog::in_memory(),
                settings: ToolSettings::default(),
            }
        }

        pub fn seed_vocab(&self, words: &[(&str, &str)]) -> Vec<NoteId> {
            let mut col = CollectionGuard::open(&self.store).unwrap();
            let ids: Vec<NoteId> = words
                .iter()
                .map(|(simplified, meaning)| {
                    col.add_note(&NoteDraft {
                        note_type: self.settings.vocab_note_type.clone(),
                        deck: self.settings.default_deck.clone(),
                        fields: vec![
                            ("Simplified".into(), simplified.to_string()),
                            ("Meaning".into(), meaning.to_string()),
                        ],
                        tags: vec!["chinese".into()],
                    })
                    .unwrap()
                })
                .collect();
            col.close().unwrap();
            ids
        }

        pub async fn run(
            &self,
            tool: &dyn Tool,
            arguments: serde_json::Value,
            confirmed: bool,
        ) -> Result<ToolOutput, ToolError> {
            let mut col = CollectionGuard::open(&self.store).unwrap();
            let mut ctx = ToolContext {
                collection: &mut *col,
                changes: &self.changes,
                settings: &self.settings,
                confirmed,
            };
            let output = tool.execute(&mut ctx, arguments).await?;
            col.close()?;
            Ok(output)
        }
    }
}
