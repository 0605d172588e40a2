//! The pending-action gate.
//!
//! When a session holds a [`PendingAction`], the user's next message is
//! matched against that action's reply tokens before anything else sees
//! it. A recognized reply commits or abandons the action; anything else
//! abandons it and lets the message through as a fresh request. Either
//! way the pending action is gone afterwards.

use crate::executor::ToolGateway;
use crate::session::Session;
use deckhand_core::collection::NoteId;
use deckhand_core::message::ConversationId;
use deckhand_core::pending::{PendingAction, ProposedWord, StagedCall};
use regex_lite::Regex;
use serde_json::json;
use std::sync::LazyLock;
use tracing::info;

static NUMBER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\d+").ok());

const CARD_YES: &[&str] = &["yes", "y", "ok", "yep", "yeah", "sure", "add", "confirm"];
const DELETE_YES: &[&str] = &["yes", "y", "ok", "confirm", "delete"];
const TAG_YES: &[&str] = &["yes", "y", "ok", "tag", "tag them", "yes tag"];
const IMAGE_ALL: &[&str] = &["all", "yes", "y", "yeah", "yep", "ok"];
const DUPLICATE_NEW: &[&str] = &["new", "create", "add"];

const NO: &[&str] = &["no", "n", "cancel", "nah", "nope"];
const IMAGE_NO: &[&str] = &["no", "cancel", "n", "nah", "nope"];
const SKIP_OR_NO: &[&str] = &["skip", "no", "n", "cancel", "nah", "nope"];

/// A user reply, read against the pending action's token table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Confirm,
    Reject,
    /// Tag the existing notes instead of creating a duplicate.
    Tag,
    /// Create the duplicate anyway.
    CreateAnyway,
    /// 1-based positions picked from a word list.
    Select(Vec<usize>),
    Unrecognized,
}

/// Read `reply` as an answer to `action`. Case and surrounding whitespace
/// are ignored.
pub fn classify(action: &PendingAction, reply: &str) -> Reply {
    let reply = reply.trim().to_lowercase();
    let r = reply.as_str();
    match action {
        PendingAction::CardConfirm { .. } => yes_no(r, CARD_YES, NO),
        PendingAction::DuplicateConfirm { .. } => {
            if r == "tag" {
                Reply::Tag
            } else if DUPLICATE_NEW.contains(&r) {
                Reply::CreateAnyway
            } else if SKIP_OR_NO.contains(&r) {
                Reply::Reject
            } else {
                Reply::Unrecognized
            }
        }
        PendingAction::ImageWordConfirm { .. } => match yes_no(r, IMAGE_ALL, IMAGE_NO) {
            Reply::Unrecognized => {
                let picks: Vec<usize> = NUMBER
                    .as_ref()
                    .map(|re| re.find_iter(r).filter_map(|m| m.as_str().parse().ok()).collect())
                    .unwrap_or_default();
                if picks.is_empty() {
                    Reply::Unrecognized
                } else {
                    Reply::Select(picks)
                }
            }
            reply => reply,
        },
        PendingAction::DeleteConfirm { .. } => yes_no(r, DELETE_YES, NO),
        PendingAction::KnownWordsTagConfirm { .. } => yes_no(r, TAG_YES, SKIP_OR_NO),
    }
}

fn yes_no(reply: &str, yes: &[&str], no: &[&str]) -> Reply {
    if yes.contains(&reply) {
        Reply::Confirm
    } else if no.contains(&reply) {
        Reply::Reject
    } else {
        Reply::Unrecognized
    }
}

/// What the gate did with a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The reply settled the pending action; send this summary.
    Resolved(String),
    /// Nothing was pending, or the reply was not an answer.
    FallThrough,
}

/// Commits or abandons pending actions.
pub struct ConfirmationGate {
    gateway: ToolGateway,
}

impl ConfirmationGate {
    pub fn new(gateway: ToolGateway) -> Self {
        Self { gateway }
    }

    pub async fn resolve(
        &self,
        conversation: &ConversationId,
        session: &mut Session,
        text: &str,
    ) -> Resolution {
        let Some(action) = session.pending.take() else {
            return Resolution::FallThrough;
        };
        let reply = classify(&action, text);
        if reply == Reply::Unrecognized {
            info!(
                conversation_id = %conversation,
                kind = action.kind(),
                "Pending action abandoned by unrelated reply"
            );
            return Resolution::FallThrough;
        }
        info!(
            conversation_id = %conversation,
            kind = action.kind(),
            reply = ?reply,
            "Pending action resolved"
        );
        Resolution::Resolved(self.settle(action, reply).await)
    }

    async fn settle(&self, action: PendingAction, reply: Reply) -> String {
        match (action, reply) {
            (PendingAction::CardConfirm { call, preview }, Reply::Confirm) if call.is_edit() => {
                self.commit(&call, &preview, "Note updated!", "Failed to update note").await
            }
            (PendingAction::CardConfirm { call, preview }, Reply::Confirm) => {
                self.commit(&call, &preview, "Card added!", "Failed to add card").await
            }
            (PendingAction::DuplicateConfirm { call, preview, .. }, Reply::CreateAnyway) => {
                self.commit(&call, &preview, "Card added anyway!", "Failed to add card")
                    .await
            }
            (PendingAction::DuplicateConfirm { existing, tags, .. }, Reply::Tag) => {
                let out = self.tag_notes(&existing, &tags).await;
                match out {
                    Ok(count) => {
                        let shown: Vec<String> = tags.iter().map(|t| format!("#{t}")).collect();
                        format!(
                            "Tagged {count} existing note(s) with {}.\n\n{}",
                            shown.join(" "),
                            self.sync().await
                        )
                    }
                    Err(e) => format!("Failed to tag existing notes: {e}"),
                }
            }
            (PendingAction::DuplicateConfirm { .. }, _) => "Skipped.".into(),
            (PendingAction::ImageWordConfirm { words }, Reply::Confirm) => {
                let all: Vec<usize> = (1..=words.len()).collect();
                self.add_words(&words, &all).await
            }
            (PendingAction::ImageWordConfirm { words }, Reply::Select(picks)) => {
                self.add_words(&words, &picks).await
            }
            (PendingAction::DeleteConfirm { note_ids, .. }, Reply::Confirm) => {
                let out = self
                    .gateway
                    .execute_confirmed(&StagedCall::new("delete_notes", json!({ "note_ids": note_ids })))
                    .await;
                if out.is_error {
                    format!("Delete failed: {}", error_text(&out.payload))
                } else {
                    format!(
                        "Deleted {} note(s).\n\n{}",
                        out.payload["affected"].as_u64().unwrap_or(0),
                        self.sync().await
                    )
                }
            }
            (PendingAction::DeleteConfirm { .. }, _) => "Cancelled. Nothing was deleted.".into(),
            (PendingAction::KnownWordsTagConfirm { note_ids, tag, .. }, Reply::Confirm) => {
                match self.tag_notes(&note_ids, std::slice::from_ref(&tag)).await {
                    Ok(count) => format!(
                        "Tagged {count} note(s) with #{tag}.\n\n{}",
                        self.sync().await
                    ),
                    Err(e) => format!("Failed to tag notes: {e}"),
                }
            }
            (PendingAction::KnownWordsTagConfirm { .. }, _) => "Skipped tagging.".into(),
            _ => "Cancelled.".into(),
        }
    }

    async fn commit(
        &self,
        call: &StagedCall,
        preview: &str,
        headline: &str,
        failure: &str,
    ) -> String {
        let out = self.gateway.execute_confirmed(call).await;
        if out.is_error {
            return format!("{failure}: {}", error_text(&out.payload));
        }
        format!("{headline}\n\n{preview}\n\n{}", self.sync().await)
    }

    async fn tag_notes(&self, notes: &[NoteId], tags: &[String]) -> Result<u64, String> {
        let out = self
            .gateway
            .execute_confirmed(&StagedCall::new(
                "add_tags",
                json!({ "note_ids": notes, "tags": tags }),
            ))
            .await;
        if out.is_error {
            Err(error_text(&out.payload))
        } else {
            Ok(out.payload["affected"].as_u64().unwrap_or(0))
        }
    }

    async fn add_words(&self, words: &[ProposedWord], picks: &[usize]) -> String {
        let mut chosen: Vec<usize> = Vec::new();
        for &n in picks {
            if (1..=words.len()).contains(&n) && !chosen.contains(&n) {
                chosen.push(n);
            }
        }
        if chosen.is_empty() {
            return "No valid selections. Cancelled.".into();
        }

        let mut added = Vec::new();
        let mut skipped = Vec::new();
        let mut failed = Vec::new();
        for n in chosen {
            let word = &words[n - 1];
            if word.is_duplicate() {
                skipped.push(word.label.as_str());
                continue;
            }
            let out = self.gateway.execute_confirmed(&word.call).await;
            if out.is_error {
                failed.push(format!("{} ({})", word.label, error_text(&out.payload)));
            } else {
                added.push(word.label.as_str());
            }
        }

        let mut lines = Vec::new();
        if !added.is_empty() {
            lines.push(format!("Added {} card(s):", added.len()));
            lines.extend(added.iter().map(|w| format!("  {w}")));
        }
        if !skipped.is_empty() {
            lines.push(format!("Skipped {} already in the collection:", skipped.len()));
            lines.extend(skipped.iter().map(|w| format!("  {w}")));
        }
        if !failed.is_empty() {
            lines.push(format!("Failed to add {}:", failed.len()));
            lines.extend(failed.iter().map(|w| format!("  {w}")));
        }
        if !added.is_empty() {
            lines.push(String::new());
            lines.push(self.sync().await);
        }
        lines.join("\n")
    }

    async fn sync(&self) -> String {
        let out = self
            .gateway
            .execute_confirmed(&StagedCall::new("sync_collection", json!({})))
            .await;
        if out.is_error {
            error_text(&out.payload)
        } else {
            out.payload["message"].as_str().unwrap_or("Synced").to_string()
        }
    }
}

fn error_text(payload: &serde_json::Value) -> String {
    payload["error"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| payload.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::memory_gateway;
    use deckhand_collection::InMemoryStore;
    use deckhand_core::collection::CollectionGuard;
    use deckhand_tools::sync::SKIPPED_MESSAGE;

    fn card_confirm() -> PendingAction {
        PendingAction::CardConfirm {
            call: StagedCall::new(
                "add_vocab_card",
                json!({"simplified": "猫", "pinyin": "māo", "meaning": "cat"}),
            ),
            preview: "Simplified: 猫".into(),
        }
    }

    fn word(simplified: &str, duplicate_of: Vec<NoteId>) -> ProposedWord {
        ProposedWord {
            label: simplified.into(),
            call: StagedCall::new(
                "add_vocab_card",
                json!({"simplified": simplified, "pinyin": "x", "meaning": "y"}),
            ),
            duplicate_of,
        }
    }

    fn notes(store: &InMemoryStore, query: &str) -> Vec<NoteId> {
        CollectionGuard::open(store).unwrap().find_notes(query).unwrap()
    }

    #[test]
    fn tokens_ignore_case_and_whitespace() {
        let action = card_confirm();
        assert_eq!(classify(&action, " yes "), Reply::Confirm);
        assert_eq!(classify(&action, "YES"), Reply::Confirm);
        assert_eq!(classify(&action, "Nope\n"), Reply::Reject);
        assert_eq!(classify(&action, "banana"), Reply::Unrecognized);
        assert_eq!(classify(&action, "yes please"), Reply::Unrecognized);
    }

    #[test]
    fn each_kind_has_its_own_table() {
        let duplicate = PendingAction::DuplicateConfirm {
            call: StagedCall::new("add_vocab_card", json!({})),
            existing: vec![1],
            tags: vec![],
            preview: String::new(),
        };
        assert_eq!(classify(&duplicate, "tag"), Reply::Tag);
        assert_eq!(classify(&duplicate, "Create"), Reply::CreateAnyway);
        assert_eq!(classify(&duplicate, "skip"), Reply::Reject);
        assert_eq!(classify(&duplicate, "yes"), Reply::Unrecognized);

        let delete = PendingAction::DeleteConfirm { note_ids: vec![1], preview: String::new() };
        assert_eq!(classify(&delete, "delete"), Reply::Confirm);
        assert_eq!(classify(&delete, "sure"), Reply::Unrecognized);

        let known = PendingAction::KnownWordsTagConfirm {
            note_ids: vec![1],
            tag: "hanly".into(),
            preview: String::new(),
        };
        assert_eq!(classify(&known, "tag them"), Reply::Confirm);
        assert_eq!(classify(&known, "skip"), Reply::Reject);
    }

    #[test]
    fn number_lists_select_words() {
        let action = PendingAction::ImageWordConfirm { words: vec![word("好", vec![])] };
        assert_eq!(classify(&action, "1,3 5"), Reply::Select(vec![1, 3, 5]));
        assert_eq!(classify(&action, " 2 , 4 "), Reply::Select(vec![2, 4]));
        assert_eq!(classify(&action, "all"), Reply::Confirm);
        assert_eq!(classify(&action, "1 and 3"), Reply::Select(vec![1, 3]));
        assert_eq!(classify(&action, "add 2, 4 please"), Reply::Select(vec![2, 4]));
        assert_eq!(classify(&action, "none of these"), Reply::Unrecognized);
    }

    #[tokio::test]
    async fn no_pending_falls_through() {
        let (gw, _store) = memory_gateway();
        let gate = ConfirmationGate::new(gw);
        let mut session = Session::default();
        let res = gate.resolve(&ConversationId::from("c"), &mut session, "yes").await;
        assert_eq!(res, Resolution::FallThrough);
    }

    #[tokio::test]
    async fn confirming_a_card_adds_it_and_reports_sync() {
        let (gw, store) = memory_gateway();
        let gate = ConfirmationGate::new(gw);
        let mut session = Session { pending: Some(card_confirm()), ..Default::default() };

        let res = gate.resolve(&ConversationId::from("c"), &mut session, " YES ").await;
        let Resolution::Resolved(summary) = res else {
            panic!("expected resolution");
        };
        assert!(summary.starts_with("Card added!"));
        assert!(summary.contains(SKIPPED_MESSAGE));
        assert!(session.pending.is_none());
        assert_eq!(notes(&store, "Simplified:猫").len(), 1);
    }

    #[tokio::test]
    async fn confirming_an_edit_updates_the_note() {
        let (gw, store) = memory_gateway();
        let added = gw
            .execute_confirmed(&StagedCall::new(
                "add_basic_card",
                json!({"front": "capital of France", "back": "Lyon"}),
            ))
            .await;
        let id = added.payload["note_id"].as_i64().unwrap();
        let staged = gw
            .execute("edit_note", json!({"note_id": id, "fields": {"Back": "Paris"}}))
            .await;
        let mut session = Session { pending: staged.confirmation, ..Default::default() };
        assert!(session.pending.as_ref().unwrap().prompt().ends_with("Apply this edit? (yes/no)"));

        let gate = ConfirmationGate::new(gw);
        let res = gate.resolve(&ConversationId::from("c"), &mut session, "yes").await;
        let Resolution::Resolved(summary) = res else {
            panic!("expected resolution");
        };
        assert!(summary.starts_with("Note updated!"), "{summary}");
        assert!(summary.contains("Back: Lyon -> Paris"));
        assert_eq!(notes(&store, "Back:Paris"), vec![id]);
    }

    #[tokio::test]
    async fn unrelated_reply_abandons_and_falls_through() {
        let (gw, store) = memory_gateway();
        let gate = ConfirmationGate::new(gw);
        let mut session = Session { pending: Some(card_confirm()), ..Default::default() };

        let res = gate.resolve(&ConversationId::from("c"), &mut session, "banana").await;
        assert_eq!(res, Resolution::FallThrough);
        assert!(session.pending.is_none());
        assert!(notes(&store, "Simplified:猫").is_empty());
    }

    #[tokio::test]
    async fn rejecting_leaves_the_collection_alone() {
        let (gw, store) = memory_gateway();
        let gate = ConfirmationGate::new(gw);
        let mut session = Session { pending: Some(card_confirm()), ..Default::default() };

        let res = gate.resolve(&ConversationId::from("c"), &mut session, "no").await;
        assert_eq!(res, Resolution::Resolved("Cancelled.".into()));
        assert!(notes(&store, "Simplified:猫").is_empty());
    }

    #[tokio::test]
    async fn selected_words_skip_duplicates() {
        let (gw, store) = memory_gateway();
        let gate = ConfirmationGate::new(gw);
        let words = vec![word("好", vec![]), word("猫", vec![7]), word("狗", vec![])];
        let mut session = Session {
            pending: Some(PendingAction::ImageWordConfirm { words }),
            ..Default::default()
        };

        let res = gate.resolve(&ConversationId::from("c"), &mut session, "2, 3").await;
        let Resolution::Resolved(summary) = res else {
            panic!("expected resolution");
        };
        assert!(summary.contains("Added 1 card(s):"));
        assert!(summary.contains("Skipped 1 already in the collection:"));
        assert_eq!(notes(&store, "Simplified:狗").len(), 1);
        assert!(notes(&store, "Simplified:好").is_empty());
    }

    #[tokio::test]
    async fn out_of_range_selection_cancels() {
        let (gw, _store) = memory_gateway();
        let gate = ConfirmationGate::new(gw);
        let mut session = Session {
            pending: Some(PendingAction::ImageWordConfirm { words: vec![word("好", vec![])] }),
            ..Default::default()
        };
        let res = gate.resolve(&ConversationId::from("c"), &mut session, "4 9").await;
        assert_eq!(res, Resolution::Resolved("No valid selections. Cancelled.".into()));
    }

    #[tokio::test]
    async fn known_words_confirmation_tags_notes() {
        let (gw, store) = memory_gateway();
        let gate = ConfirmationGate::new(gw.clone());
        gw.execute_confirmed(&StagedCall::new(
            "add_vocab_card",
            json!({"simplified": "中国", "pinyin": "zhōngguó", "meaning": "China"}),
        ))
        .await;
        let ids = notes(&store, "Simplified:中国");
        let mut session = Session {
            pending: Some(PendingAction::KnownWordsTagConfirm {
                note_ids: ids.clone(),
                tag: "hanly".into(),
                preview: String::new(),
            }),
            ..Default::default()
        };

        let res = gate.resolve(&ConversationId::from("c"), &mut session, "ok").await;
        let Resolution::Resolved(summary) = res else {
            panic!("expected resolution");
        };
        assert!(summary.starts_with("Tagged 1 note(s) with #hanly."));
        assert_eq!(notes(&store, "tag:hanly"), ids);
    }
}
