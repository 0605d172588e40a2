//! The turn loop: drives the reasoning service until it produces an answer.
//!
//! Each round sends the full history and the operation catalog. A response
//! without invocations ends the loop. A response with invocations is
//! recorded as an assistant turn, every invocation runs in order, and the
//! results go back as a single user turn before the next round.

use crate::executor::ToolGateway;
use crate::session::Session;
use deckhand_config::AppConfig;
use deckhand_core::message::{ConversationId, Role, Segment, Turn};
use deckhand_core::provider::{Provider, ReasoningRequest};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shown when the reasoning service answers with no text at all.
pub const FALLBACK_ANSWER: &str = "I'm not sure how to help with that.";

/// How one run of the loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalOutcome {
    /// The reasoning service produced a final answer.
    Answer(String),
    /// The round cap was reached.
    Exhausted(String),
    /// The reasoning service could not be reached; history was rolled back.
    Failed(String),
}

impl TerminalOutcome {
    /// The text to relay to the user.
    pub fn text(&self) -> &str {
        match self {
            TerminalOutcome::Answer(t) | TerminalOutcome::Exhausted(t) | TerminalOutcome::Failed(t) => t,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TerminalOutcome::Failed(_))
    }
}

/// The multi-round driver.
pub struct TurnLoop {
    provider: Arc<dyn Provider>,
    gateway: ToolGateway,
    system_prompt: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    max_rounds: usize,
    max_history_turns: usize,
}

impl TurnLoop {
    pub fn new(provider: Arc<dyn Provider>, gateway: ToolGateway, system_prompt: String) -> Self {
        let defaults = AppConfig::default();
        Self {
            provider,
            gateway,
            system_prompt,
            model: defaults.reasoning.model,
            max_tokens: defaults.reasoning.max_tokens,
            temperature: defaults.reasoning.temperature,
            max_rounds: defaults.agent.max_rounds,
            max_history_turns: defaults.agent.max_history_turns,
        }
    }

    /// Take model, sampling and limits from the loaded configuration.
    pub fn with_config(mut self, config: &AppConfig) -> Self {
        self.model = config.reasoning.model.clone();
        self.max_tokens = config.reasoning.max_tokens;
        self.temperature = config.reasoning.temperature;
        self.max_rounds = config.agent.max_rounds;
        self.max_history_turns = config.agent.max_history_turns;
        self
    }

    pub fn with_max_history_turns(mut self, max: usize) -> Self {
        self.max_history_turns = max;
        self
    }

    /// Append `user_turn` to the session and run until a terminal outcome.
    pub async fn run(
        &self,
        conversation: &ConversationId,
        session: &mut Session,
        user_turn: Turn,
    ) -> TerminalOutcome {
        let checkpoint = session.history.len();
        let mut staged_here = false;
        session.history.push(user_turn);

        for round in 1..=self.max_rounds {
            let request = ReasoningRequest {
                model: self.model.clone(),
                system: self.system_prompt.clone(),
                turns: session.history.turns().to_vec(),
                tools: self.gateway.definitions(),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            };

            let response = match self.provider.send(request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(conversation_id = %conversation, round, error = %e, "Reasoning call failed");
                    session.history.truncate(checkpoint);
                    if staged_here {
                        session.pending = None;
                    }
                    return TerminalOutcome::Failed(format!(
                        "Sorry, I couldn't reach the reasoning service: {e}"
                    ));
                }
            };

            let invocations = response.invocations();
            let text = response.text();

            if invocations.is_empty() {
                let answer = if text.trim().is_empty() {
                    FALLBACK_ANSWER.to_string()
                } else {
                    text
                };
                session.history.push(Turn::assistant_text(answer.clone()));
                info!(conversation_id = %conversation, rounds = round, "Turn loop answered");
                self.trim(conversation, session);
                return TerminalOutcome::Answer(answer);
            }

            debug!(
                conversation_id = %conversation,
                round,
                invocations = invocations.len(),
                "Executing invocations"
            );

            let mut segments = Vec::with_capacity(invocations.len() + 1);
            if !text.trim().is_empty() {
                segments.push(Segment::text(text));
            }
            segments.extend(invocations.iter().cloned().map(Segment::ToolInvocation));
            session.history.push(Turn::new(Role::Assistant, segments));

            let mut results = Vec::with_capacity(invocations.len());
            for invocation in &invocations {
                let output = self
                    .gateway
                    .execute(&invocation.name, invocation.arguments.clone())
                    .await;
                if let Some(action) = output.confirmation {
                    info!(
                        conversation_id = %conversation,
                        tool = %invocation.name,
                        kind = action.kind(),
                        "Confirmation staged"
                    );
                    session.pending = Some(action);
                    staged_here = true;
                }
                results.push(Segment::ToolResult {
                    invocation_id: invocation.id.clone(),
                    payload: output.payload,
                    is_error: output.is_error,
                });
            }
            session.history.push(Turn::new(Role::User, results));
        }

        warn!(conversation_id = %conversation, max_rounds = self.max_rounds, "Round cap reached");
        let message = format!(
            "I could not complete that request within {} steps. Try breaking it into smaller requests.",
            self.max_rounds
        );
        session.history.push(Turn::assistant_text(message.clone()));
        self.trim(conversation, session);
        TerminalOutcome::Exhausted(message)
    }

    fn trim(&self, conversation: &ConversationId, session: &mut Session) {
        let dropped = session.history.trim_front(self.max_history_turns);
        if dropped > 0 {
            debug!(conversation_id = %conversation, dropped, "Trimmed history");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedProvider, invocation_response, memory_gateway, text_response};
    use deckhand_core::error::ProviderError;
    use deckhand_core::pending::PendingAction;
    use deckhand_core::provider::ReasoningResponse;
    use serde_json::json;

    fn turn_loop(provider: Arc<ScriptedProvider>) -> TurnLoop {
        let (gateway, _store) = memory_gateway();
        TurnLoop::new(provider, gateway, "You manage flashcards.".into())
    }

    fn conv() -> ConversationId {
        ConversationId::from("test")
    }

    #[tokio::test]
    async fn plain_answer_ends_the_loop() {
        let provider = Arc::new(ScriptedProvider::replies(vec![text_response("Hello!")]));
        let tl = turn_loop(provider.clone());
        let mut session = Session::default();

        let outcome = tl.run(&conv(), &mut session, Turn::user_text("hi")).await;
        assert_eq!(outcome, TerminalOutcome::Answer("Hello!".into()));
        assert_eq!(session.history.len(), 2);
        assert_eq!(provider.call_count(), 1);

        let request = &provider.requests()[0];
        assert_eq!(request.system, "You manage flashcards.");
        assert!(request.tools.iter().any(|t| t.name == "search_notes"));
    }

    #[tokio::test]
    async fn results_follow_invocations_in_order() {
        let provider = Arc::new(ScriptedProvider::replies(vec![
            invocation_response(
                "Checking.",
                &[
                    ("list_decks", json!({})),
                    ("no_such_operation", json!({})),
                    ("collection_stats", json!({})),
                ],
            ),
            text_response("Done."),
        ]));
        let tl = turn_loop(provider.clone());
        let mut session = Session::default();

        let outcome = tl.run(&conv(), &mut session, Turn::user_text("stats")).await;
        assert_eq!(outcome.text(), "Done.");
        session.history.check_pairing().unwrap();

        let turns = session.history.turns();
        assert_eq!(turns.len(), 4);
        let ids: Vec<&str> = turns[2].result_ids().collect();
        assert_eq!(ids, ["call_0_list_decks", "call_1_no_such_operation", "call_2_collection_stats"]);
        match &turns[2].segments[1] {
            Segment::ToolResult { is_error, payload, .. } => {
                assert!(is_error);
                assert_eq!(payload["error"], "Unknown operation: no_such_operation");
            }
            other => panic!("unexpected segment {other:?}"),
        }

        // the second request carried the results back
        assert_eq!(provider.requests()[1].turns.len(), 3);
    }

    #[tokio::test]
    async fn empty_answer_falls_back() {
        let empty = ReasoningResponse {
            segments: vec![Segment::text("   ")],
            ..Default::default()
        };
        let provider = Arc::new(ScriptedProvider::replies(vec![empty]));
        let tl = turn_loop(provider);
        let mut session = Session::default();

        let outcome = tl.run(&conv(), &mut session, Turn::user_text("?")).await;
        assert_eq!(outcome.text(), FALLBACK_ANSWER);
        assert_eq!(session.history.last().unwrap().text(), FALLBACK_ANSWER);
    }

    #[tokio::test]
    async fn stops_after_exactly_twenty_rounds() {
        let provider = Arc::new(ScriptedProvider::always(invocation_response(
            "",
            &[("list_decks", json!({}))],
        )));
        let tl = turn_loop(provider.clone());
        let mut session = Session::default();

        let outcome = tl.run(&conv(), &mut session, Turn::user_text("loop")).await;
        assert!(matches!(outcome, TerminalOutcome::Exhausted(_)));
        assert!(outcome.text().contains("could not complete"));
        assert_eq!(provider.call_count(), 20);

        let last = session.history.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        session.history.check_pairing().unwrap();
    }

    #[tokio::test]
    async fn provider_failure_rolls_back_history_and_staged_confirmation() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(invocation_response(
                "",
                &[("add_basic_card", json!({"front": "q", "back": "a"}))],
            )),
            Err(ProviderError::RateLimited { retry_after_secs: 30 }),
        ]));
        let tl = turn_loop(provider);
        let mut session = Session::default();
        session.history.push(Turn::user_text("earlier"));
        session.history.push(Turn::assistant_text("earlier answer"));

        let outcome = tl.run(&conv(), &mut session, Turn::user_text("add q/a")).await;
        assert!(outcome.is_failed());
        assert!(outcome.text().contains("Rate limited"));
        assert_eq!(session.history.len(), 2);
        assert!(session.pending.is_none());
    }

    #[tokio::test]
    async fn staged_confirmation_is_kept_on_success() {
        let provider = Arc::new(ScriptedProvider::replies(vec![
            invocation_response("", &[("add_basic_card", json!({"front": "q", "back": "a"}))]),
            text_response("Here is the card."),
        ]));
        let tl = turn_loop(provider);
        let mut session = Session::default();

        tl.run(&conv(), &mut session, Turn::user_text("add q/a")).await;
        assert!(matches!(session.pending, Some(PendingAction::CardConfirm { .. })));
    }

    #[tokio::test]
    async fn history_is_trimmed_to_the_window() {
        let provider = Arc::new(ScriptedProvider::always(text_response("ok")));
        let tl = turn_loop(provider).with_max_history_turns(4);
        let mut session = Session::default();

        for i in 0..5 {
            tl.run(&conv(), &mut session, Turn::user_text(format!("msg {i}"))).await;
        }
        assert_eq!(session.history.len(), 4);
        assert_eq!(session.history.turns()[0].text(), "msg 3");
    }
}
