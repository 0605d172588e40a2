//! Tool execution gateway.
//!
//! Every operation waits for exclusive use of the collection, runs against a
//! fresh open of it and commits only when the handler returns `Ok`. Whatever
//! goes wrong inside a handler (argument errors, store errors, panics) is
//! rolled back and comes back as an error payload the reasoning service can
//! read; nothing propagates out of `execute`.

use deckhand_audit::ChangeLog;
use deckhand_core::collection::{CollectionGuard, KnowledgeStore};
use deckhand_core::error::ToolError;
use deckhand_core::pending::StagedCall;
use deckhand_core::provider::ToolDefinition;
use deckhand_tools::{ToolCatalog, ToolContext, ToolOutput, ToolSettings, check_required};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Runs catalog operations against the knowledge store.
#[derive(Clone)]
pub struct ToolGateway {
    catalog: Arc<ToolCatalog>,
    store: Arc<dyn KnowledgeStore>,
    changes: Arc<ChangeLog>,
    settings: ToolSettings,
}

impl ToolGateway {
    pub fn new(
        catalog: Arc<ToolCatalog>,
        store: Arc<dyn KnowledgeStore>,
        changes: Arc<ChangeLog>,
        settings: ToolSettings,
    ) -> Self {
        Self {
            catalog,
            store,
            changes,
            settings,
        }
    }

    /// Operation definitions advertised to the reasoning service.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.catalog.definitions()
    }

    pub fn settings(&self) -> &ToolSettings {
        &self.settings
    }

    pub fn changes(&self) -> &Arc<ChangeLog> {
        &self.changes
    }

    /// Run an operation on behalf of the reasoning service.
    ///
    /// Gated operations only stage a confirmation here.
    pub async fn execute(&self, name: &str, arguments: serde_json::Value) -> ToolOutput {
        self.run(name, arguments, false).await
    }

    /// Replay a staged call after the user confirmed it.
    pub async fn execute_confirmed(&self, call: &StagedCall) -> ToolOutput {
        self.run(&call.operation, call.arguments.clone(), true).await
    }

    async fn run(&self, name: &str, arguments: serde_json::Value, confirmed: bool) -> ToolOutput {
        let Some(tool) = self.catalog.get(name) else {
            warn!(tool = %name, "Unknown operation requested");
            return ToolOutput::error(ToolError::NotFound(name.to_string()).to_string());
        };
        if let Err(e) = check_required(&tool.parameters_schema(), &arguments) {
            debug!(tool = %name, error = %e, "Rejected arguments");
            return ToolOutput::error(e.to_string());
        }

        let invocation = async {
            let mut guard = CollectionGuard::acquire(self.store.as_ref()).await?;
            let mut ctx = ToolContext {
                collection: &mut *guard,
                changes: &self.changes,
                settings: &self.settings,
                confirmed,
            };
            let output = tool.execute(&mut ctx, arguments).await?;
            guard.close()?;
            Ok::<_, ToolError>(output)
        };

        match AssertUnwindSafe(invocation).catch_unwind().await {
            Ok(Ok(output)) => {
                debug!(
                    tool = %name,
                    confirmed,
                    is_error = output.is_error,
                    staged = output.confirmation.is_some(),
                    "Operation finished"
                );
                output
            }
            Ok(Err(e)) => {
                warn!(tool = %name, error = %e, "Operation failed");
                ToolOutput::error(e.to_string())
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(tool = %name, %reason, "Operation panicked");
                ToolOutput::error(format!("Operation {name} crashed: {reason}"))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use deckhand_collection::InMemoryStore;
    use deckhand_core::collection::NoteDraft;
    use deckhand_tools::{Tool, default_catalog};
    use serde_json::{Value, json};

    struct Exploding;

    #[async_trait]
    impl Tool for Exploding {
        fn name(&self) -> &str {
            "explode"
        }

        fn description(&self) -> &str {
            "always panics"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn execute(
            &self,
            ctx: &mut ToolContext<'_>,
            _arguments: Value,
        ) -> Result<ToolOutput, ToolError> {
            ctx.collection.add_note(&NoteDraft {
                note_type: "Basic".into(),
                deck: "Default".into(),
                fields: vec![("Front".into(), "q".into()), ("Back".into(), "a".into())],
                tags: vec![],
            })?;
            panic!("handler blew up");
        }
    }

    fn note_count(store: &InMemoryStore) -> usize {
        CollectionGuard::open(store).unwrap().stats().unwrap().notes
    }

    fn gateway(store: Arc<InMemoryStore>) -> ToolGateway {
        let mut catalog = default_catalog();
        catalog.register(Box::new(Exploding));
        ToolGateway::new(
            Arc::new(catalog),
            store,
            Arc::new(ChangeLog::in_memory()),
            ToolSettings::default(),
        )
    }

    #[tokio::test]
    async fn unknown_operation_is_an_error_payload() {
        let gw = gateway(Arc::new(InMemoryStore::new()));
        let out = gw.execute("launch_rockets", json!({})).await;
        assert!(out.is_error);
        assert_eq!(out.payload, json!({"error": "Unknown operation: launch_rockets"}));
    }

    #[tokio::test]
    async fn missing_required_arguments_never_reach_the_handler() {
        let gw = gateway(Arc::new(InMemoryStore::new()));
        let out = gw.execute("add_basic_card", json!({"front": "q"})).await;
        assert!(out.is_error);
        assert!(out.payload["error"].as_str().unwrap().contains("back"));
    }

    #[tokio::test]
    async fn panics_become_error_payloads_and_release_the_collection() {
        let store = Arc::new(InMemoryStore::new());
        let gw = gateway(store.clone());
        let out = gw.execute("explode", json!({})).await;
        assert!(out.is_error);
        assert!(out.payload["error"].as_str().unwrap().contains("handler blew up"));

        // the collection can be opened again afterwards
        let after = gw.execute("collection_stats", json!({})).await;
        assert!(!after.is_error, "{:?}", after.payload);
    }

    #[tokio::test]
    async fn crashed_handler_changes_are_rolled_back() {
        let store = Arc::new(InMemoryStore::new());
        let gw = gateway(store.clone());
        let out = gw.execute("explode", json!({})).await;
        assert!(out.is_error);
        assert_eq!(note_count(&store), 0);
    }

    #[tokio::test]
    async fn overlapping_operations_do_not_lose_writes() {
        let store = Arc::new(InMemoryStore::new());
        let gw = gateway(store.clone());
        let add = |front: &str| {
            let gw = gw.clone();
            let call = StagedCall::new("add_basic_card", json!({"front": front, "back": "x"}));
            async move { gw.execute_confirmed(&call).await }
        };
        let (a, b) = tokio::join!(add("one"), add("two"));
        assert_eq!(a.payload["status"], "added");
        assert_eq!(b.payload["status"], "added");
        assert_eq!(note_count(&store), 2);
    }

    #[tokio::test]
    async fn only_confirmed_replays_commit() {
        let store = Arc::new(InMemoryStore::new());
        let gw = gateway(store.clone());
        let args = json!({"front": "capital of France", "back": "Paris"});

        let staged = gw.execute("add_basic_card", args.clone()).await;
        assert!(staged.confirmation.is_some());
        assert_eq!(note_count(&store), 0);

        let committed = gw
            .execute_confirmed(&StagedCall::new("add_basic_card", args))
            .await;
        assert_eq!(committed.payload["status"], "added");
        assert_eq!(note_count(&store), 1);
    }

    #[test]
    fn definitions_cover_the_catalog() {
        let gw = gateway(Arc::new(InMemoryStore::new()));
        let names: Vec<String> = gw.definitions().into_iter().map(|d| d.name).collect();
        assert!(names.contains(&"search_notes".to_string()));
        assert!(names.contains(&"explode".to_string()));
    }
}
