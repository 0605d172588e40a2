//! Push local changes to the remote sync service.

use crate::{Tool, ToolContext, ToolOutput};
use async_trait::async_trait;
use deckhand_collection::load_auth;
use deckhand_core::error::ToolError;
use serde_json::{Value, json};

pub const SKIPPED_MESSAGE: &str = "Sync skipped (not logged in)";

pub struct SyncCollectionTool;

#[async_trait]
impl Tool for SyncCollectionTool {
    fn name(&self) -> &str {
        "sync_collection"
    }

    fn description(&self) -> &str {
        "Sync the collection with the remote service. Skipped when no credentials are stored."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(
        &self,
        ctx: &mut ToolContext<'_>,
        _arguments: Value,
    ) -> Result<ToolOutput, ToolError> {
        let auth = match load_auth(&ctx.settings.auth_path) {
            Ok(Some(auth)) => auth,
            Ok(None) => {
                return Ok(ToolOutput::ok(json!({
                    "status": "skipped",
                    "message": SKIPPED_MESSAGE,
                })));
            }
            Err(e) => return Ok(ToolOutput::error(format!("Sync failed: {e}"))),
        };

        match ctx.collection.sync(&auth) {
            Ok(status) => {
                ctx.changes
                    .record("sync", &[], json!({ "result": status.to_string() }));
                tracing::info!(%status, "Collection synced");
                Ok(ToolOutput::ok(json!({
                    "status": "synced",
                    "message": status.to_string(),
                })))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Sync failed");
                Ok(ToolOutput::error(format!("Sync failed: {e}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use deckhand_collection::save_auth;
    use deckhand_core::collection::SyncAuth;

    #[tokio::test]
    async fn skipped_without_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = Fixture::new();
        fx.settings.auth_path = dir.path().join("auth.json");
        let out = fx.run(&SyncCollectionTool, json!({}), false).await.unwrap();
        assert_eq!(out.payload["status"], "skipped");
        assert_eq!(out.payload["message"], SKIPPED_MESSAGE);
    }

    #[tokio::test]
    async fn syncs_and_reports_changes() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = Fixture::new();
        fx.settings.auth_path = dir.path().join("auth.json");
        save_auth(
            &fx.settings.auth_path,
            &SyncAuth {
                hkey: "secret".into(),
                endpoint: None,
            },
        )
        .unwrap();
        fx.seed_vocab(&[("猫", "cat")]);

        let first = fx.run(&SyncCollectionTool, json!({}), false).await.unwrap();
        assert_eq!(first.payload["message"], "Synced");
        let second = fx.run(&SyncCollectionTool, json!({}), false).await.unwrap();
        assert_eq!(second.payload["message"], "Synced (no changes needed)");
        assert_eq!(fx.changes.recent(1).unwrap()[0].action, "sync");
    }

    #[tokio::test]
    async fn empty_key_is_reported_as_error_payload() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = Fixture::new();
        fx.settings.auth_path = dir.path().join("auth.json");
        std::fs::write(&fx.settings.auth_path, r#"{"hkey": ""}"#).unwrap();
        let out = fx.run(&SyncCollectionTool, json!({}), false).await.unwrap();
        assert!(out.is_error);
        assert!(out.payload["error"].as_str().unwrap().starts_with("Sync failed"));
    }
}
