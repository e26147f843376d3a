//! Character settings phase.
//!
//! One synchronous completion over the whole script produces the character
//! and style sheet every later prompt builds on. The phase is skipped when
//! the sheet already exists in either storage tier.

use tracing::{info, warn};

use sreel_batch::write_atomic;
use sreel_models::CHARACTER_SETTINGS_FILE;
use sreel_providers::TextGatewayClient;
use sreel_storage::ProjectLayout;

use crate::context::RunContext;
use crate::error::PipelineResult;
use crate::phases::PhaseOutcome;

const SETTINGS_MAX_TOKENS: u32 = 2000;

const SETTINGS_SYSTEM: &str = "You design the visual bible for a short vertical video. \
From the story you receive, produce a character and style sheet: for each recurring \
character give name, age, build, hair, clothing and one distinguishing detail; then \
fix the overall art direction (palette, lighting, rendering style) in a short closing \
block. Keep every description concrete enough to be pasted into an image prompt.";

pub async fn run(
    ctx: &RunContext,
    layout: &ProjectLayout,
    text: &TextGatewayClient,
    script: &str,
) -> PipelineResult<PhaseOutcome> {
    let path = layout.settings_path();
    if path.exists() {
        info!("Character settings already present, skipping");
        return Ok(PhaseOutcome::Skipped);
    }

    if let Some(sync) = ctx.sync() {
        match sync
            .try_download(&layout.remote_key(CHARACTER_SETTINGS_FILE), &path)
            .await
        {
            Ok(true) => {
                info!("Character settings restored from archive, skipping");
                return Ok(PhaseOutcome::Skipped);
            }
            Ok(false) => {}
            Err(e) => warn!("Could not check archive for settings: {}", e),
        }
    }

    ctx.set_phase("settings", 1);
    info!("Generating character settings for {}", layout.project());

    let completion = text
        .complete(Some(SETTINGS_SYSTEM), script, SETTINGS_MAX_TOKENS)
        .await?;

    layout.ensure_dirs().await?;
    write_atomic(&path, completion.output.as_bytes())?;
    ctx.record_cost(|c| c.record_settings_call());
    ctx.item_done();

    if let Some(sync) = ctx.sync() {
        if let Err(e) = sync
            .upload_file(&path, &layout.remote_key(CHARACTER_SETTINGS_FILE))
            .await
        {
            warn!("Could not mirror character settings: {}", e);
        }
    }

    info!("Character settings written ({} bytes)", completion.output.len());
    Ok(PhaseOutcome::Completed)
}

/// Read the settings sheet for use as prompt context. Missing sheet is
/// tolerated; prompts then run without character grounding.
pub fn load_settings(layout: &ProjectLayout) -> String {
    match std::fs::read_to_string(layout.settings_path()) {
        Ok(text) => text,
        Err(_) => {
            warn!("No character settings on disk, prompts run without them");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use sreel_models::ProjectName;
    use sreel_providers::{RetryPolicy, TextGatewayConfig};
    use sreel_storage::{MemoryStore, ObjectStore, WorkspacePaths};
    use wiremock::matchers::{method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::PipelineConfig;
    use crate::logging::LogBuffer;
    use crate::notify::Notifier;

    use super::*;

    fn gateway_client(base_url: String) -> TextGatewayClient {
        TextGatewayClient::new(TextGatewayConfig {
            base_url,
            api_key: "test-key".to_string(),
            model: "scribe-2".to_string(),
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::new(1, Duration::from_millis(1)),
        })
        .expect("client")
    }

    fn context_with_store(
        dir: &std::path::Path,
        store: Option<Arc<MemoryStore>>,
    ) -> (RunContext, ProjectLayout) {
        let paths = WorkspacePaths::new(dir);
        let project = ProjectName::new("reef").expect("valid");
        let layout = paths.project(&project);
        let ctx = RunContext::new(
            PipelineConfig::default(),
            paths,
            store.map(|s| s as Arc<dyn ObjectStore>),
            Notifier::disabled(),
            LogBuffer::default(),
        );
        (ctx, layout)
    }

    #[tokio::test]
    async fn test_generates_and_mirrors_settings() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/v1/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": "MAYA: 30s diver, short black hair, orange wetsuit.",
                "usage": {"input_tokens": 120, "output_tokens": 40}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(MemoryStore::new());
        let (ctx, layout) = context_with_store(dir.path(), Some(store.clone()));
        let client = gateway_client(server.uri());

        let outcome = run(&ctx, &layout, &client, "A diver explores a reef.")
            .await
            .expect("run");
        assert_eq!(outcome, PhaseOutcome::Completed);

        let written = std::fs::read_to_string(layout.settings_path()).expect("read");
        assert!(written.contains("MAYA"));
        let mirrored = store
            .get(&layout.remote_key(CHARACTER_SETTINGS_FILE))
            .await
            .expect("mirrored");
        assert_eq!(mirrored, written.as_bytes());
        assert!(ctx.cost_snapshot().total_usd() > 0.0);
    }

    #[tokio::test]
    async fn test_skips_when_local_file_exists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (ctx, layout) = context_with_store(dir.path(), None);
        std::fs::create_dir_all(layout.root()).expect("mkdir");
        std::fs::write(layout.settings_path(), "existing sheet").expect("write");

        // Gateway URL is unreachable; a request would fail the test.
        let client = gateway_client("http://127.0.0.1:9".to_string());
        let outcome = run(&ctx, &layout, &client, "script").await.expect("run");
        assert_eq!(outcome, PhaseOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_downloads_remote_settings_instead_of_generating() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(MemoryStore::new());
        let (ctx, layout) = context_with_store(dir.path(), Some(store.clone()));
        store
            .put(
                &layout.remote_key(CHARACTER_SETTINGS_FILE),
                b"archived sheet".to_vec(),
                "text/plain",
            )
            .await
            .expect("put");

        let client = gateway_client("http://127.0.0.1:9".to_string());
        let outcome = run(&ctx, &layout, &client, "script").await.expect("run");
        assert_eq!(outcome, PhaseOutcome::Skipped);

        let local = std::fs::read_to_string(layout.settings_path()).expect("read");
        assert_eq!(local, "archived sheet");
    }

    #[test]
    fn test_load_settings_tolerates_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (_ctx, layout) = context_with_store(dir.path(), None);
        assert_eq!(load_settings(&layout), "");
    }
}
