//! Motion directive phase.
//!
//! One directive line per scene record, in index order. A rolling window of
//! the last 3 directives keeps camera work coherent across cuts. Resume is
//! by line count: existing lines cover the leading records.

use tracing::{info, warn};

use sreel_models::{SceneRecord, MOTION_PROMPTS_FILE};
use sreel_providers::TextGatewayClient;
use sreel_storage::ProjectLayout;

use crate::context::RunContext;
use crate::error::{PipelineError, PipelineResult};
use crate::phases::{append_line, apply_item_limit, PhaseOutcome};

const MOTION_MAX_TOKENS: u32 = 300;
const MOTION_WINDOW: usize = 3;

const MOTION_SYSTEM: &str = "You write camera and motion directives for an image-to-video \
model. For the scene you receive, answer with exactly one line describing subject motion \
and camera movement in under 30 words. Stay consistent with the recent directives you are \
shown and never introduce elements absent from the image.";

const FALLBACK_DIRECTIVE: &str = "Slow push-in on the subject with subtle parallax.";

pub async fn run(
    ctx: &RunContext,
    layout: &ProjectLayout,
    text: &TextGatewayClient,
) -> PipelineResult<PhaseOutcome> {
    let prompts_path = layout.scene_prompts_path();
    if !prompts_path.exists() {
        return Err(PipelineError::missing_artifact(format!(
            "scene prompts not found at {}",
            prompts_path.display()
        )));
    }
    let document = std::fs::read_to_string(&prompts_path)?;
    let (records, invalid) = SceneRecord::parse_document(&document);
    if invalid > 0 {
        warn!("Ignoring {} invalid scene prompt lines", invalid);
    }
    if records.is_empty() {
        return Err(PipelineError::missing_artifact(
            "scene prompts document has no valid records",
        ));
    }

    let motion_path = layout.motion_prompts_path();
    let mut directives = existing_directives(&motion_path)?;
    let done = directives.len();
    if done >= records.len() {
        info!("All {} motion directives already written, skipping", done);
        return Ok(PhaseOutcome::Skipped);
    }

    let pending: Vec<&SceneRecord> = records.values().skip(done).collect();
    let pending = apply_item_limit(pending, ctx.config().test_item_limit);
    ctx.set_phase("motion", pending.len() as u32);
    info!(
        "Writing {} motion directives for {} ({} already done)",
        pending.len(),
        layout.project(),
        done
    );

    for record in pending {
        let window: Vec<&str> = directives
            .iter()
            .rev()
            .take(MOTION_WINDOW)
            .rev()
            .map(String::as_str)
            .collect();
        let input = build_input(record, &window);

        let completion = text
            .complete(Some(MOTION_SYSTEM), &input, MOTION_MAX_TOKENS)
            .await?;
        ctx.record_cost(|c| c.add_motion_usage(&completion.usage));

        let mut directive = first_line(&completion.output);
        if directive.is_empty() {
            warn!(
                "Empty motion directive for scene {}, using fallback",
                record.index
            );
            directive = FALLBACK_DIRECTIVE.to_string();
        }

        append_line(&motion_path, &directive)?;
        directives.push(directive);
        ctx.item_done();

        tokio::time::sleep(ctx.config().pacing_delay).await;
    }

    if let Some(sync) = ctx.sync() {
        if let Err(e) = sync
            .upload_file(&motion_path, &layout.remote_key(MOTION_PROMPTS_FILE))
            .await
        {
            warn!("Could not mirror motion directives: {}", e);
        }
    }

    info!("Motion directives written: {}", directives.len());
    Ok(PhaseOutcome::Completed)
}

fn existing_directives(path: &std::path::Path) -> PipelineResult<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

fn build_input(record: &SceneRecord, window: &[&str]) -> String {
    let mut input = String::new();
    if !window.is_empty() {
        input.push_str("Recent directives:\n");
        for directive in window {
            input.push_str("- ");
            input.push_str(directive);
            input.push('\n');
        }
        input.push('\n');
    }
    input.push_str(&format!(
        "Scene {} image prompt: {}\n",
        record.index, record.image_prompt
    ));
    if let Some(summary) = &record.visual_summary {
        input.push_str(&format!("Scene summary: {}\n", summary));
    }
    input.push_str("Motion directive:");
    input
}

fn first_line(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use sreel_models::ProjectName;
    use sreel_providers::{RetryPolicy, TextGatewayConfig};
    use sreel_storage::{MemoryStore, ObjectStore, WorkspacePaths};
    use wiremock::matchers::{body_string_contains, method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::PipelineConfig;
    use crate::logging::LogBuffer;
    use crate::notify::Notifier;

    use super::*;

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            pacing_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

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

    fn seeded_workspace(dir: &std::path::Path) -> (RunContext, ProjectLayout, Arc<MemoryStore>) {
        let paths = WorkspacePaths::new(dir);
        let project = ProjectName::new("reef").expect("valid");
        let layout = paths.project(&project);
        std::fs::create_dir_all(layout.root()).expect("mkdir");

        let mut document = String::new();
        for (index, prompt) in [(1u32, "harbor at dawn"), (2, "boats loading"), (3, "fleet departs")]
        {
            let record = SceneRecord::new(index, prompt);
            document.push_str(&record.to_line().expect("line"));
            document.push('\n');
        }
        std::fs::write(layout.scene_prompts_path(), document).expect("write");

        let store = Arc::new(MemoryStore::new());
        let ctx = RunContext::new(
            fast_config(),
            paths,
            Some(store.clone() as Arc<dyn ObjectStore>),
            Notifier::disabled(),
            LogBuffer::default(),
        );
        (ctx, layout, store)
    }

    #[tokio::test]
    async fn test_resumes_from_existing_line_count_and_mirrors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/v1/completions"))
            .and(body_string_contains("Recent directives"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": "Pan right as the crew hauls the nets.",
                "usage": {"output_tokens": 12}
            })))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let (ctx, layout, store) = seeded_workspace(dir.path());
        std::fs::write(layout.motion_prompts_path(), "Static wide shot of the harbor.\n")
            .expect("seed");

        let client = gateway_client(server.uri());
        let outcome = run(&ctx, &layout, &client).await.expect("run");
        assert_eq!(outcome, PhaseOutcome::Completed);

        let lines = existing_directives(&layout.motion_prompts_path()).expect("read");
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Static wide shot of the harbor.");
        assert!(store
            .get(&layout.remote_key(MOTION_PROMPTS_FILE))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_skips_when_every_scene_has_a_directive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (ctx, layout, _store) = seeded_workspace(dir.path());
        std::fs::write(layout.motion_prompts_path(), "one\ntwo\nthree\n").expect("seed");

        let client = gateway_client("http://127.0.0.1:9".to_string());
        let outcome = run(&ctx, &layout, &client).await.expect("run");
        assert_eq!(outcome, PhaseOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_missing_scene_prompts_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = WorkspacePaths::new(dir.path());
        let project = ProjectName::new("reef").expect("valid");
        let layout = paths.project(&project);
        let ctx = RunContext::new(
            fast_config(),
            paths,
            None,
            Notifier::disabled(),
            LogBuffer::default(),
        );

        let client = gateway_client("http://127.0.0.1:9".to_string());
        let result = run(&ctx, &layout, &client).await;
        assert!(matches!(result, Err(PipelineError::MissingArtifact(_))));
    }

    #[test]
    fn test_build_input_includes_window_and_summary() {
        let record = SceneRecord::new(4, "storm rolls in").with_summary("dark clouds over water");
        let input = build_input(&record, &["pan left", "hold"]);
        assert!(input.contains("Recent directives"));
        assert!(input.contains("- pan left"));
        assert!(input.contains("Scene 4 image prompt: storm rolls in"));
        assert!(input.contains("dark clouds over water"));
    }

    #[test]
    fn test_first_line_takes_first_non_empty() {
        assert_eq!(first_line("\n  \nTrack forward.\nextra"), "Track forward.");
        assert_eq!(first_line(""), "");
    }
}
