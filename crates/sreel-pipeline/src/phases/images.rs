//! Image generation phase.
//!
//! Synchronous mode renders each pending scene in index order, applying the
//! render-tier policy per position. A moderation rejection gets exactly one
//! retry with a sanitized prompt, then the item is counted failed and the
//! run moves on. Batch mode uploads one JSONL batch and registers it with
//! the watcher; `retrieve` is the chained landing step.

use std::sync::Arc;

use tracing::{info, warn};

use sreel_batch::{
    load_descriptor, write_atomic, ImageBatchSource, PollOutcome, Poller, PollerConfig,
    RequestPayload, Retriever, SubmitOutcome, Submitter, WatchRegistry,
};
use sreel_models::{JobKind, RenderTier, SceneRecord};
use sreel_providers::ImageGatewayClient;
use sreel_storage::ProjectLayout;

use crate::context::RunContext;
use crate::error::{PipelineError, PipelineResult};
use crate::phases::{apply_item_limit, PhaseOutcome};

/// Word substitutions for the single sanitized moderation retry.
const SANITIZE_MAP: &[(&str, &str)] = &[
    ("blood", "red liquid"),
    ("weapon", "tool"),
    ("gun", "equipment"),
    ("knife", "cutting tool"),
    ("aggressive", "intense"),
    ("violent", "dynamic"),
];

/// Synchronous per-scene rendering with resume.
pub async fn run_sync(
    ctx: &RunContext,
    layout: &ProjectLayout,
    image: &ImageGatewayClient,
) -> PipelineResult<PhaseOutcome> {
    let records = load_scene_records(layout)?;
    let total = records.keys().next_back().copied().unwrap_or(0);

    let done = ctx.checkpoints().resolve_images(layout).await;
    let pending: Vec<&SceneRecord> = records
        .values()
        .filter(|r| !done.contains(&r.index))
        .collect();
    if pending.is_empty() {
        info!("All {} images already present, skipping", records.len());
        return Ok(PhaseOutcome::Skipped);
    }
    let pending = apply_item_limit(pending, ctx.config().test_item_limit);

    layout.ensure_dirs().await?;
    ctx.set_phase("images", pending.len() as u32);
    info!(
        "Rendering {} images for {} ({} of {} already done)",
        pending.len(),
        layout.project(),
        done.len(),
        records.len()
    );

    let mut rendered = 0u32;
    let mut failed = 0u32;

    for record in pending {
        let index = record.index;
        let tier = RenderTier::for_position(index, total);

        let bytes = match image.generate(tier, &record.image_prompt).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.is_moderation() => {
                warn!(
                    "Scene {} prompt rejected by moderation, retrying sanitized",
                    index
                );
                let sanitized = sanitize_prompt(&record.image_prompt);
                match image.generate(tier, &sanitized).await {
                    Ok(bytes) => Some(bytes),
                    Err(retry_err) if retry_err.is_fatal() => return Err(retry_err.into()),
                    Err(retry_err) => {
                        warn!("Sanitized retry for scene {} failed: {}", index, retry_err);
                        None
                    }
                }
            }
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!("Scene {} image failed: {}", index, e);
                None
            }
        };

        match bytes {
            Some(bytes) => {
                let path = layout.image_path(index);
                write_atomic(&path, &bytes)?;
                ctx.record_cost(|c| c.record_image(tier));
                rendered += 1;

                if let Some(sync) = ctx.sync() {
                    if let Err(e) = sync
                        .upload_file(&path, &layout.remote_image_key(index))
                        .await
                    {
                        warn!("Could not mirror image {}: {}", index, e);
                    }
                }
            }
            None => failed += 1,
        }

        ctx.item_done();
        tokio::time::sleep(ctx.config().pacing_delay).await;
    }

    info!("Image phase done: {} rendered, {} failed", rendered, failed);
    if rendered == 0 && failed > 0 {
        return Ok(PhaseOutcome::failed(format!(
            "all {} pending images failed",
            failed
        )));
    }
    Ok(PhaseOutcome::Completed)
}

/// Submit one image batch covering every pending scene and register it
/// with the watcher.
pub async fn submit_batch(
    ctx: &RunContext,
    layout: &ProjectLayout,
    image: Arc<ImageGatewayClient>,
) -> PipelineResult<PhaseOutcome> {
    let records = load_scene_records(layout)?;
    let total = records.keys().next_back().copied().unwrap_or(0);

    let items: Vec<(u32, RequestPayload)> = records
        .values()
        .map(|record| {
            let tier = RenderTier::for_position(record.index, total);
            let body = image.config().batch_body(tier, &record.image_prompt);
            (record.index, RequestPayload::Image(body))
        })
        .collect();

    layout.ensure_dirs().await?;
    let source = Arc::new(ImageBatchSource::new(image));
    let submitter = Submitter::new(source, ctx.checkpoints());
    match submitter.submit(layout, items).await? {
        SubmitOutcome::Submitted(descriptor) => {
            let mut registry = WatchRegistry::open(ctx.paths(), ctx.store()).await?;
            registry.upsert(descriptor.clone());
            registry.save().await?;
            info!(
                "Image batch {} registered for watching ({} requests)",
                descriptor.id, descriptor.request_count
            );
            Ok(PhaseOutcome::Completed)
        }
        SubmitOutcome::AlreadyComplete { done } => {
            info!("All {} images already present, skipping", done);
            Ok(PhaseOutcome::Skipped)
        }
    }
}

/// Chained step: wait out the image batch if needed, then land artifacts.
pub async fn retrieve(
    ctx: &RunContext,
    layout: &ProjectLayout,
    image: Arc<ImageGatewayClient>,
) -> PipelineResult<PhaseOutcome> {
    let mut descriptor = load_descriptor(layout, JobKind::ImageBatch)?.ok_or_else(|| {
        PipelineError::missing_artifact(format!(
            "no image batch descriptor for {}",
            layout.project()
        ))
    })?;

    let source = Arc::new(ImageBatchSource::new(image));
    if descriptor.is_active() {
        let poller = Poller::new(
            source.clone(),
            PollerConfig {
                interval: ctx.config().batch_check_interval,
                max_wait: ctx.config().batch_max_wait,
                ..Default::default()
            },
        );
        match poller.wait_for_completion(layout, &mut descriptor).await? {
            PollOutcome::Completed => {}
            PollOutcome::ProviderFailed(state) => {
                return Ok(PhaseOutcome::failed(format!(
                    "image batch {} ended {}",
                    descriptor.id, state
                )));
            }
            PollOutcome::TimedOut => {
                return Ok(PhaseOutcome::failed(format!(
                    "image batch {} still running after the local wait ceiling",
                    descriptor.id
                )));
            }
        }
    }

    let retriever = Retriever::new(source, ctx.sync());
    let report = retriever.retrieve(layout, &mut descriptor).await?;
    info!(
        "Image batch landed: {} ok, {} failed",
        report.success_count, report.failed_count
    );

    if report.success_count == 0 && report.failed_count > 0 {
        return Ok(PhaseOutcome::failed("every image batch item failed"));
    }
    Ok(PhaseOutcome::Completed)
}

fn load_scene_records(
    layout: &ProjectLayout,
) -> PipelineResult<std::collections::BTreeMap<u32, SceneRecord>> {
    let path = layout.scene_prompts_path();
    if !path.exists() {
        return Err(PipelineError::missing_artifact(format!(
            "scene prompts not found at {}",
            path.display()
        )));
    }
    let document = std::fs::read_to_string(&path)?;
    let (records, invalid) = SceneRecord::parse_document(&document);
    if invalid > 0 {
        warn!("Ignoring {} invalid scene prompt lines", invalid);
    }
    if records.is_empty() {
        return Err(PipelineError::missing_artifact(
            "scene prompts document has no valid records",
        ));
    }
    Ok(records)
}

/// Replace flagged words before the one alternate attempt.
fn sanitize_prompt(prompt: &str) -> String {
    let mut out = prompt.to_string();
    for (word, replacement) in SANITIZE_MAP {
        out = out.replace(word, replacement);
        out = out.replace(&capitalize(word), replacement);
    }
    out
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use sreel_models::ProjectName;
    use sreel_providers::{ImageGatewayConfig, RetryPolicy};
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

    fn gateway_client(base_url: String) -> ImageGatewayClient {
        ImageGatewayClient::new(ImageGatewayConfig {
            base_url,
            api_key: "test-key".to_string(),
            premium_model: "pictor-pro".to_string(),
            standard_model: "pictor-lite".to_string(),
            size: "1024x1536".to_string(),
            quality: "high".to_string(),
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::new(1, Duration::from_millis(1)),
        })
        .expect("client")
    }

    fn seeded_workspace(
        dir: &std::path::Path,
        prompts: &[(u32, &str)],
        store: Option<Arc<MemoryStore>>,
    ) -> (RunContext, ProjectLayout) {
        let paths = WorkspacePaths::new(dir);
        let project = ProjectName::new("reef").expect("valid");
        let layout = paths.project(&project);
        std::fs::create_dir_all(layout.root()).expect("mkdir");

        let mut document = String::new();
        for (index, prompt) in prompts {
            document.push_str(&SceneRecord::new(*index, *prompt).to_line().expect("line"));
            document.push('\n');
        }
        std::fs::write(layout.scene_prompts_path(), document).expect("write");

        let ctx = RunContext::new(
            fast_config(),
            paths,
            store.map(|s| s as Arc<dyn ObjectStore>),
            Notifier::disabled(),
            LogBuffer::default(),
        );
        (ctx, layout)
    }

    fn image_body() -> serde_json::Value {
        serde_json::json!({
            "data": [{"b64_json": STANDARD.encode(b"png bytes")}]
        })
    }

    #[test]
    fn test_sanitize_replaces_flagged_words() {
        let prompt = "Blood on the knife, an aggressive stance";
        let sanitized = sanitize_prompt(prompt);
        assert_eq!(
            sanitized,
            "red liquid on the cutting tool, an intense stance"
        );
        assert_eq!(sanitize_prompt("calm harbor"), "calm harbor");
    }

    #[tokio::test]
    async fn test_moderation_gets_exactly_one_sanitized_retry() {
        let server = MockServer::start().await;
        // Scene 2 carries a flagged word: rejected once, then accepted
        // with the sanitized wording.
        Mock::given(method("POST"))
            .and(url_path("/v1/images"))
            .and(body_string_contains("blood"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"code": "content_policy_violation", "message": "flagged"}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(url_path("/v1/images"))
            .and(body_string_contains("red liquid"))
            .respond_with(ResponseTemplate::new(200).set_body_json(image_body()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(url_path("/v1/images"))
            .respond_with(ResponseTemplate::new(200).set_body_json(image_body()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let (ctx, layout) = seeded_workspace(
            dir.path(),
            &[(1, "calm harbor"), (2, "blood in the water")],
            None,
        );

        let client = gateway_client(server.uri());
        let outcome = run_sync(&ctx, &layout, &client).await.expect("run");
        assert_eq!(outcome, PhaseOutcome::Completed);

        assert!(layout.image_path(1).exists());
        assert!(layout.image_path(2).exists());
    }

    #[tokio::test]
    async fn test_checkpointed_scenes_are_not_rendered_again() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/v1/images"))
            .respond_with(ResponseTemplate::new(200).set_body_json(image_body()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(MemoryStore::new());
        let (ctx, layout) =
            seeded_workspace(dir.path(), &[(1, "done"), (2, "pending")], Some(store.clone()));
        std::fs::create_dir_all(layout.images_dir()).expect("mkdir");
        std::fs::write(layout.image_path(1), b"already rendered").expect("seed");

        let client = gateway_client(server.uri());
        let outcome = run_sync(&ctx, &layout, &client).await.expect("run");
        assert_eq!(outcome, PhaseOutcome::Completed);

        // The checkpointed artifact is untouched, the new one is mirrored.
        let seeded = std::fs::read(layout.image_path(1)).expect("read");
        assert_eq!(seeded, b"already rendered");
        assert!(store.get(&layout.remote_image_key(2)).await.is_ok());
    }

    #[tokio::test]
    async fn test_account_error_aborts_the_phase() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/v1/images"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {"code": "invalid_api_key", "message": "key revoked"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let (ctx, layout) = seeded_workspace(dir.path(), &[(1, "scene"), (2, "scene")], None);

        let client = gateway_client(server.uri());
        let result = run_sync(&ctx, &layout, &client).await;
        assert!(matches!(result, Err(PipelineError::Provider(_))));
        assert!(!layout.image_path(1).exists());
    }

    #[tokio::test]
    async fn test_submit_batch_uploads_and_registers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/v1/files"))
            .and(body_string_contains("image_001"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": "file_batch_in"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(url_path("/v1/batches"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "ib_7",
                "status": "validating",
                "request_counts": {"total": 2, "completed": 0, "failed": 0}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let (ctx, layout) = seeded_workspace(dir.path(), &[(1, "one"), (2, "two")], None);

        let client = Arc::new(gateway_client(server.uri()));
        let outcome = submit_batch(&ctx, &layout, client).await.expect("submit");
        assert_eq!(outcome, PhaseOutcome::Completed);

        let descriptor = load_descriptor(&layout, JobKind::ImageBatch)
            .expect("load")
            .expect("present");
        assert_eq!(descriptor.id.as_str(), "ib_7");
        assert_eq!(descriptor.input_file_id.as_deref(), Some("file_batch_in"));

        let registry = WatchRegistry::open(ctx.paths(), None).await.expect("open");
        assert!(registry.get("reef").is_some());
    }
}
