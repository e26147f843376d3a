//! Scene prompt phase.
//!
//! Synchronous mode walks the script one scene per line, feeding each call
//! a rolling window of the last 3 visual summaries, and appends validated
//! records to `scene_prompts.jsonl` as it goes. Batch mode packs every
//! pending scene into one provider batch and hands the lifecycle to the
//! watcher; `retrieve` is the chained step that lands the results.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use sreel_batch::{
    load_descriptor, write_json_atomic, PollOutcome, Poller, PollerConfig, RequestPayload,
    Retriever, SubmitOutcome, Submitter, TextBatchSource, WatchRegistry,
};
use sreel_models::{JobKind, SceneRecord, TokenUsage, SCENE_PROMPTS_FILE};
use sreel_providers::TextGatewayClient;
use sreel_storage::{CheckpointStore, ProjectLayout};

use crate::context::RunContext;
use crate::error::{PipelineError, PipelineResult};
use crate::phases::{append_line, apply_item_limit, PhaseOutcome};
use crate::script::scene_lines;

const PROMPT_MAX_TOKENS: u32 = 1000;
const PARSE_ATTEMPTS: u32 = 3;
const SUMMARY_WINDOW: usize = 3;

const PROMPTS_SYSTEM: &str = "You turn story beats into image prompts for a vertical \
illustration model. Answer with exactly two tagged fields:\n\
IMAGE_PROMPT: one richly detailed prompt for this scene, under 120 words, repeating \
character descriptions verbatim from the style sheet.\n\
VISUAL_SUMMARY: one sentence capturing what ends up on screen, used as memory for \
later scenes.\n\
No other text.";

/// Synchronous per-scene generation with resume.
pub async fn run_sync(
    ctx: &RunContext,
    layout: &ProjectLayout,
    text: &TextGatewayClient,
    script: &str,
) -> PipelineResult<PhaseOutcome> {
    let scenes = scene_lines(script);
    let script_count = scenes.len() as u32;
    let total = script_count + ctx.config().finale_scenes;

    let done = ctx.checkpoints().resolve_scenes(layout).await;
    if CheckpointStore::is_complete(&done, total) {
        info!("All {} scene prompts already present, skipping", total);
        return Ok(PhaseOutcome::Skipped);
    }

    layout.ensure_dirs().await?;
    let system = compose_system(layout);
    let prompts_path = layout.scene_prompts_path();

    // Summaries from earlier runs feed the window on resume.
    let mut summaries: BTreeMap<u32, String> = BTreeMap::new();
    if prompts_path.exists() {
        let document = std::fs::read_to_string(&prompts_path)?;
        let (records, _invalid) = SceneRecord::parse_document(&document);
        for (index, record) in records {
            if let Some(summary) = record.visual_summary {
                summaries.insert(index, summary);
            }
        }
    }

    let mut usage_total = read_token_usage(layout);

    let pending: Vec<u32> = (1..=total).filter(|i| !done.contains(i)).collect();
    let pending = apply_item_limit(pending, ctx.config().test_item_limit);
    ctx.set_phase("prompts", pending.len() as u32);
    info!(
        "Generating {} scene prompts for {} ({} of {} already done)",
        pending.len(),
        layout.project(),
        done.len(),
        total
    );

    let mut written = 0u32;
    let mut failed = 0u32;
    let mut since_mirror = 0usize;

    for index in pending {
        let input = scene_input(&scenes, index, script_count, total, &summaries);

        let mut parsed = None;
        for attempt in 1..=PARSE_ATTEMPTS {
            let completion = text
                .complete(Some(system.as_str()), &input, PROMPT_MAX_TOKENS)
                .await?;
            ctx.record_cost(|c| c.add_prompt_usage(&completion.usage));
            usage_total.add(&completion.usage);

            match parse_tagged(&completion.output) {
                Some(fields) => {
                    parsed = Some(fields);
                    break;
                }
                None => warn!(
                    "Scene {} response missing tagged fields (attempt {}/{})",
                    index, attempt, PARSE_ATTEMPTS
                ),
            }
            tokio::time::sleep(ctx.config().pacing_delay).await;
        }

        match parsed {
            Some((image_prompt, visual_summary)) => {
                let mut record =
                    SceneRecord::new(index, image_prompt).with_summary(visual_summary.clone());
                if index > script_count {
                    record = record.finale();
                }
                append_line(&prompts_path, &record.to_line()?)?;
                summaries.insert(index, visual_summary);
                written += 1;
                since_mirror += 1;
            }
            None => {
                // An invalid line keeps the scene out of the checkpoint, so
                // the next run retries it.
                let line = serde_json::json!({
                    "index": index,
                    "image_prompt": "",
                    "failed": true
                });
                append_line(&prompts_path, &line.to_string())?;
                failed += 1;
                warn!("Scene {} failed after {} attempts", index, PARSE_ATTEMPTS);
            }
        }

        write_json_atomic(&layout.token_usage_path(), &usage_total)?;
        ctx.item_done();

        if since_mirror >= ctx.config().mirror_stride {
            mirror_prompts(ctx, layout).await;
            since_mirror = 0;
        }
        tokio::time::sleep(ctx.config().pacing_delay).await;
    }

    mirror_prompts(ctx, layout).await;
    info!(
        "Prompt phase done: {} written, {} failed, ${:.4} in tokens",
        written,
        failed,
        usage_total.cost_usd()
    );

    if written == 0 && failed > 0 {
        return Ok(PhaseOutcome::failed(format!(
            "all {} pending scenes failed",
            failed
        )));
    }
    Ok(PhaseOutcome::Completed)
}

/// Submit one batch covering every pending scene and register it with the
/// watcher. The chained `retrieve-prompts` step lands the results later.
pub async fn submit_batch(
    ctx: &RunContext,
    layout: &ProjectLayout,
    text: Arc<TextGatewayClient>,
    script: &str,
) -> PipelineResult<PhaseOutcome> {
    let scenes = scene_lines(script);
    let script_count = scenes.len() as u32;
    let total = script_count + ctx.config().finale_scenes;
    let system = compose_system(layout);

    // Batch items cannot see earlier results, so each request stands alone
    // on the style sheet instead of a summary window.
    let empty = BTreeMap::new();
    let mut items: Vec<(u32, RequestPayload)> = Vec::new();
    for index in 1..=total {
        let input = scene_input(&scenes, index, script_count, total, &empty);
        let params = text.params(Some(system.clone()), input, PROMPT_MAX_TOKENS);
        items.push((index, RequestPayload::Completion(params)));
    }

    layout.ensure_dirs().await?;
    let source = Arc::new(TextBatchSource::new(text));
    let submitter = Submitter::new(source, ctx.checkpoints());
    match submitter.submit(layout, items).await? {
        SubmitOutcome::Submitted(descriptor) => {
            let mut registry = WatchRegistry::open(ctx.paths(), ctx.store()).await?;
            registry.upsert(descriptor.clone());
            registry.save().await?;
            info!(
                "Prompt batch {} registered for watching ({} requests)",
                descriptor.id, descriptor.request_count
            );
            Ok(PhaseOutcome::Completed)
        }
        SubmitOutcome::AlreadyComplete { done } => {
            info!("All {} scene prompts already present, skipping", done);
            Ok(PhaseOutcome::Skipped)
        }
    }
}

/// Chained step: wait out the prompt batch if needed, then land results.
pub async fn retrieve(
    ctx: &RunContext,
    layout: &ProjectLayout,
    text: Arc<TextGatewayClient>,
) -> PipelineResult<PhaseOutcome> {
    let mut descriptor = load_descriptor(layout, JobKind::PromptBatch)?.ok_or_else(|| {
        PipelineError::missing_artifact(format!(
            "no prompt batch descriptor for {}",
            layout.project()
        ))
    })?;

    let source = Arc::new(TextBatchSource::new(text));
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
                    "prompt batch {} ended {}",
                    descriptor.id, state
                )));
            }
            PollOutcome::TimedOut => {
                return Ok(PhaseOutcome::failed(format!(
                    "prompt batch {} still running after the local wait ceiling",
                    descriptor.id
                )));
            }
        }
    }

    let retriever = Retriever::new(source, ctx.sync());
    let report = retriever.retrieve(layout, &mut descriptor).await?;
    info!(
        "Prompt batch landed: {} ok, {} failed",
        report.success_count, report.failed_count
    );

    if report.success_count == 0 && report.failed_count > 0 {
        return Ok(PhaseOutcome::failed("every prompt batch item failed"));
    }
    Ok(PhaseOutcome::Completed)
}

fn compose_system(layout: &ProjectLayout) -> String {
    let settings = super::settings::load_settings(layout);
    if settings.trim().is_empty() {
        PROMPTS_SYSTEM.to_string()
    } else {
        format!(
            "{}\n\nCharacter and style sheet:\n{}",
            PROMPTS_SYSTEM, settings
        )
    }
}

/// Build the user input for one scene. Indexes past the script are finale
/// scenes; the rest quote the script line plus the recent summary window.
fn scene_input(
    scenes: &[String],
    index: u32,
    script_count: u32,
    total: u32,
    summaries: &BTreeMap<u32, String>,
) -> String {
    let mut input = String::new();

    let window: Vec<(&u32, &String)> = summaries
        .range(..index)
        .rev()
        .take(SUMMARY_WINDOW)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if !window.is_empty() {
        input.push_str("What the last scenes showed:\n");
        for (i, summary) in window {
            input.push_str(&format!("- scene {}: {}\n", i, summary));
        }
        input.push('\n');
    }

    if index <= script_count {
        input.push_str(&format!(
            "Scene {} of {}: {}",
            index,
            total,
            scenes[(index - 1) as usize]
        ));
    } else {
        input.push_str(&format!(
            "Scene {} of {} is a closing shot ({} of {}): bring the story to a quiet visual \
             resolution, reusing the established characters and setting.",
            index,
            total,
            index - script_count,
            total - script_count
        ));
    }
    input
}

/// Extract the two tagged fields. Both must be present, in order, and
/// non-empty; interior line breaks collapse to single spaces.
fn parse_tagged(raw: &str) -> Option<(String, String)> {
    const IMAGE_TAG: &str = "IMAGE_PROMPT:";
    const SUMMARY_TAG: &str = "VISUAL_SUMMARY:";

    let image_at = raw.find(IMAGE_TAG)?;
    let summary_at = raw.find(SUMMARY_TAG)?;
    if summary_at < image_at {
        return None;
    }

    let image_prompt = collapse(&raw[image_at + IMAGE_TAG.len()..summary_at]);
    let visual_summary = collapse(&raw[summary_at + SUMMARY_TAG.len()..]);
    if image_prompt.is_empty() || visual_summary.is_empty() {
        return None;
    }
    Some((image_prompt, visual_summary))
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn read_token_usage(layout: &ProjectLayout) -> TokenUsage {
    let path = layout.token_usage_path();
    if !path.exists() {
        return TokenUsage::default();
    }
    match std::fs::read_to_string(&path)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
    {
        Some(usage) => usage,
        None => {
            warn!("Unreadable token usage file, starting fresh");
            TokenUsage::default()
        }
    }
}

async fn mirror_prompts(ctx: &RunContext, layout: &ProjectLayout) {
    if let Some(sync) = ctx.sync() {
        if let Err(e) = sync
            .upload_file(
                &layout.scene_prompts_path(),
                &layout.remote_key(SCENE_PROMPTS_FILE),
            )
            .await
        {
            warn!("Could not mirror scene prompts: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
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

    fn workspace(
        dir: &std::path::Path,
        config: PipelineConfig,
        store: Option<Arc<MemoryStore>>,
    ) -> (RunContext, ProjectLayout) {
        let paths = WorkspacePaths::new(dir);
        let project = ProjectName::new("reef").expect("valid");
        let layout = paths.project(&project);
        let ctx = RunContext::new(
            config,
            paths,
            store.map(|s| s as Arc<dyn ObjectStore>),
            Notifier::disabled(),
            LogBuffer::default(),
        );
        (ctx, layout)
    }

    fn tagged_body(prompt: &str, summary: &str) -> serde_json::Value {
        serde_json::json!({
            "output": format!("IMAGE_PROMPT: {}\nVISUAL_SUMMARY: {}", prompt, summary),
            "usage": {"input_tokens": 200, "output_tokens": 80}
        })
    }

    #[test]
    fn test_parse_tagged_happy_path() {
        let raw = "IMAGE_PROMPT: A harbor at dawn,\nsoft golden light.\nVISUAL_SUMMARY: Boats wait in a quiet harbor.";
        let (prompt, summary) = parse_tagged(raw).expect("parsed");
        assert_eq!(prompt, "A harbor at dawn, soft golden light.");
        assert_eq!(summary, "Boats wait in a quiet harbor.");
    }

    #[test]
    fn test_parse_tagged_rejects_missing_or_reordered_tags() {
        assert!(parse_tagged("just prose with no tags").is_none());
        assert!(parse_tagged("IMAGE_PROMPT: only one field").is_none());
        assert!(parse_tagged("VISUAL_SUMMARY: first\nIMAGE_PROMPT: second").is_none());
        assert!(parse_tagged("IMAGE_PROMPT:\nVISUAL_SUMMARY: empty prompt").is_none());
    }

    #[test]
    fn test_scene_input_marks_finales_and_window() {
        let scenes = vec!["The harbor wakes.".to_string(), "Boats depart.".to_string()];
        let mut summaries = BTreeMap::new();
        for i in 1..=4u32 {
            summaries.insert(i, format!("summary {}", i));
        }

        let regular = scene_input(&scenes, 2, 2, 4, &summaries);
        assert!(regular.contains("Scene 2 of 4: Boats depart."));
        assert!(regular.contains("- scene 1: summary 1"));
        assert!(!regular.contains("- scene 2:"));

        let finale = scene_input(&scenes, 4, 2, 4, &summaries);
        assert!(finale.contains("closing shot (2 of 2)"));
        // Window keeps only the last three summaries before the scene.
        assert!(!finale.contains("- scene 0:"));
        assert!(finale.contains("- scene 3: summary 3"));
    }

    #[tokio::test]
    async fn test_sync_run_resumes_and_appends_finales() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/v1/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(tagged_body("a detailed scene", "what it showed")),
            )
            .expect(3)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(MemoryStore::new());
        let (ctx, layout) = workspace(dir.path(), fast_config(), Some(store.clone()));

        // Scene 1 of a 2-line script is already done; 2 finales make total 4.
        std::fs::create_dir_all(layout.root()).expect("mkdir");
        let seed = SceneRecord::new(1, "seeded prompt").with_summary("seeded summary");
        std::fs::write(
            layout.scene_prompts_path(),
            format!("{}\n", seed.to_line().expect("line")),
        )
        .expect("seed");

        let client = gateway_client(server.uri());
        let script = "The harbor wakes.\nBoats depart.\n";
        let outcome = run_sync(&ctx, &layout, &client, script).await.expect("run");
        assert_eq!(outcome, PhaseOutcome::Completed);

        let document = std::fs::read_to_string(layout.scene_prompts_path()).expect("read");
        let (records, invalid) = SceneRecord::parse_document(&document);
        assert_eq!(invalid, 0);
        assert_eq!(records.len(), 4);
        assert_eq!(records[&1].image_prompt, "seeded prompt");
        assert_eq!(records[&3].is_finale, Some(true));
        assert_eq!(records[&4].is_finale, Some(true));
        assert_eq!(records[&2].is_finale, None);

        let usage: TokenUsage = serde_json::from_str(
            &std::fs::read_to_string(layout.token_usage_path()).expect("usage file"),
        )
        .expect("usage json");
        assert_eq!(usage.output_tokens, 3 * 80);

        assert!(store
            .get(&layout.remote_key(SCENE_PROMPTS_FILE))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_sync_run_retries_untagged_response_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/v1/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": "sorry, here is prose without tags",
                "usage": {"output_tokens": 5}
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(url_path("/v1/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(tagged_body("recovered", "fine now")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let config = PipelineConfig {
            finale_scenes: 0,
            ..fast_config()
        };
        let (ctx, layout) = workspace(dir.path(), config, None);

        let client = gateway_client(server.uri());
        let outcome = run_sync(&ctx, &layout, &client, "One scene only.\n")
            .await
            .expect("run");
        assert_eq!(outcome, PhaseOutcome::Completed);

        let document = std::fs::read_to_string(layout.scene_prompts_path()).expect("read");
        let (records, _) = SceneRecord::parse_document(&document);
        assert_eq!(records[&1].image_prompt, "recovered");
    }

    #[tokio::test]
    async fn test_sync_run_records_failed_line_after_three_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/v1/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": "never tagged",
                "usage": {"output_tokens": 5}
            })))
            .expect(3)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let config = PipelineConfig {
            finale_scenes: 0,
            ..fast_config()
        };
        let (ctx, layout) = workspace(dir.path(), config, None);

        let client = gateway_client(server.uri());
        let outcome = run_sync(&ctx, &layout, &client, "One scene only.\n")
            .await
            .expect("run");
        assert!(outcome.is_failure());

        // The failed line parses as JSON but stays out of the checkpoint.
        let document = std::fs::read_to_string(layout.scene_prompts_path()).expect("read");
        let (records, invalid) = SceneRecord::parse_document(&document);
        assert!(records.is_empty());
        assert_eq!(invalid, 1);
        let done = ctx.checkpoints().resolve_scenes(&layout).await;
        assert!(done.is_empty());
    }

    #[tokio::test]
    async fn test_submit_batch_registers_descriptor_for_watching() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/v1/batches"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "tb_42",
                "processing_status": "in_progress"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let (ctx, layout) = workspace(dir.path(), fast_config(), None);

        let client = Arc::new(gateway_client(server.uri()));
        let outcome = submit_batch(&ctx, &layout, client, "The harbor wakes.\nBoats depart.\n")
            .await
            .expect("submit");
        assert_eq!(outcome, PhaseOutcome::Completed);

        let descriptor = load_descriptor(&layout, JobKind::PromptBatch)
            .expect("load")
            .expect("present");
        assert_eq!(descriptor.id.as_str(), "tb_42");
        assert_eq!(descriptor.request_count, 4);

        let registry = WatchRegistry::open(ctx.paths(), None).await.expect("open");
        assert!(registry.get("reef").is_some());
    }
}
