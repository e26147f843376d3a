//! Final upload phase.
//!
//! Pushes every project artifact to the archive and sends the completion
//! notification. The cost summary is rebuilt from disk rather than taken
//! from the in-process tracker, so a resumed run reports the whole
//! project and not just the scenes it touched.

use tracing::{info, warn};

use sreel_models::{CostTracker, RenderTier};
use sreel_storage::ProjectLayout;

use crate::context::RunContext;
use crate::error::{PipelineError, PipelineResult};
use crate::phases::{prompts::read_token_usage, PhaseOutcome};

pub async fn run(ctx: &RunContext, layout: &ProjectLayout) -> PipelineResult<PhaseOutcome> {
    let sync = ctx.sync().ok_or_else(|| {
        PipelineError::config_error("archive not configured, cannot upload project")
    })?;

    ctx.set_phase("upload", 1);

    let cost = rollup_from_disk(ctx, layout).await;
    info!("\n{}", cost.summary_block());

    let uploaded = sync.upload_project(layout).await?;
    info!("Uploaded {} files for {}", uploaded, layout.project());

    let scenes = std::fs::read_to_string(layout.scene_prompts_path())
        .map(|text| text.lines().filter(|l| !l.trim().is_empty()).count())
        .unwrap_or(0);
    let images = cost.premium_images + cost.standard_images;
    ctx.notifier()
        .send_completion(layout.project().as_str(), &cost, scenes as u32, images, cost.videos)
        .await;

    ctx.item_done();
    Ok(PhaseOutcome::Completed)
}

/// Rebuild the full-project cost picture from artifacts on disk.
async fn rollup_from_disk(ctx: &RunContext, layout: &ProjectLayout) -> CostTracker {
    let mut cost = CostTracker::new();

    if layout.settings_path().exists() {
        cost.record_settings_call();
    }

    let usage = read_token_usage(layout);
    if usage == Default::default() {
        warn!("No token usage recorded for {}", layout.project());
    }
    cost.add_prompt_usage(&usage);

    let images = ctx.checkpoints().resolve_images(layout).await;
    if let Some(total) = images.iter().max().copied() {
        for index in &images {
            cost.record_image(RenderTier::for_position(*index, total));
        }
    }

    let videos = ctx.checkpoints().resolve_videos(layout).await;
    cost.record_videos(videos.len() as u32);

    cost
}
