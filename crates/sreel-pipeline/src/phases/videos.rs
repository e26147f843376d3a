//! Video generation phase.
//!
//! Submit-one / poll / download per item against the video gateway, which
//! has no batch mode. A lightweight checkpoint is rewritten after every
//! state change so a crash never loses more than the in-flight item.
//! Resume skips completed items; tasks left pending by a previous run are
//! abandoned and their items resubmitted as new work, with the abandoned
//! ids recorded in the summary log.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use sreel_batch::{write_atomic, write_json_atomic};
use sreel_providers::{VideoGatewayClient, VideoTaskState};
use sreel_storage::ProjectLayout;

use crate::context::RunContext;
use crate::error::{PipelineError, PipelineResult};
use crate::phases::{apply_item_limit, PhaseOutcome};

/// Per-item progress, rewritten after every transition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoCheckpoint {
    #[serde(default)]
    pub completed: Vec<u32>,
    #[serde(default)]
    pub failed: Vec<u32>,
    #[serde(default)]
    pub pending_tasks: BTreeMap<u32, String>,
}

impl VideoCheckpoint {
    /// Load leniently; a corrupt file starts the phase from zero rather
    /// than blocking it.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
        {
            Some(checkpoint) => checkpoint,
            None => {
                warn!("Unreadable video checkpoint, starting fresh");
                Self::default()
            }
        }
    }

    fn save(&self, path: &Path) -> PipelineResult<()> {
        write_json_atomic(path, self)?;
        Ok(())
    }

    fn begin(&mut self, index: u32, task_id: String) {
        self.pending_tasks.insert(index, task_id);
    }

    fn mark_completed(&mut self, index: u32) {
        self.pending_tasks.remove(&index);
        self.failed.retain(|i| *i != index);
        if !self.completed.contains(&index) {
            self.completed.push(index);
            self.completed.sort_unstable();
        }
    }

    fn mark_failed(&mut self, index: u32) {
        self.pending_tasks.remove(&index);
        if !self.failed.contains(&index) {
            self.failed.push(index);
            self.failed.sort_unstable();
        }
    }

    /// Take every pending task. Used on resume: the ids are recorded as
    /// abandoned and the items go back into the work set.
    fn drain_pending(&mut self) -> Vec<(u32, String)> {
        std::mem::take(&mut self.pending_tasks).into_iter().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoItemStatus {
    SubmitFailed,
    GenerationFailed,
    DownloadFailed,
    Success,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoItemLog {
    pub index: u32,
    pub status: VideoItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Run summary, written on every exit path including fatal aborts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRunLog {
    pub project: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_pairs: u32,
    pub already_done: u32,
    pub completed: u32,
    pub failed: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub abandoned_task_ids: Vec<String>,
    pub items: Vec<VideoItemLog>,
}

pub async fn run(
    ctx: &RunContext,
    layout: &ProjectLayout,
    video: &VideoGatewayClient,
) -> PipelineResult<PhaseOutcome> {
    let motion_path = layout.motion_prompts_path();
    if !motion_path.exists() {
        return Err(PipelineError::missing_artifact(format!(
            "motion directives not found at {}",
            motion_path.display()
        )));
    }
    let directives: Vec<String> = std::fs::read_to_string(&motion_path)?
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    let images = ctx.checkpoints().resolve_images(layout).await;
    if directives.len() != images.len() {
        warn!(
            "Motion directives ({}) and images ({}) disagree, pairing the first {}",
            directives.len(),
            images.len(),
            directives.len().min(images.len())
        );
    }
    let pair_count = directives.len().min(images.len()) as u32;
    if pair_count == 0 {
        return Err(PipelineError::missing_artifact(
            "no motion/image pairs to generate videos from",
        ));
    }

    let checkpoint_path = layout.video_checkpoint_path();
    let mut checkpoint = VideoCheckpoint::load(&checkpoint_path);
    let already_done = checkpoint.completed.len() as u32;

    let abandoned: Vec<(u32, String)> = checkpoint.drain_pending();
    if !abandoned.is_empty() {
        warn!(
            "Abandoning {} task(s) left pending by a previous run; items are resubmitted as new work",
            abandoned.len()
        );
    }
    let abandoned_task_ids: Vec<String> = abandoned.into_iter().map(|(_, id)| id).collect();
    // Previously failed items get another try on re-run.
    checkpoint.failed.clear();

    let work: Vec<u32> = (1..=pair_count)
        .filter(|i| !checkpoint.completed.contains(i))
        .collect();
    if work.is_empty() {
        info!("All {} videos already present, skipping", pair_count);
        if checkpoint.pending_tasks.is_empty() {
            remove_checkpoint(&checkpoint_path);
        }
        return Ok(PhaseOutcome::Skipped);
    }
    checkpoint.save(&checkpoint_path)?;

    let work = apply_item_limit(work, ctx.config().test_item_limit);
    ctx.set_phase("videos", work.len() as u32);
    layout.ensure_dirs().await?;
    info!(
        "Generating {} videos for {} ({} of {} already done)",
        work.len(),
        layout.project(),
        already_done,
        pair_count
    );

    let started_at = Utc::now();
    let mut items: Vec<VideoItemLog> = Vec::new();
    let mut completed_now = 0u32;
    let mut failed_now = 0u32;
    let mut fatal: Option<PipelineError> = None;

    for index in work {
        let item_started = Utc::now();
        let directive = directives[(index - 1) as usize].clone();

        match run_item(
            ctx,
            layout,
            video,
            index,
            &directive,
            &mut checkpoint,
            &checkpoint_path,
        )
        .await
        {
            Ok((status, task_id, detail)) => {
                if status == VideoItemStatus::Success {
                    completed_now += 1;
                } else {
                    failed_now += 1;
                }
                items.push(VideoItemLog {
                    index,
                    status,
                    task_id,
                    detail,
                    started_at: item_started,
                    ended_at: Utc::now(),
                });
            }
            Err(e) => {
                items.push(VideoItemLog {
                    index,
                    status: VideoItemStatus::SubmitFailed,
                    task_id: None,
                    detail: Some(e.to_string()),
                    started_at: item_started,
                    ended_at: Utc::now(),
                });
                fatal = Some(e);
                break;
            }
        }

        ctx.item_done();
        tokio::time::sleep(ctx.config().pacing_delay).await;
    }

    let log = VideoRunLog {
        project: layout.project().to_string(),
        started_at,
        finished_at: Utc::now(),
        total_pairs: pair_count,
        already_done,
        completed: completed_now,
        failed: failed_now,
        abandoned_task_ids,
        items,
    };
    write_json_atomic(&layout.video_log_path(), &log)?;
    info!(
        "Video phase done: {} generated, {} failed (summary at {})",
        completed_now,
        failed_now,
        layout.video_log_path().display()
    );

    if let Some(e) = fatal {
        return Err(e);
    }

    if checkpoint.pending_tasks.is_empty() && checkpoint.completed.len() as u32 >= pair_count {
        remove_checkpoint(&checkpoint_path);
    }

    if failed_now > 0 {
        return Ok(PhaseOutcome::failed(format!(
            "{} of {} videos failed",
            failed_now, pair_count
        )));
    }
    Ok(PhaseOutcome::Completed)
}

/// One submit / poll / download round. `Err` is reserved for fatal
/// account-level trouble; every per-item failure comes back as a status.
async fn run_item(
    ctx: &RunContext,
    layout: &ProjectLayout,
    video: &VideoGatewayClient,
    index: u32,
    directive: &str,
    checkpoint: &mut VideoCheckpoint,
    checkpoint_path: &Path,
) -> PipelineResult<(VideoItemStatus, Option<String>, Option<String>)> {
    let image_path = layout.image_path(index);
    let frame = match tokio::fs::read(&image_path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            checkpoint.mark_failed(index);
            checkpoint.save(checkpoint_path)?;
            return Ok((
                VideoItemStatus::SubmitFailed,
                None,
                Some(format!("cannot read {}: {}", image_path.display(), e)),
            ));
        }
    };

    let task_id = match video.submit(directive, &frame).await {
        Ok(id) => id,
        Err(e) if e.is_fatal() => return Err(e.into()),
        Err(e) => {
            checkpoint.mark_failed(index);
            checkpoint.save(checkpoint_path)?;
            return Ok((VideoItemStatus::SubmitFailed, None, Some(e.to_string())));
        }
    };
    checkpoint.begin(index, task_id.clone());
    checkpoint.save(checkpoint_path)?;
    info!("Scene {} video task {} submitted", index, task_id);

    let deadline = Instant::now() + ctx.config().video_max_wait;
    let file_id = loop {
        if Instant::now() >= deadline {
            checkpoint.mark_failed(index);
            checkpoint.save(checkpoint_path)?;
            return Ok((
                VideoItemStatus::GenerationFailed,
                Some(task_id),
                Some("timed out waiting for the task".to_string()),
            ));
        }
        tokio::time::sleep(ctx.config().video_poll_interval).await;

        match video.task_status(&task_id).await {
            Ok(task) => match task.state {
                VideoTaskState::Success => match task.file_id {
                    Some(id) => break id,
                    None => {
                        checkpoint.mark_failed(index);
                        checkpoint.save(checkpoint_path)?;
                        return Ok((
                            VideoItemStatus::DownloadFailed,
                            Some(task_id),
                            Some("task succeeded without a file id".to_string()),
                        ));
                    }
                },
                VideoTaskState::Fail => {
                    checkpoint.mark_failed(index);
                    checkpoint.save(checkpoint_path)?;
                    return Ok((
                        VideoItemStatus::GenerationFailed,
                        Some(task_id),
                        Some("provider reported failure".to_string()),
                    ));
                }
                state => debug!("Task {} still {}", task_id, state),
            },
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => warn!("Task {} status check failed: {}", task_id, e),
        }
    };

    let url = match video.download_url(&file_id).await {
        Ok(url) => url,
        Err(e) if e.is_fatal() => return Err(e.into()),
        Err(e) => {
            checkpoint.mark_failed(index);
            checkpoint.save(checkpoint_path)?;
            return Ok((
                VideoItemStatus::DownloadFailed,
                Some(task_id),
                Some(e.to_string()),
            ));
        }
    };
    let bytes = match video.download(&url).await {
        Ok(bytes) => bytes,
        Err(e) if e.is_fatal() => return Err(e.into()),
        Err(e) => {
            checkpoint.mark_failed(index);
            checkpoint.save(checkpoint_path)?;
            return Ok((
                VideoItemStatus::DownloadFailed,
                Some(task_id),
                Some(e.to_string()),
            ));
        }
    };

    write_atomic(&layout.video_path(index), &bytes)?;
    checkpoint.mark_completed(index);
    checkpoint.save(checkpoint_path)?;
    ctx.record_cost(|c| c.record_videos(1));

    if let Some(sync) = ctx.sync() {
        if let Err(e) = sync
            .upload_file(&layout.video_path(index), &layout.remote_video_key(index))
            .await
        {
            warn!("Could not mirror video {}: {}", index, e);
        }
    }

    info!("Scene {} video written", index);
    Ok((VideoItemStatus::Success, Some(task_id), None))
}

fn remove_checkpoint(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => info!("Video checkpoint removed, phase fully complete"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove video checkpoint: {}", e),
    }
}
