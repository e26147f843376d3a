//! Checkpoint-aware batch submission.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::info;

use sreel_models::{JobDescriptor, JobKind};
use sreel_storage::{CheckpointStore, ProjectLayout};

use crate::error::{BatchError, BatchResult};
use crate::persist;
use crate::source::{BatchRequest, JobSource, RequestPayload};

/// What a submission attempt decided.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// A batch went out; the descriptor has been persisted.
    Submitted(JobDescriptor),
    /// Every item was already checkpointed; nothing was sent.
    AlreadyComplete { done: usize },
}

/// Submits batches after filtering out items the checkpoint already covers.
pub struct Submitter {
    source: Arc<dyn JobSource>,
    checkpoints: CheckpointStore,
}

impl Submitter {
    pub fn new(source: Arc<dyn JobSource>, checkpoints: CheckpointStore) -> Self {
        Self {
            source,
            checkpoints,
        }
    }

    /// Submit the not-yet-done subset of `items`.
    ///
    /// `items` is the full planned set, keyed by artifact index; the done
    /// set is resolved through the two-tier checkpoint before anything is
    /// sent, so a re-run after a crash or partial retrieval only pays for
    /// the remainder. An empty plan is a caller bug and errors out.
    pub async fn submit(
        &self,
        layout: &ProjectLayout,
        items: Vec<(u32, RequestPayload)>,
    ) -> BatchResult<SubmitOutcome> {
        let kind = self.source.kind();
        if items.is_empty() {
            return Err(BatchError::nothing_to_submit(format!(
                "no {} items planned for {}",
                kind,
                layout.project()
            )));
        }

        let done = self.resolve_done(layout, kind).await;
        let remaining: Vec<(u32, RequestPayload)> = items
            .into_iter()
            .filter(|(index, _)| !done.contains(index))
            .collect();

        if remaining.is_empty() {
            info!(
                "All {} items for {} already done ({} checkpointed), skipping submission",
                kind,
                layout.project(),
                done.len()
            );
            return Ok(SubmitOutcome::AlreadyComplete { done: done.len() });
        }

        info!(
            "Submitting {} batch for {}: {} of full set remaining ({} checkpointed)",
            kind,
            layout.project(),
            remaining.len(),
            done.len()
        );

        let request_count = remaining.len() as u32;
        let requests = remaining
            .into_iter()
            .map(|(index, payload)| BatchRequest {
                custom_id: kind.correlation_id(index),
                payload,
            })
            .collect();

        let submitted = self.source.submit(requests).await?;

        let mut descriptor = JobDescriptor::new(
            submitted.id,
            kind,
            layout.project().clone(),
            request_count,
            layout.root().to_path_buf(),
        )
        .submitted(submitted.state);
        if let Some(file_id) = submitted.input_file_id {
            descriptor = descriptor.with_input_file(file_id);
        }

        persist::save_descriptor(layout, &descriptor)?;
        info!(
            "Batch {} submitted for {} ({} requests, state {})",
            descriptor.id,
            layout.project(),
            descriptor.request_count,
            descriptor.state
        );
        Ok(SubmitOutcome::Submitted(descriptor))
    }

    async fn resolve_done(&self, layout: &ProjectLayout, kind: JobKind) -> BTreeSet<u32> {
        match kind {
            JobKind::PromptBatch => self.checkpoints.resolve_scenes(layout).await,
            JobKind::ImageBatch => self.checkpoints.resolve_images(layout).await,
        }
    }
}
