//! Result retrieval: land batch outputs as local artifacts.

use std::sync::Arc;

use tracing::{info, warn};

use sreel_models::{BatchState, JobDescriptor, JobKind, SCENE_PROMPTS_FILE, SceneRecord};
use sreel_storage::{ArchiveSync, ProjectLayout};

use crate::error::{BatchError, BatchResult};
use crate::persist;
use crate::source::{ItemOutcome, JobSource, ResultRecord};

/// Counts from one retrieval pass.
#[derive(Debug, Clone, Default)]
pub struct RetrieveReport {
    pub success_count: u32,
    pub failed_count: u32,
    /// Correlation ids of items that produced nothing usable.
    pub failed_ids: Vec<String>,
}

/// Fetches completed batch results and writes them into the project layout.
///
/// Retrieval is idempotent: artifacts are overwritten in place, and a crash
/// halfway through is repaired by simply running it again. Successfully
/// written artifacts are mirrored to the archive on a best-effort basis;
/// the local copy is authoritative either way.
pub struct Retriever {
    source: Arc<dyn JobSource>,
    sync: Option<ArchiveSync>,
}

impl Retriever {
    pub fn new(source: Arc<dyn JobSource>, sync: Option<ArchiveSync>) -> Self {
        Self { source, sync }
    }

    pub async fn retrieve(
        &self,
        layout: &ProjectLayout,
        descriptor: &mut JobDescriptor,
    ) -> BatchResult<RetrieveReport> {
        match descriptor.state {
            BatchState::Completed
            | BatchState::Retrieved
            | BatchState::PostFlowStarted
            | BatchState::PostFlowFailed => {}
            other => {
                return Err(BatchError::not_ready(
                    descriptor.id.to_string(),
                    other.to_string(),
                ))
            }
        }
        if descriptor.kind.requires_output_ref() && descriptor.output_file_id.is_none() {
            return Err(BatchError::missing_output_ref(descriptor.id.to_string()));
        }

        let records = self.source.results(descriptor).await?;
        info!(
            "Retrieving {} results for batch {} ({})",
            records.len(),
            descriptor.id,
            descriptor.kind
        );

        let report = match descriptor.kind {
            JobKind::ImageBatch => self.land_images(layout, records).await?,
            JobKind::PromptBatch => self.land_prompts(layout, records).await?,
        };

        descriptor.retrieved(report.success_count, report.failed_count);
        persist::save_descriptor(layout, descriptor)?;
        info!(
            "Batch {} retrieved: {} ok, {} failed",
            descriptor.id, report.success_count, report.failed_count
        );
        Ok(report)
    }

    async fn land_images(
        &self,
        layout: &ProjectLayout,
        records: Vec<ResultRecord>,
    ) -> BatchResult<RetrieveReport> {
        layout.ensure_dirs().await?;
        let kind = JobKind::ImageBatch;
        let mut report = RetrieveReport::default();

        for record in records {
            let index = match kind.parse_correlation_id(&record.custom_id) {
                Ok(index) => index,
                Err(_) => {
                    warn!("Unroutable result id '{}', skipping", record.custom_id);
                    report.failed_count += 1;
                    report.failed_ids.push(record.custom_id);
                    continue;
                }
            };
            match record.outcome {
                ItemOutcome::Binary(bytes) => {
                    let path = layout.image_path(index);
                    persist::write_atomic(&path, &bytes)?;
                    if let Some(sync) = &self.sync {
                        if let Err(e) = sync
                            .upload_file(&path, &layout.remote_image_key(index))
                            .await
                        {
                            warn!("Mirror upload of image {:03} failed: {}", index, e);
                        }
                    }
                    report.success_count += 1;
                }
                ItemOutcome::Text(_) => {
                    warn!("Image item {} returned text, skipping", record.custom_id);
                    report.failed_count += 1;
                    report.failed_ids.push(record.custom_id);
                }
                ItemOutcome::Failed(message) => {
                    warn!("Image item {} failed: {}", record.custom_id, message);
                    report.failed_count += 1;
                    report.failed_ids.push(record.custom_id);
                }
            }
        }
        Ok(report)
    }

    async fn land_prompts(
        &self,
        layout: &ProjectLayout,
        records: Vec<ResultRecord>,
    ) -> BatchResult<RetrieveReport> {
        layout.ensure_dirs().await?;
        let kind = JobKind::PromptBatch;
        let mut report = RetrieveReport::default();

        // Merge into whatever the checkpoint already holds so a re-run after
        // a partial batch keeps earlier scenes.
        let path = layout.scene_prompts_path();
        let mut merged = match std::fs::read_to_string(&path) {
            Ok(text) => SceneRecord::parse_document(&text).0,
            Err(_) => Default::default(),
        };

        for record in records {
            let index = match kind.parse_correlation_id(&record.custom_id) {
                Ok(index) => index,
                Err(_) => {
                    warn!("Unroutable result id '{}', skipping", record.custom_id);
                    report.failed_count += 1;
                    report.failed_ids.push(record.custom_id);
                    continue;
                }
            };
            match record.outcome {
                ItemOutcome::Text(output) => {
                    merged.insert(index, parse_prompt_output(index, &output));
                    report.success_count += 1;
                }
                ItemOutcome::Binary(_) => {
                    warn!("Prompt item {} returned binary, skipping", record.custom_id);
                    report.failed_count += 1;
                    report.failed_ids.push(record.custom_id);
                }
                ItemOutcome::Failed(message) => {
                    warn!("Prompt item {} failed: {}", record.custom_id, message);
                    report.failed_count += 1;
                    report.failed_ids.push(record.custom_id);
                }
            }
        }

        let mut content = String::new();
        for record in merged.values() {
            content.push_str(&record.to_line().map_err(BatchError::Serialization)?);
            content.push('\n');
        }
        persist::write_atomic(&path, content.as_bytes())?;

        if let Some(sync) = &self.sync {
            if let Err(e) = sync
                .upload_file(&path, &layout.remote_key(SCENE_PROMPTS_FILE))
                .await
            {
                warn!("Mirror upload of scene prompts failed: {}", e);
            }
        }
        Ok(report)
    }
}

/// Turn one prompt-batch output into a scene record.
///
/// Models usually return the requested JSON object, sometimes wrapped in
/// code fences or prose. Anything that does not yield an `image_prompt`
/// field falls back to treating the whole output as the prompt.
pub fn parse_prompt_output(index: u32, raw: &str) -> SceneRecord {
    if let Some(json) = extract_json_object(raw) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(json) {
            if let Some(prompt) = value.get("image_prompt").and_then(|p| p.as_str()) {
                let mut record = SceneRecord::new(index, prompt);
                if let Some(summary) = value.get("visual_summary").and_then(|s| s.as_str()) {
                    record = record.with_summary(summary);
                }
                if value.get("is_finale").and_then(|f| f.as_bool()) == Some(true) {
                    record = record.finale();
                }
                return record;
            }
        }
    }
    SceneRecord::new(index, raw.trim())
}

/// Widest `{...}` span in the text, which also strips code fences.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end > start {
        Some(&raw[start..=end])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prompt_output_plain_json() {
        let raw = r#"{"image_prompt": "a quiet harbor", "visual_summary": "boats at dusk"}"#;
        let record = parse_prompt_output(3, raw);
        assert_eq!(record.index, 3);
        assert_eq!(record.image_prompt, "a quiet harbor");
        assert_eq!(record.visual_summary.as_deref(), Some("boats at dusk"));
    }

    #[test]
    fn test_parse_prompt_output_fenced_json() {
        let raw = "Here you go:\n```json\n{\"image_prompt\": \"a storm\", \"is_finale\": true}\n```";
        let record = parse_prompt_output(9, raw);
        assert_eq!(record.image_prompt, "a storm");
        assert_eq!(record.is_finale, Some(true));
    }

    #[test]
    fn test_parse_prompt_output_falls_back_to_raw() {
        let record = parse_prompt_output(1, "  just a plain prompt  ");
        assert_eq!(record.image_prompt, "just a plain prompt");
        assert!(record.visual_summary.is_none());
    }

    #[test]
    fn test_parse_prompt_output_broken_json_falls_back() {
        let raw = "{not valid json}";
        let record = parse_prompt_output(2, raw);
        assert_eq!(record.image_prompt, "{not valid json}");
    }
}
