//! Gateway adapters implementing [`JobSource`] for each job kind.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use sreel_models::{BatchId, BatchProgress, BatchState, JobDescriptor, JobKind};
use sreel_providers::types::{ImageBatchItem, ImageBatchStatus, TextBatchItem, TextBatchStatus};
use sreel_providers::{decode_b64, ImageGatewayClient, TextGatewayClient};

use crate::error::{BatchError, BatchResult};
use crate::source::{
    BatchRequest, BatchSnapshot, ItemOutcome, JobSource, RequestPayload, ResultRecord,
    SubmittedBatch,
};

/// Map a text-gateway status into the shared state machine.
///
/// The text gateway only distinguishes `in_progress`, `canceling`, and
/// `ended`; the terminal flavor comes from the request counts. An ended
/// batch with item-level errors still maps to `completed` so retrieval can
/// land the successes and count the rest.
pub fn map_text_status(status: &TextBatchStatus) -> BatchSnapshot {
    let counts = status.request_counts;
    let total =
        counts.processing + counts.succeeded + counts.errored + counts.canceled + counts.expired;

    let state = match status.processing_status.as_str() {
        "in_progress" => BatchState::InProgress,
        "canceling" => BatchState::Cancelled,
        "ended" => {
            if counts.expired > 0 {
                BatchState::Expired
            } else if counts.canceled > 0 && counts.succeeded == 0 {
                BatchState::Cancelled
            } else {
                BatchState::Completed
            }
        }
        other => {
            warn!("Unknown text batch status '{}', treating as in progress", other);
            BatchState::InProgress
        }
    };

    BatchSnapshot {
        state,
        progress: Some(BatchProgress {
            completed: counts.succeeded,
            failed: counts.errored,
            total,
        }),
        output_file_id: None,
    }
}

/// Map an image-gateway status into the shared state machine.
pub fn map_image_status(status: &ImageBatchStatus) -> BatchSnapshot {
    let state = match status.status.as_str() {
        "validating" => BatchState::Validating,
        "in_progress" => BatchState::InProgress,
        "finalizing" => BatchState::Finalizing,
        "completed" => BatchState::Completed,
        "failed" => BatchState::Failed,
        "expired" => BatchState::Expired,
        "cancelled" => BatchState::Cancelled,
        other => {
            warn!("Unknown image batch status '{}', treating as in progress", other);
            BatchState::InProgress
        }
    };

    BatchSnapshot {
        state,
        progress: Some(BatchProgress {
            completed: status.request_counts.completed,
            failed: status.request_counts.failed,
            total: status.request_counts.total,
        }),
        output_file_id: status.output_file_id.clone(),
    }
}

/// Prompt batches on the text gateway.
pub struct TextBatchSource {
    client: Arc<TextGatewayClient>,
}

impl TextBatchSource {
    pub fn new(client: Arc<TextGatewayClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl JobSource for TextBatchSource {
    fn kind(&self) -> JobKind {
        JobKind::PromptBatch
    }

    async fn submit(&self, requests: Vec<BatchRequest>) -> BatchResult<SubmittedBatch> {
        let mut items = Vec::with_capacity(requests.len());
        for request in requests {
            match request.payload {
                RequestPayload::Completion(params) => items.push(TextBatchItem {
                    custom_id: request.custom_id,
                    params,
                }),
                RequestPayload::Image(_) => {
                    return Err(BatchError::payload_mismatch(self.kind().as_str()))
                }
            }
        }

        let status = self.client.create_batch(items).await?;
        let snapshot = map_text_status(&status);
        Ok(SubmittedBatch {
            id: BatchId::from_string(status.id),
            state: snapshot.state,
            input_file_id: None,
        })
    }

    async fn status(&self, id: &BatchId) -> BatchResult<BatchSnapshot> {
        let status = self.client.batch_status(id.as_str()).await?;
        Ok(map_text_status(&status))
    }

    async fn results(&self, descriptor: &JobDescriptor) -> BatchResult<Vec<ResultRecord>> {
        let lines = self.client.batch_results(descriptor.id.as_str()).await?;
        let records = lines
            .into_iter()
            .map(|line| {
                let outcome = if line.is_succeeded() {
                    match line.result.output {
                        Some(output) => ItemOutcome::Text(output),
                        None => ItemOutcome::Failed("succeeded item carried no output".to_string()),
                    }
                } else {
                    let message = line
                        .result
                        .error
                        .as_ref()
                        .map(|e| e.describe())
                        .unwrap_or_else(|| "errored without detail".to_string());
                    ItemOutcome::Failed(message)
                };
                ResultRecord {
                    custom_id: line.custom_id,
                    outcome,
                }
            })
            .collect();
        Ok(records)
    }
}

/// Image batches on the image gateway (file-upload shape).
pub struct ImageBatchSource {
    client: Arc<ImageGatewayClient>,
}

impl ImageBatchSource {
    pub fn new(client: Arc<ImageGatewayClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl JobSource for ImageBatchSource {
    fn kind(&self) -> JobKind {
        JobKind::ImageBatch
    }

    async fn submit(&self, requests: Vec<BatchRequest>) -> BatchResult<SubmittedBatch> {
        let mut items = Vec::with_capacity(requests.len());
        for request in requests {
            match request.payload {
                RequestPayload::Image(body) => items.push(ImageBatchItem {
                    custom_id: request.custom_id,
                    body,
                }),
                RequestPayload::Completion(_) => {
                    return Err(BatchError::payload_mismatch(self.kind().as_str()))
                }
            }
        }

        let input_file_id = self.client.upload_batch_input(&items).await?;
        let status = self.client.create_batch(&input_file_id).await?;
        let snapshot = map_image_status(&status);
        Ok(SubmittedBatch {
            id: BatchId::from_string(status.id),
            state: snapshot.state,
            input_file_id: Some(input_file_id),
        })
    }

    async fn status(&self, id: &BatchId) -> BatchResult<BatchSnapshot> {
        let status = self.client.batch_status(id.as_str()).await?;
        Ok(map_image_status(&status))
    }

    async fn results(&self, descriptor: &JobDescriptor) -> BatchResult<Vec<ResultRecord>> {
        let output_file_id = descriptor
            .output_file_id
            .as_deref()
            .ok_or_else(|| BatchError::missing_output_ref(descriptor.id.to_string()))?;

        let lines = self.client.batch_output(output_file_id).await?;
        let records = lines
            .into_iter()
            .map(|line| {
                let outcome = match line.b64_payload() {
                    Some(payload) => match decode_b64(payload) {
                        Ok(bytes) => ItemOutcome::Binary(bytes),
                        Err(e) => ItemOutcome::Failed(format!("payload did not decode: {e}")),
                    },
                    None => {
                        let message = line
                            .error
                            .as_ref()
                            .map(|e| e.describe())
                            .unwrap_or_else(|| "no image payload".to_string());
                        ItemOutcome::Failed(message)
                    }
                };
                ResultRecord {
                    custom_id: line.custom_id,
                    outcome,
                }
            })
            .collect();
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use sreel_providers::types::{ImageRequestCounts, TextRequestCounts};

    use super::*;

    fn text_status(processing_status: &str, counts: TextRequestCounts) -> TextBatchStatus {
        TextBatchStatus {
            id: "tb_1".to_string(),
            processing_status: processing_status.to_string(),
            request_counts: counts,
        }
    }

    #[test]
    fn test_text_ended_with_errors_still_completes() {
        let snapshot = map_text_status(&text_status(
            "ended",
            TextRequestCounts {
                processing: 0,
                succeeded: 8,
                errored: 2,
                canceled: 0,
                expired: 0,
            },
        ));
        assert_eq!(snapshot.state, BatchState::Completed);
        let progress = snapshot.progress.expect("progress");
        assert_eq!(progress.completed, 8);
        assert_eq!(progress.failed, 2);
        assert_eq!(progress.total, 10);
    }

    #[test]
    fn test_text_expired_counts_win() {
        let snapshot = map_text_status(&text_status(
            "ended",
            TextRequestCounts {
                processing: 0,
                succeeded: 4,
                errored: 0,
                canceled: 0,
                expired: 6,
            },
        ));
        assert_eq!(snapshot.state, BatchState::Expired);
    }

    #[test]
    fn test_text_canceling_maps_to_cancelled() {
        let snapshot = map_text_status(&text_status("canceling", TextRequestCounts::default()));
        assert_eq!(snapshot.state, BatchState::Cancelled);
    }

    #[test]
    fn test_image_status_mapping() {
        let status = ImageBatchStatus {
            id: "ib_1".to_string(),
            status: "completed".to_string(),
            output_file_id: Some("file_out".to_string()),
            request_counts: ImageRequestCounts {
                total: 10,
                completed: 9,
                failed: 1,
            },
        };
        let snapshot = map_image_status(&status);
        assert_eq!(snapshot.state, BatchState::Completed);
        assert_eq!(snapshot.output_file_id.as_deref(), Some("file_out"));

        let unknown = ImageBatchStatus {
            status: "paused".to_string(),
            ..status
        };
        assert_eq!(map_image_status(&unknown).state, BatchState::InProgress);
    }
}
