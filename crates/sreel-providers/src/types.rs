//! Request and response types for the gateway wire formats.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use sreel_models::TokenUsage;

// ---------------------------------------------------------------------------
// Shared
// ---------------------------------------------------------------------------

/// Error envelope used by all gateways on non-success responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayErrorBody {
    pub error: Option<GatewayErrorDetail>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayErrorDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl GatewayErrorDetail {
    /// Best-effort human-readable form for logs and failure records.
    pub fn describe(&self) -> String {
        match (&self.code, &self.message) {
            (Some(code), Some(msg)) => format!("{code}: {msg}"),
            (Some(code), None) => code.clone(),
            (None, Some(msg)) => msg.clone(),
            (None, None) => "unspecified error".to_string(),
        }
    }
}

/// Parse a JSONL body, skipping lines that do not decode.
///
/// Batch result files occasionally carry truncated or blank lines; a bad
/// line costs one item, never the whole retrieval.
pub fn parse_jsonl<T: DeserializeOwned>(text: &str) -> Vec<T> {
    let mut records = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!("Skipping malformed result line {}: {}", lineno + 1, e),
        }
    }
    records
}

// ---------------------------------------------------------------------------
// Text gateway
// ---------------------------------------------------------------------------

/// Parameters for one completion, standalone or inside a batch item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionParams {
    pub model: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub input: String,
}

/// Synchronous completion response.
#[derive(Debug, Clone, Deserialize)]
pub struct Completion {
    pub output: String,
    /// Token accounting; zeroed when the gateway omits it.
    #[serde(default)]
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBatchItem {
    pub custom_id: String,
    pub params: CompletionParams,
}

#[derive(Debug, Serialize)]
pub(crate) struct TextBatchCreateRequest {
    pub requests: Vec<TextBatchItem>,
}

/// Batch creation and status responses share this shape.
#[derive(Debug, Clone, Deserialize)]
pub struct TextBatchStatus {
    pub id: String,
    /// `in_progress`, `canceling`, or `ended`.
    pub processing_status: String,
    #[serde(default)]
    pub request_counts: TextRequestCounts,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TextRequestCounts {
    #[serde(default)]
    pub processing: u32,
    #[serde(default)]
    pub succeeded: u32,
    #[serde(default)]
    pub errored: u32,
    #[serde(default)]
    pub canceled: u32,
    #[serde(default)]
    pub expired: u32,
}

/// One line of a text batch results file.
#[derive(Debug, Clone, Deserialize)]
pub struct TextResultLine {
    pub custom_id: String,
    pub result: TextResult,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextResult {
    /// `succeeded` or `errored`.
    #[serde(rename = "type")]
    pub kind: String,
    pub output: Option<String>,
    pub error: Option<GatewayErrorDetail>,
}

impl TextResultLine {
    pub fn is_succeeded(&self) -> bool {
        self.result.kind == "succeeded"
    }
}

// ---------------------------------------------------------------------------
// Image gateway
// ---------------------------------------------------------------------------

/// Per-request body, also embedded in uploaded batch lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRequestBody {
    pub model: String,
    pub prompt: String,
    pub size: String,
    pub quality: String,
    pub output_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageBatchItem {
    pub custom_id: String,
    pub body: ImageRequestBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileUploadResponse {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ImageBatchCreateRequest {
    pub input_file_id: String,
    pub completion_window: String,
}

/// Batch creation and status responses share this shape.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageBatchStatus {
    pub id: String,
    /// `validating`, `in_progress`, `finalizing`, `completed`, `failed`,
    /// `expired`, or `cancelled`.
    pub status: String,
    pub output_file_id: Option<String>,
    #[serde(default)]
    pub request_counts: ImageRequestCounts,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ImageRequestCounts {
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub completed: u32,
    #[serde(default)]
    pub failed: u32,
}

/// One line of an image batch output file.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageResultLine {
    pub custom_id: String,
    pub response: Option<ImageItemResponse>,
    pub error: Option<GatewayErrorDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageItemResponse {
    pub status_code: u16,
    pub body: Option<ImagePayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImagePayload {
    #[serde(default)]
    pub data: Vec<ImageDatum>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageDatum {
    pub b64_json: String,
}

impl ImageResultLine {
    /// Base64 payload of the first rendered image, if the item succeeded.
    pub fn b64_payload(&self) -> Option<&str> {
        let response = self.response.as_ref()?;
        if !(200..300).contains(&response.status_code) {
            return None;
        }
        response
            .body
            .as_ref()?
            .data
            .first()
            .map(|d| d.b64_json.as_str())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ImageGenerateRequest {
    pub model: String,
    pub prompt: String,
    pub size: String,
    pub quality: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ImageGenerateResponse {
    #[serde(default)]
    pub data: Vec<ImageDatum>,
}

// ---------------------------------------------------------------------------
// Video gateway
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(crate) struct VideoSubmitRequest {
    pub model: String,
    pub prompt: String,
    /// Data URL (`data:image/png;base64,...`) of the first frame.
    pub first_frame_image: String,
    pub duration: u32,
    pub resolution: String,
}

/// Status envelope the video gateway attaches to every response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BaseResp {
    #[serde(default)]
    pub status_code: i64,
    #[serde(default)]
    pub status_msg: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VideoSubmitResponse {
    pub task_id: Option<String>,
    #[serde(default)]
    pub base_resp: BaseResp,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VideoStatusResponse {
    pub status: String,
    pub file_id: Option<String>,
    #[serde(default)]
    pub base_resp: BaseResp,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VideoFileResponse {
    pub file: VideoFileInfo,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VideoFileInfo {
    pub download_url: String,
}

/// Lifecycle states reported for a video task.
///
/// The gateway has grown states over time, so anything unrecognized is kept
/// verbatim in `Other` and treated as still-running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoTaskState {
    Preparing,
    Queueing,
    Waiting,
    Processing,
    Success,
    Fail,
    Other(String),
}

impl VideoTaskState {
    pub fn from_label(label: &str) -> Self {
        match label {
            "Preparing" => Self::Preparing,
            "Queueing" => Self::Queueing,
            "Waiting" => Self::Waiting,
            "Processing" => Self::Processing,
            "Success" => Self::Success,
            "Fail" => Self::Fail,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Fail)
    }
}

impl std::fmt::Display for VideoTaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Preparing => write!(f, "Preparing"),
            Self::Queueing => write!(f, "Queueing"),
            Self::Waiting => write!(f, "Waiting"),
            Self::Processing => write!(f, "Processing"),
            Self::Success => write!(f, "Success"),
            Self::Fail => write!(f, "Fail"),
            Self::Other(label) => write!(f, "{label}"),
        }
    }
}

/// Polled view of a video task.
#[derive(Debug, Clone)]
pub struct VideoTask {
    pub state: VideoTaskState,
    pub file_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_jsonl_skips_malformed_lines() {
        let text = concat!(
            r#"{"custom_id": "prompt_001", "result": {"type": "succeeded", "output": "ok"}}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"custom_id": "prompt_002", "result": {"type": "errored", "error": {"message": "boom"}}}"#,
        );
        let lines: Vec<TextResultLine> = parse_jsonl(text);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].is_succeeded());
        assert!(!lines[1].is_succeeded());
    }

    #[test]
    fn test_image_result_b64_payload() {
        let ok: ImageResultLine = serde_json::from_str(
            r#"{"custom_id": "image_003", "response": {"status_code": 200, "body": {"data": [{"b64_json": "aGk="}]}}}"#,
        )
        .expect("decode");
        assert_eq!(ok.b64_payload(), Some("aGk="));

        let failed: ImageResultLine = serde_json::from_str(
            r#"{"custom_id": "image_004", "response": {"status_code": 400, "body": null}, "error": {"message": "bad"}}"#,
        )
        .expect("decode");
        assert_eq!(failed.b64_payload(), None);
    }

    #[test]
    fn test_video_state_round_trip() {
        assert_eq!(VideoTaskState::from_label("Success"), VideoTaskState::Success);
        assert!(VideoTaskState::from_label("Fail").is_terminal());
        assert!(!VideoTaskState::from_label("Processing").is_terminal());

        let odd = VideoTaskState::from_label("Rendering");
        assert_eq!(odd, VideoTaskState::Other("Rendering".to_string()));
        assert!(!odd.is_terminal());
        assert_eq!(odd.to_string(), "Rendering");
    }

    #[test]
    fn test_completion_params_omit_empty_system() {
        let params = CompletionParams {
            model: "scribe-2".to_string(),
            max_tokens: 1024,
            system: None,
            input: "hello".to_string(),
        };
        let json = serde_json::to_string(&params).expect("serialize");
        assert!(!json.contains("system"));
    }
}
