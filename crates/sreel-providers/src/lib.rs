//! HTTP clients for the three generation gateways.
//!
//! Each gateway speaks bearer-authenticated JSON: the text gateway handles
//! completions and prompt batches, the image gateway handles file-upload
//! batches and synchronous renders, and the video gateway handles per-clip
//! task submission and polling. All three share the same error taxonomy
//! ([`ProviderError`]) so callers can decide uniformly what is worth
//! retrying, what is a moderation rejection, and what should stop a run.

pub mod error;
pub mod image;
pub mod retry;
pub mod text;
pub mod types;
pub mod video;

pub use error::{ProviderError, ProviderResult};
pub use image::{decode_b64, ImageGatewayClient, ImageGatewayConfig};
pub use retry::RetryPolicy;
pub use text::{TextGatewayClient, TextGatewayConfig};
pub use types::{
    parse_jsonl, BaseResp, Completion, CompletionParams, GatewayErrorDetail, ImageBatchItem,
    ImageBatchStatus, ImageRequestBody, ImageRequestCounts, ImageResultLine, TextBatchItem,
    TextBatchStatus, TextRequestCounts, TextResultLine, VideoTask, VideoTaskState,
};
pub use video::{VideoGatewayClient, VideoGatewayConfig};
