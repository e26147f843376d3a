//! Video gateway client: per-clip task submission, polling, and download.
//!
//! The gateway wraps outcomes in a `base_resp` envelope instead of HTTP
//! statuses, so a 200 can still carry a failure. Every method checks the
//! envelope before trusting the payload.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};
use crate::retry::RetryPolicy;
use crate::types::{
    BaseResp, VideoFileResponse, VideoStatusResponse, VideoSubmitRequest, VideoSubmitResponse,
    VideoTask, VideoTaskState,
};

/// Configuration for the video gateway client.
#[derive(Debug, Clone)]
pub struct VideoGatewayConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub resolution: String,
    /// Requested clip length in seconds.
    pub duration_secs: u32,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl VideoGatewayConfig {
    /// Create config from environment variables. `VIDEO_GATEWAY_KEY` is
    /// required; everything else has a default.
    pub fn from_env() -> ProviderResult<Self> {
        let api_key = std::env::var("VIDEO_GATEWAY_KEY")
            .map_err(|_| ProviderError::config_error("VIDEO_GATEWAY_KEY must be set"))?;

        Ok(Self {
            base_url: std::env::var("VIDEO_GATEWAY_URL")
                .unwrap_or_else(|_| "http://localhost:8703".to_string()),
            api_key,
            model: std::env::var("VIDEO_MODEL").unwrap_or_else(|_| "kinetic-2-fast".to_string()),
            resolution: std::env::var("VIDEO_RESOLUTION").unwrap_or_else(|_| "768p".to_string()),
            duration_secs: std::env::var("VIDEO_DURATION_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(6),
            timeout: Duration::from_secs(
                std::env::var("VIDEO_GATEWAY_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            retry: RetryPolicy::from_env(),
        })
    }
}

/// Client for the video gateway.
pub struct VideoGatewayClient {
    http: Client,
    config: VideoGatewayConfig,
}

impl VideoGatewayClient {
    pub fn new(config: VideoGatewayConfig) -> ProviderResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ProviderError::Network)?;

        Ok(Self { http, config })
    }

    pub fn from_env() -> ProviderResult<Self> {
        Self::new(VideoGatewayConfig::from_env()?)
    }

    /// Submit a clip task; returns the task id to poll.
    pub async fn submit(&self, prompt: &str, first_frame_png: &[u8]) -> ProviderResult<String> {
        let data_url = format!("data:image/png;base64,{}", STANDARD.encode(first_frame_png));
        let body = VideoSubmitRequest {
            model: self.config.model.clone(),
            prompt: prompt.to_string(),
            first_frame_image: data_url,
            duration: self.config.duration_secs,
            resolution: self.config.resolution.clone(),
        };
        let url = format!("{}/v1/videos", self.config.base_url);

        debug!("Submitting video task ({} bytes first frame)", first_frame_png.len());

        let response = self
            .config
            .retry
            .run("video submit", || async {
                let response = self
                    .http
                    .post(&url)
                    .bearer_auth(&self.config.api_key)
                    .json(&body)
                    .send()
                    .await
                    .map_err(ProviderError::Network)?;

                if !response.status().is_success() {
                    return Err(ProviderError::from_response(response).await);
                }
                let decoded: VideoSubmitResponse = response.json().await?;
                Ok(decoded)
            })
            .await?;

        if response.base_resp.status_code != 0 {
            return Err(base_resp_error(&response.base_resp));
        }
        response
            .task_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ProviderError::invalid_response("submit response carried no task id"))
    }

    /// Poll one task's state.
    pub async fn task_status(&self, task_id: &str) -> ProviderResult<VideoTask> {
        let url = format!("{}/v1/videos/{}", self.config.base_url, task_id);

        let response = self
            .config
            .retry
            .run("video status", || async {
                let response = self
                    .http
                    .get(&url)
                    .bearer_auth(&self.config.api_key)
                    .send()
                    .await
                    .map_err(ProviderError::Network)?;

                if !response.status().is_success() {
                    return Err(ProviderError::from_response(response).await);
                }
                let decoded: VideoStatusResponse = response.json().await?;
                Ok(decoded)
            })
            .await?;

        if response.base_resp.status_code != 0 {
            return Err(base_resp_error(&response.base_resp));
        }
        Ok(VideoTask {
            state: VideoTaskState::from_label(&response.status),
            file_id: response.file_id,
        })
    }

    /// Resolve a finished task's file id into a download URL.
    pub async fn download_url(&self, file_id: &str) -> ProviderResult<String> {
        let url = format!("{}/v1/files/{}/retrieve", self.config.base_url, file_id);

        let response = self
            .config
            .retry
            .run("video file retrieve", || async {
                let response = self
                    .http
                    .get(&url)
                    .bearer_auth(&self.config.api_key)
                    .send()
                    .await
                    .map_err(ProviderError::Network)?;

                if !response.status().is_success() {
                    return Err(ProviderError::from_response(response).await);
                }
                let decoded: VideoFileResponse = response.json().await?;
                Ok(decoded)
            })
            .await?;

        Ok(response.file.download_url)
    }

    /// Fetch the MP4 bytes. The URL is pre-signed, so no auth header.
    pub async fn download(&self, url: &str) -> ProviderResult<Vec<u8>> {
        self.config
            .retry
            .run("video download", || async {
                let response = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .map_err(ProviderError::Network)?;

                if !response.status().is_success() {
                    return Err(ProviderError::from_response(response).await);
                }
                let bytes = response.bytes().await.map_err(ProviderError::Network)?;
                Ok(bytes.to_vec())
            })
            .await
    }
}

/// Map a non-zero envelope into the shared taxonomy so balance and
/// moderation problems are recognized by their message text.
fn base_resp_error(resp: &BaseResp) -> ProviderError {
    ProviderError::classify(
        200,
        Some(resp.status_code.to_string()),
        resp.status_msg.clone(),
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn test_client(server: &MockServer) -> VideoGatewayClient {
        VideoGatewayClient::new(VideoGatewayConfig {
            base_url: server.uri(),
            api_key: "test-key".to_string(),
            model: "kinetic-2-fast".to_string(),
            resolution: "768p".to_string(),
            duration_secs: 6,
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::new(3, Duration::from_millis(1)),
        })
        .expect("client")
    }

    #[tokio::test]
    async fn test_submit_returns_task_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/videos"))
            .and(body_string_contains("data:image/png;base64,"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "task_id": "vt_7",
                "base_resp": {"status_code": 0, "status_msg": "success"}
            })))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let task_id = client.submit("slow pan left", b"png").await.expect("submit");
        assert_eq!(task_id, "vt_7");
    }

    #[tokio::test]
    async fn test_submit_envelope_failure_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/videos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "task_id": "",
                "base_resp": {"status_code": 1008, "status_msg": "insufficient balance"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = client.submit("slow pan left", b"png").await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_task_status_maps_states() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/videos/vt_7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "task_id": "vt_7",
                "status": "Processing",
                "base_resp": {"status_code": 0, "status_msg": ""}
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/videos/vt_7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "task_id": "vt_7",
                "status": "Success",
                "file_id": "vf_9",
                "base_resp": {"status_code": 0, "status_msg": ""}
            })))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let running = client.task_status("vt_7").await.expect("status");
        assert_eq!(running.state, VideoTaskState::Processing);
        assert!(!running.state.is_terminal());

        let done = client.task_status("vt_7").await.expect("status");
        assert_eq!(done.state, VideoTaskState::Success);
        assert_eq!(done.file_id.as_deref(), Some("vf_9"));
    }

    #[tokio::test]
    async fn test_download_url_and_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/files/vf_9/retrieve"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "file": {"download_url": format!("{}/signed/vf_9.mp4", server.uri())}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/signed/vf_9.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp4-bytes".to_vec()))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let url = client.download_url("vf_9").await.expect("url");
        let bytes = client.download(&url).await.expect("download");
        assert_eq!(bytes, b"mp4-bytes");
    }
}
