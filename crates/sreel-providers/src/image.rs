//! Image gateway client: file-upload batches and synchronous renders.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use tracing::debug;

use sreel_models::RenderTier;

use crate::error::{ProviderError, ProviderResult};
use crate::retry::RetryPolicy;
use crate::types::{
    parse_jsonl, FileUploadResponse, ImageBatchCreateRequest, ImageBatchItem, ImageBatchStatus,
    ImageGenerateRequest, ImageGenerateResponse, ImageRequestBody, ImageResultLine,
};

/// Completion window requested for every image batch.
const COMPLETION_WINDOW: &str = "24h";

/// Configuration for the image gateway client.
#[derive(Debug, Clone)]
pub struct ImageGatewayConfig {
    pub base_url: String,
    pub api_key: String,
    /// Model for premium-tier renders.
    pub premium_model: String,
    /// Model for standard-tier renders.
    pub standard_model: String,
    pub size: String,
    pub quality: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl ImageGatewayConfig {
    /// Create config from environment variables. `IMAGE_GATEWAY_KEY` is
    /// required; everything else has a default.
    pub fn from_env() -> ProviderResult<Self> {
        let api_key = std::env::var("IMAGE_GATEWAY_KEY")
            .map_err(|_| ProviderError::config_error("IMAGE_GATEWAY_KEY must be set"))?;

        Ok(Self {
            base_url: std::env::var("IMAGE_GATEWAY_URL")
                .unwrap_or_else(|_| "http://localhost:8702".to_string()),
            api_key,
            premium_model: std::env::var("IMAGE_MODEL_PREMIUM")
                .unwrap_or_else(|_| "pictor-pro".to_string()),
            standard_model: std::env::var("IMAGE_MODEL_STANDARD")
                .unwrap_or_else(|_| "pictor-lite".to_string()),
            size: std::env::var("IMAGE_SIZE").unwrap_or_else(|_| "1024x1536".to_string()),
            quality: std::env::var("IMAGE_QUALITY").unwrap_or_else(|_| "high".to_string()),
            timeout: Duration::from_secs(
                std::env::var("IMAGE_GATEWAY_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
            retry: RetryPolicy::from_env(),
        })
    }

    pub fn model_for(&self, tier: RenderTier) -> &str {
        match tier {
            RenderTier::Premium => &self.premium_model,
            RenderTier::Standard => &self.standard_model,
        }
    }

    /// Per-item body for an uploaded batch line.
    pub fn batch_body(&self, tier: RenderTier, prompt: &str) -> ImageRequestBody {
        ImageRequestBody {
            model: self.model_for(tier).to_string(),
            prompt: prompt.to_string(),
            size: self.size.clone(),
            quality: self.quality.clone(),
            output_format: "png".to_string(),
        }
    }
}

/// Decode a base64 image payload into raw PNG bytes.
pub fn decode_b64(payload: &str) -> ProviderResult<Vec<u8>> {
    STANDARD
        .decode(payload)
        .map_err(|e| ProviderError::invalid_response(format!("base64 payload did not decode: {e}")))
}

/// Client for the image gateway.
pub struct ImageGatewayClient {
    http: Client,
    config: ImageGatewayConfig,
}

impl ImageGatewayClient {
    pub fn new(config: ImageGatewayConfig) -> ProviderResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ProviderError::Network)?;

        Ok(Self { http, config })
    }

    pub fn from_env() -> ProviderResult<Self> {
        Self::new(ImageGatewayConfig::from_env()?)
    }

    pub fn config(&self) -> &ImageGatewayConfig {
        &self.config
    }

    /// Upload batch items as a JSONL file; returns the file id.
    pub async fn upload_batch_input(&self, items: &[ImageBatchItem]) -> ProviderResult<String> {
        let mut body = String::new();
        for item in items {
            body.push_str(&serde_json::to_string(item)?);
            body.push('\n');
        }
        let url = format!("{}/v1/files", self.config.base_url);

        debug!("Uploading image batch input with {} items", items.len());

        self.config
            .retry
            .run("image batch upload", || async {
                let response = self
                    .http
                    .post(&url)
                    .bearer_auth(&self.config.api_key)
                    .header(reqwest::header::CONTENT_TYPE, "application/jsonl")
                    .body(body.clone())
                    .send()
                    .await
                    .map_err(ProviderError::Network)?;

                if !response.status().is_success() {
                    return Err(ProviderError::from_response(response).await);
                }
                let uploaded: FileUploadResponse = response.json().await?;
                Ok(uploaded.id)
            })
            .await
    }

    /// Create a batch over a previously uploaded input file.
    pub async fn create_batch(&self, input_file_id: &str) -> ProviderResult<ImageBatchStatus> {
        let url = format!("{}/v1/batches", self.config.base_url);
        let body = ImageBatchCreateRequest {
            input_file_id: input_file_id.to_string(),
            completion_window: COMPLETION_WINDOW.to_string(),
        };

        self.config
            .retry
            .run("image batch create", || async {
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
                let status: ImageBatchStatus = response.json().await?;
                Ok(status)
            })
            .await
    }

    pub async fn batch_status(&self, batch_id: &str) -> ProviderResult<ImageBatchStatus> {
        let url = format!("{}/v1/batches/{}", self.config.base_url, batch_id);

        self.config
            .retry
            .run("image batch status", || async {
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
                let status: ImageBatchStatus = response.json().await?;
                Ok(status)
            })
            .await
    }

    /// Download the JSONL output of a completed batch.
    pub async fn batch_output(&self, output_file_id: &str) -> ProviderResult<Vec<ImageResultLine>> {
        let url = format!(
            "{}/v1/files/{}/content",
            self.config.base_url, output_file_id
        );

        let text = self
            .config
            .retry
            .run("image batch output", || async {
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
                let text = response.text().await.map_err(ProviderError::Network)?;
                Ok(text)
            })
            .await?;

        Ok(parse_jsonl(&text))
    }

    /// Render one image synchronously; returns decoded PNG bytes.
    ///
    /// Moderation rejections surface as [`ProviderError::Moderation`] so the
    /// caller can sanitize the prompt and try once more.
    pub async fn generate(&self, tier: RenderTier, prompt: &str) -> ProviderResult<Vec<u8>> {
        let url = format!("{}/v1/images", self.config.base_url);
        let body = ImageGenerateRequest {
            model: self.config.model_for(tier).to_string(),
            prompt: prompt.to_string(),
            size: self.config.size.clone(),
            quality: self.config.quality.clone(),
        };

        let response = self
            .config
            .retry
            .run("image generate", || async {
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
                let decoded: ImageGenerateResponse = response.json().await?;
                Ok(decoded)
            })
            .await?;

        let datum = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::invalid_response("image response carried no data"))?;
        decode_b64(&datum.b64_json)
    }
}
