//! Text gateway client: synchronous completions and prompt batches.

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};
use crate::retry::RetryPolicy;
use crate::types::{
    parse_jsonl, Completion, CompletionParams, TextBatchCreateRequest, TextBatchItem,
    TextBatchStatus, TextResultLine,
};

/// Configuration for the text gateway client.
#[derive(Debug, Clone)]
pub struct TextGatewayConfig {
    /// Base URL of the gateway.
    pub base_url: String,
    /// Bearer key.
    pub api_key: String,
    /// Model used for all completions and batch items.
    pub model: String,
    /// Request timeout.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl TextGatewayConfig {
    /// Create config from environment variables. `TEXT_GATEWAY_KEY` is
    /// required; everything else has a default.
    pub fn from_env() -> ProviderResult<Self> {
        let api_key = std::env::var("TEXT_GATEWAY_KEY")
            .map_err(|_| ProviderError::config_error("TEXT_GATEWAY_KEY must be set"))?;

        Ok(Self {
            base_url: std::env::var("TEXT_GATEWAY_URL")
                .unwrap_or_else(|_| "http://localhost:8701".to_string()),
            api_key,
            model: std::env::var("TEXT_MODEL").unwrap_or_else(|_| "scribe-2".to_string()),
            timeout: Duration::from_secs(
                std::env::var("TEXT_GATEWAY_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
            retry: RetryPolicy::from_env(),
        })
    }
}

/// Client for the text gateway.
pub struct TextGatewayClient {
    http: Client,
    config: TextGatewayConfig,
}

impl TextGatewayClient {
    pub fn new(config: TextGatewayConfig) -> ProviderResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ProviderError::Network)?;

        Ok(Self { http, config })
    }

    pub fn from_env() -> ProviderResult<Self> {
        Self::new(TextGatewayConfig::from_env()?)
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Fill in the configured model; callers supply the rest.
    pub fn params(
        &self,
        system: Option<String>,
        input: String,
        max_tokens: u32,
    ) -> CompletionParams {
        CompletionParams {
            model: self.config.model.clone(),
            max_tokens,
            system,
            input,
        }
    }

    /// Run one synchronous completion.
    pub async fn complete(
        &self,
        system: Option<&str>,
        input: &str,
        max_tokens: u32,
    ) -> ProviderResult<Completion> {
        let url = format!("{}/v1/completions", self.config.base_url);
        let params = self.params(system.map(str::to_string), input.to_string(), max_tokens);

        debug!("Sending completion request to {}", url);

        self.config
            .retry
            .run("completion", || async {
                let response = self
                    .http
                    .post(&url)
                    .bearer_auth(&self.config.api_key)
                    .json(&params)
                    .send()
                    .await
                    .map_err(ProviderError::Network)?;

                if !response.status().is_success() {
                    return Err(ProviderError::from_response(response).await);
                }
                let completion: Completion = response.json().await?;
                Ok(completion)
            })
            .await
    }

    /// Submit a prompt batch. The returned status carries the batch id.
    pub async fn create_batch(
        &self,
        requests: Vec<TextBatchItem>,
    ) -> ProviderResult<TextBatchStatus> {
        let url = format!("{}/v1/batches", self.config.base_url);
        let body = TextBatchCreateRequest { requests };

        debug!("Creating text batch with {} requests", body.requests.len());

        self.config
            .retry
            .run("text batch create", || async {
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
                let status: TextBatchStatus = response.json().await?;
                Ok(status)
            })
            .await
    }

    pub async fn batch_status(&self, batch_id: &str) -> ProviderResult<TextBatchStatus> {
        let url = format!("{}/v1/batches/{}", self.config.base_url, batch_id);

        self.config
            .retry
            .run("text batch status", || async {
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
                let status: TextBatchStatus = response.json().await?;
                Ok(status)
            })
            .await
    }

    /// Download the JSONL results of an ended batch.
    pub async fn batch_results(&self, batch_id: &str) -> ProviderResult<Vec<TextResultLine>> {
        let url = format!("{}/v1/batches/{}/results", self.config.base_url, batch_id);

        let text = self
            .config
            .retry
            .run("text batch results", || async {
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
}
