//! Error taxonomy shared by all gateway clients.

use thiserror::Error;

use crate::types::GatewayErrorBody;

/// Markers that identify a moderation rejection regardless of HTTP status.
const MODERATION_MARKERS: &[&str] = &[
    "content_policy",
    "moderation",
    "flagged",
    "safety",
    "sensitive",
];

/// Markers that identify an account problem (key, billing, quota). These are
/// never retried: the same request will keep failing until a human fixes the
/// account.
const ACCOUNT_MARKERS: &[&str] = &[
    "invalid_api_key",
    "authentication",
    "billing",
    "credit",
    "balance",
    "insufficient_quota",
];

/// Errors from gateway clients.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Gateway rejected the request; not otherwise classified.
    #[error("Gateway returned {status}: {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Request was refused by the content moderation layer.
    #[error("Moderation rejection: {0}")]
    Moderation(String),

    /// API key, billing, or quota problem.
    #[error("Account error: {0}")]
    Account(String),

    /// Video task reported a terminal failure state.
    #[error("Video task failed: {0}")]
    TaskFailed(String),

    /// Response decoded but is missing a field we need.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Client-side configuration problem.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level failure (connect, timeout, TLS).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Body did not parse as JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

impl ProviderError {
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn task_failed(msg: impl Into<String>) -> Self {
        Self::TaskFailed(msg.into())
    }

    /// Classify a non-success response into the taxonomy.
    ///
    /// Moderation markers win over everything else so that a 400 carrying a
    /// `content_policy` code is treated as a prompt problem, not a server
    /// problem. Account markers and auth statuses come next; what remains is
    /// a plain API error whose status decides retryability.
    pub fn classify(status: u16, code: Option<String>, message: String) -> Self {
        let haystack = format!("{} {}", code.as_deref().unwrap_or(""), message).to_lowercase();

        if MODERATION_MARKERS.iter().any(|m| haystack.contains(m)) {
            return Self::Moderation(message);
        }
        if matches!(status, 401 | 402 | 403) || ACCOUNT_MARKERS.iter().any(|m| haystack.contains(m))
        {
            return Self::Account(message);
        }
        Self::Api {
            status,
            code,
            message,
        }
    }

    /// Build an error from a raw status and body, tolerating non-JSON bodies.
    pub fn from_body(status: u16, body: &str) -> Self {
        match serde_json::from_str::<GatewayErrorBody>(body) {
            Ok(parsed) => {
                let detail = parsed.error.unwrap_or_default();
                let message = detail
                    .message
                    .unwrap_or_else(|| truncated(body).to_string());
                Self::classify(status, detail.code, message)
            }
            Err(_) => Self::classify(status, None, truncated(body).to_string()),
        }
    }

    /// Consume a non-success response and classify it.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Self::from_body(status, &body)
    }

    /// Whether a retry with the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Api { status, .. } => matches!(status, 408 | 429 | 500 | 502 | 503 | 504),
            _ => false,
        }
    }

    pub fn is_moderation(&self) -> bool {
        matches!(self, Self::Moderation(_))
    }

    /// Errors that should stop the whole run, not just the current item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Account(_) | Self::Config(_))
    }
}

/// Cap error-body text so log lines stay readable.
fn truncated(body: &str) -> &str {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(300) {
        Some((idx, _)) => &trimmed[..idx],
        None => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moderation_classified_from_code() {
        let err = ProviderError::from_body(
            400,
            r#"{"error": {"code": "content_policy_violation", "message": "Your request was rejected"}}"#,
        );
        assert!(err.is_moderation());
        assert!(!err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_account_classified_from_status() {
        let err = ProviderError::from_body(401, r#"{"error": {"message": "bad key"}}"#);
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_account_classified_from_message() {
        let err =
            ProviderError::from_body(400, r#"{"error": {"message": "insufficient_quota left"}}"#);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_rate_limit_is_retryable() {
        let err = ProviderError::from_body(429, r#"{"error": {"message": "slow down"}}"#);
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_server_errors_are_retryable() {
        for status in [500, 502, 503, 504] {
            assert!(ProviderError::from_body(status, "oops").is_retryable());
        }
        assert!(!ProviderError::from_body(404, "missing").is_retryable());
    }

    #[test]
    fn test_non_json_body_is_truncated() {
        let body = "x".repeat(500);
        let err = ProviderError::from_body(500, &body);
        match err {
            ProviderError::Api { status, message, .. } => {
                assert_eq!(status, 500);
                assert_eq!(message.len(), 300);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_moderation_wins_over_account_status() {
        // A 403 that names the moderation layer is a prompt problem.
        let err = ProviderError::from_body(
            403,
            r#"{"error": {"code": "moderation_blocked", "message": "unsafe image"}}"#,
        );
        assert!(err.is_moderation());
    }
}
