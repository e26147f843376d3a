//! Chat webhook notifications.
//!
//! Sends embeds-style JSON to `NOTIFY_WEBHOOK_URL`. Disabled when the
//! variable is unset. Send failures are logged and never fatal.

use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use sreel_models::CostTracker;

const COLOR_SUCCESS: u32 = 0x2ECC71;
const COLOR_FAILURE: u32 = 0xE74C3C;
const COLOR_INFO: u32 = 0x3498DB;

/// Webhook notifier handle.
#[derive(Clone)]
pub struct Notifier {
    http: reqwest::Client,
    webhook_url: Option<String>,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            webhook_url: webhook_url.filter(|u| !u.is_empty()),
        }
    }

    /// Create from `NOTIFY_WEBHOOK_URL`.
    pub fn from_env() -> Self {
        Self::new(std::env::var("NOTIFY_WEBHOOK_URL").ok())
    }

    /// Notifier that never sends anything.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    /// Post one embed. Failures are logged, never returned.
    pub async fn send(
        &self,
        title: &str,
        description: &str,
        color: u32,
        fields: &[(String, String)],
    ) {
        let url = match &self.webhook_url {
            Some(u) => u,
            None => {
                debug!("Notification skipped (webhook not configured): {}", title);
                return;
            }
        };

        let field_objects: Vec<_> = fields
            .iter()
            .map(|(name, value)| json!({"name": name, "value": value, "inline": true}))
            .collect();
        let payload = json!({
            "embeds": [{
                "title": title,
                "description": description,
                "color": color,
                "fields": field_objects,
                "timestamp": Utc::now().to_rfc3339(),
            }]
        });

        match self.http.post(url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Notification sent: {}", title);
            }
            Ok(response) => {
                warn!(
                    "Notification rejected with status {}: {}",
                    response.status(),
                    title
                );
            }
            Err(e) => {
                warn!("Notification send failed: {}", e);
            }
        }
    }

    /// Project finished: cost breakdown plus artifact counts.
    pub async fn send_completion(
        &self,
        project: &str,
        cost: &CostTracker,
        scenes: u32,
        images: u32,
        videos: u32,
    ) {
        let mut fields = cost.webhook_fields();
        fields.push((
            "Artifacts".to_string(),
            format!("{} scenes / {} images / {} videos", scenes, images, videos),
        ));
        self.send(
            &format!("Project complete: {}", project),
            "All phases finished and the bundle was uploaded.",
            COLOR_SUCCESS,
            &fields,
        )
        .await;
    }

    /// Phase failed: short reason, no cost block.
    pub async fn send_failure(&self, project: &str, phase: &str, reason: &str) {
        self.send(
            &format!("Project failed: {}", project),
            &format!("Phase `{}` failed: {}", phase, reason),
            COLOR_FAILURE,
            &[],
        )
        .await;
    }

    /// Run interrupted by the operator.
    pub async fn send_interrupted(&self, project: &str, phase: &str, done: u32, total: u32) {
        self.send(
            &format!("Run interrupted: {}", project),
            &format!("Stopped during `{}` at {}/{} items.", phase, done, total),
            COLOR_INFO,
            &[],
        )
        .await;
    }
}
