//! Cost accounting for a pipeline run.
//!
//! Pure arithmetic over published unit prices. The tracker accumulates usage
//! as phases run and renders the summary block shown in logs and sent with
//! the completion notification.

use serde::{Deserialize, Serialize};

use crate::tier::RenderTier;

/// USD per million input tokens on the text gateway.
pub const TEXT_INPUT_PRICE_PER_MTOK: f64 = 3.00;
/// USD per million cache-write tokens.
pub const TEXT_CACHE_WRITE_PRICE_PER_MTOK: f64 = 3.75;
/// USD per million cache-read tokens.
pub const TEXT_CACHE_READ_PRICE_PER_MTOK: f64 = 0.30;
/// USD per million output tokens.
pub const TEXT_OUTPUT_PRICE_PER_MTOK: f64 = 15.00;
/// USD per generated video clip.
pub const VIDEO_PRICE_PER_CLIP: f64 = 0.14;
/// Flat USD estimate for one character-settings call.
pub const SETTINGS_CALL_PRICE: f64 = 0.02;

/// Token counts reported by the text gateway for one or more calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_write_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
}

impl TokenUsage {
    /// Accumulate another usage report into this one.
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_write_tokens += other.cache_write_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
    }

    /// USD cost of this usage at the text-gateway prices.
    pub fn cost_usd(&self) -> f64 {
        const MTOK: f64 = 1_000_000.0;
        self.input_tokens as f64 / MTOK * TEXT_INPUT_PRICE_PER_MTOK
            + self.cache_write_tokens as f64 / MTOK * TEXT_CACHE_WRITE_PRICE_PER_MTOK
            + self.cache_read_tokens as f64 / MTOK * TEXT_CACHE_READ_PRICE_PER_MTOK
            + self.output_tokens as f64 / MTOK * TEXT_OUTPUT_PRICE_PER_MTOK
    }
}

/// Accumulated cost state for one pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostTracker {
    /// Character-settings calls (flat-priced)
    pub settings_calls: u32,
    /// Token usage of the scene-prompt phase
    pub prompt_usage: TokenUsage,
    /// Token usage of the motion-prompt phase
    pub motion_usage: TokenUsage,
    /// Premium-tier images generated
    pub premium_images: u32,
    /// Standard-tier images generated
    pub standard_images: u32,
    /// Video clips generated
    pub videos: u32,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_settings_call(&mut self) {
        self.settings_calls += 1;
    }

    pub fn add_prompt_usage(&mut self, usage: &TokenUsage) {
        self.prompt_usage.add(usage);
    }

    pub fn add_motion_usage(&mut self, usage: &TokenUsage) {
        self.motion_usage.add(usage);
    }

    pub fn record_image(&mut self, tier: RenderTier) {
        self.record_images(tier, 1);
    }

    pub fn record_images(&mut self, tier: RenderTier, count: u32) {
        match tier {
            RenderTier::Premium => self.premium_images += count,
            RenderTier::Standard => self.standard_images += count,
        }
    }

    pub fn record_videos(&mut self, count: u32) {
        self.videos += count;
    }

    pub fn text_cost_usd(&self) -> f64 {
        self.settings_calls as f64 * SETTINGS_CALL_PRICE
            + self.prompt_usage.cost_usd()
            + self.motion_usage.cost_usd()
    }

    pub fn image_cost_usd(&self) -> f64 {
        self.premium_images as f64 * RenderTier::Premium.unit_price_usd()
            + self.standard_images as f64 * RenderTier::Standard.unit_price_usd()
    }

    pub fn video_cost_usd(&self) -> f64 {
        self.videos as f64 * VIDEO_PRICE_PER_CLIP
    }

    pub fn total_usd(&self) -> f64 {
        self.text_cost_usd() + self.image_cost_usd() + self.video_cost_usd()
    }

    /// Render the end-of-run summary block printed to the log.
    pub fn summary_block(&self) -> String {
        let mut out = String::new();
        out.push_str("==== cost summary ====\n");
        out.push_str(&format!(
            "text:   ${:.4} ({} settings calls, {} prompt tokens out, {} motion tokens out)\n",
            self.text_cost_usd(),
            self.settings_calls,
            self.prompt_usage.output_tokens,
            self.motion_usage.output_tokens,
        ));
        out.push_str(&format!(
            "images: ${:.4} ({} premium, {} standard)\n",
            self.image_cost_usd(),
            self.premium_images,
            self.standard_images,
        ));
        out.push_str(&format!(
            "videos: ${:.4} ({} clips)\n",
            self.video_cost_usd(),
            self.videos,
        ));
        out.push_str(&format!("total:  ${:.4}\n", self.total_usd()));
        out.push_str("======================");
        out
    }

    /// Name/value pairs for the completion notification.
    pub fn webhook_fields(&self) -> Vec<(String, String)> {
        vec![
            ("Text".to_string(), format!("${:.4}", self.text_cost_usd())),
            (
                "Images".to_string(),
                format!(
                    "${:.4} ({} premium / {} standard)",
                    self.image_cost_usd(),
                    self.premium_images,
                    self.standard_images
                ),
            ),
            (
                "Videos".to_string(),
                format!("${:.4} ({} clips)", self.video_cost_usd(), self.videos),
            ),
            ("Total".to_string(), format!("${:.4}", self.total_usd())),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_usage_cost() {
        let usage = TokenUsage {
            input_tokens: 1_000_000,
            output_tokens: 1_000_000,
            cache_write_tokens: 0,
            cache_read_tokens: 0,
        };
        assert!((usage.cost_usd() - 18.00).abs() < 1e-9);
    }

    #[test]
    fn test_image_cost_split_by_tier() {
        let mut tracker = CostTracker::new();
        tracker.record_images(RenderTier::Premium, 3);
        tracker.record_images(RenderTier::Standard, 47);
        let expected = 3.0 * 0.25 + 47.0 * 0.052;
        assert!((tracker.image_cost_usd() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_total_accumulates_all_phases() {
        let mut tracker = CostTracker::new();
        tracker.record_settings_call();
        tracker.add_prompt_usage(&TokenUsage {
            input_tokens: 500_000,
            output_tokens: 100_000,
            ..Default::default()
        });
        tracker.record_images(RenderTier::Premium, 2);
        tracker.record_videos(5);

        let text = 0.02 + 0.5 * 3.00 + 0.1 * 15.00;
        let expected = text + 2.0 * 0.25 + 5.0 * 0.14;
        assert!((tracker.total_usd() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_summary_block_mentions_totals() {
        let mut tracker = CostTracker::new();
        tracker.record_videos(2);
        let block = tracker.summary_block();
        assert!(block.contains("videos: $0.2800 (2 clips)"));
        assert!(block.contains("total:"));
    }
}
