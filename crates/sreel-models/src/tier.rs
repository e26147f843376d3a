//! Position-based render-tier policy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Rendering tier for one image artifact.
///
/// The opening scene and the two closing scenes carry the video's first
/// impression and finale, so they render on the premium tier; everything in
/// between uses the standard tier. The tier is a pure function of
/// `(index, total)` and is re-derived wherever it is needed (submission,
/// retrieval, cost rollup) instead of being stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderTier {
    Premium,
    Standard,
}

impl RenderTier {
    /// Select the tier for a 1-based artifact position.
    pub fn for_position(index: u32, total: u32) -> Self {
        if index == 1 || index + 1 >= total {
            RenderTier::Premium
        } else {
            RenderTier::Standard
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RenderTier::Premium => "premium",
            RenderTier::Standard => "standard",
        }
    }

    /// Unit price per generated image in USD.
    pub fn unit_price_usd(&self) -> f64 {
        match self {
            RenderTier::Premium => 0.25,
            RenderTier::Standard => 0.052,
        }
    }
}

impl fmt::Display for RenderTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
