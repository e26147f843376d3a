//! Scene prompt records.
//!
//! `scene_prompts.jsonl` holds one JSON object per line. A line only counts
//! toward the checkpoint when it parses and carries a positive `index` and a
//! non-empty `image_prompt`; everything else is treated as garbage from an
//! interrupted write and skipped.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One scene of the story: the prompt that renders its image plus the
/// compressed summary fed into later scenes for continuity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRecord {
    /// 1-based scene index
    pub index: u32,

    /// Image-generation prompt for this scene
    pub image_prompt: String,

    /// Short visual summary used as rolling context for subsequent scenes
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub visual_summary: Option<String>,

    /// Set on the extra scenes appended after the script's last line
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub is_finale: Option<bool>,
}

impl SceneRecord {
    pub fn new(index: u32, image_prompt: impl Into<String>) -> Self {
        Self {
            index,
            image_prompt: image_prompt.into(),
            visual_summary: None,
            is_finale: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.visual_summary = Some(summary.into());
        self
    }

    pub fn finale(mut self) -> Self {
        self.is_finale = Some(true);
        self
    }

    /// Parse one JSONL line, returning `None` unless it is a valid record.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let record: SceneRecord = serde_json::from_str(line).ok()?;
        if record.index == 0 || record.image_prompt.trim().is_empty() {
            return None;
        }
        Some(record)
    }

    /// Serialize to one JSONL line (no trailing newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse a whole JSONL document into records keyed by index. Later
    /// duplicates win (a re-run appends corrected records). Returns the
    /// records and the number of skipped invalid lines.
    pub fn parse_document(text: &str) -> (BTreeMap<u32, SceneRecord>, usize) {
        let mut records = BTreeMap::new();
        let mut invalid = 0;
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match Self::parse_line(line) {
                Some(record) => {
                    records.insert(record.index, record);
                }
                None => invalid += 1,
            }
        }
        (records, invalid)
    }
}
