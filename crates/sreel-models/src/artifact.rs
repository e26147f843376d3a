//! Artifact naming conventions.
//!
//! Every generated artifact is one file with a zero-padded numeric name
//! (`042.png`, `007.mp4`); the number is the 1-based artifact index and must
//! survive a round trip through both storage tiers.

use regex::Regex;
use std::sync::OnceLock;

pub const CHARACTER_SETTINGS_FILE: &str = "character_settings.txt";
pub const SCENE_PROMPTS_FILE: &str = "scene_prompts.jsonl";
pub const MOTION_PROMPTS_FILE: &str = "motion_prompts.txt";
pub const IMAGES_DIR: &str = "images";
pub const VIDEOS_DIR: &str = "videos";
pub const VIDEO_CHECKPOINT_FILE: &str = "video_checkpoint.json";
pub const VIDEO_LOG_FILE: &str = "video_generation_log.json";
pub const TOKEN_USAGE_FILE: &str = "token_usage.json";

/// File name for an image artifact (`42` -> `042.png`).
pub fn image_filename(index: u32) -> String {
    format!("{index:03}.png")
}

/// File name for a video artifact (`42` -> `042.mp4`).
pub fn video_filename(index: u32) -> String {
    format!("{index:03}.mp4")
}

fn indexed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,6})\.([a-z0-9]+)$").unwrap())
}

/// Parse an indexed artifact file name back into its index, checking the
/// expected extension. Returns `None` for anything that does not follow the
/// convention (partial downloads, editor droppings, foreign files).
pub fn parse_indexed_filename(name: &str, ext: &str) -> Option<u32> {
    let caps = indexed_re().captures(name)?;
    if &caps[2] != ext {
        return None;
    }
    caps[1].parse::<u32>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_round_trip() {
        assert_eq!(image_filename(1), "001.png");
        assert_eq!(image_filename(117), "117.png");
        assert_eq!(video_filename(9), "009.mp4");

        assert_eq!(parse_indexed_filename("001.png", "png"), Some(1));
        assert_eq!(parse_indexed_filename("117.png", "png"), Some(117));
        assert_eq!(parse_indexed_filename("009.mp4", "mp4"), Some(9));
    }

    #[test]
    fn test_parse_rejects_foreign_files() {
        assert_eq!(parse_indexed_filename("cover.png", "png"), None);
        assert_eq!(parse_indexed_filename("001.png.part", "png"), None);
        assert_eq!(parse_indexed_filename("001.mp4", "png"), None);
        assert_eq!(parse_indexed_filename(".DS_Store", "png"), None);
        assert_eq!(parse_indexed_filename("", "png"), None);
    }
}
