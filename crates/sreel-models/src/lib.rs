//! Shared data models for the StoryReel pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Projects and artifact naming conventions
//! - Batch job descriptors and their lifecycle states
//! - Scene/motion prompt records
//! - The position-based render-tier policy
//! - Cost accounting

pub mod artifact;
pub mod batch;
pub mod cost;
pub mod error;
pub mod project;
pub mod record;
pub mod tier;

// Re-export common types
pub use artifact::{
    image_filename, parse_indexed_filename, video_filename, CHARACTER_SETTINGS_FILE, IMAGES_DIR,
    MOTION_PROMPTS_FILE, SCENE_PROMPTS_FILE, TOKEN_USAGE_FILE, VIDEOS_DIR, VIDEO_CHECKPOINT_FILE,
    VIDEO_LOG_FILE,
};
pub use batch::{BatchId, BatchProgress, BatchState, JobDescriptor, JobKind};
pub use cost::{CostTracker, TokenUsage};
pub use error::{ModelError, ModelResult};
pub use project::ProjectName;
pub use record::SceneRecord;
pub use tier::RenderTier;
