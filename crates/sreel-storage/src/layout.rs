//! Project layout conventions across both storage tiers.
//!
//! Local tier: `<work_dir>/output/<project>/...`. Remote tier: the same file
//! names under `projects/<project>/` in the archive bucket. Keeping the two
//! structurally identical is what lets checkpoint resolution and mirroring
//! translate between tiers with nothing but a prefix swap.

use std::path::{Path, PathBuf};

use sreel_models::{
    artifact, JobKind, ProjectName, CHARACTER_SETTINGS_FILE, IMAGES_DIR, MOTION_PROMPTS_FILE,
    SCENE_PROMPTS_FILE, TOKEN_USAGE_FILE, VIDEOS_DIR, VIDEO_CHECKPOINT_FILE, VIDEO_LOG_FILE,
};

use crate::error::StorageResult;

/// Remote prefix for project folders.
pub const PROJECTS_PREFIX: &str = "projects";
/// Remote prefix for pipeline input scripts.
pub const SCRIPTS_PREFIX: &str = "scripts";
/// Watch-registry document, local file name and remote key.
pub const REGISTRY_FILE: &str = "watch_registry.json";
/// Contact note describing the run in progress.
pub const ACTIVE_PROJECT_FILE: &str = "_active_project.json";

/// Paths rooted at the pipeline work directory.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    work_dir: PathBuf,
}

impl WorkspacePaths {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Local script intake directory.
    pub fn input_dir(&self) -> PathBuf {
        self.work_dir.join("input")
    }

    /// Parent of all project output directories.
    pub fn output_dir(&self) -> PathBuf {
        self.work_dir.join("output")
    }

    /// Durable error-log directory.
    pub fn logs_dir(&self) -> PathBuf {
        self.work_dir.join("logs")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.work_dir.join(REGISTRY_FILE)
    }

    pub fn active_project_path(&self) -> PathBuf {
        self.work_dir.join(ACTIVE_PROJECT_FILE)
    }

    pub fn project(&self, name: &ProjectName) -> ProjectLayout {
        ProjectLayout::new(self.output_dir(), name.clone())
    }
}

/// All file locations for one project, local and remote.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    project: ProjectName,
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(output_root: PathBuf, project: ProjectName) -> Self {
        let root = output_root.join(project.as_str());
        Self { project, root }
    }

    pub fn project(&self) -> &ProjectName {
        &self.project
    }

    /// Local project output directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join(CHARACTER_SETTINGS_FILE)
    }

    pub fn scene_prompts_path(&self) -> PathBuf {
        self.root.join(SCENE_PROMPTS_FILE)
    }

    pub fn motion_prompts_path(&self) -> PathBuf {
        self.root.join(MOTION_PROMPTS_FILE)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join(IMAGES_DIR)
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.root.join(VIDEOS_DIR)
    }

    pub fn image_path(&self, index: u32) -> PathBuf {
        self.images_dir().join(artifact::image_filename(index))
    }

    pub fn video_path(&self, index: u32) -> PathBuf {
        self.videos_dir().join(artifact::video_filename(index))
    }

    /// Per-project job descriptor document for one batch kind.
    pub fn descriptor_path(&self, kind: JobKind) -> PathBuf {
        self.root.join(kind.descriptor_filename())
    }

    pub fn video_checkpoint_path(&self) -> PathBuf {
        self.root.join(VIDEO_CHECKPOINT_FILE)
    }

    pub fn video_log_path(&self) -> PathBuf {
        self.root.join(VIDEO_LOG_FILE)
    }

    pub fn token_usage_path(&self) -> PathBuf {
        self.root.join(TOKEN_USAGE_FILE)
    }

    /// Create the project directory tree.
    pub async fn ensure_dirs(&self) -> StorageResult<()> {
        tokio::fs::create_dir_all(self.images_dir()).await?;
        tokio::fs::create_dir_all(self.videos_dir()).await?;
        Ok(())
    }

    /// Remote folder for this project (no trailing slash).
    pub fn remote_prefix(&self) -> String {
        format!("{}/{}", PROJECTS_PREFIX, self.project.as_str())
    }

    /// Remote key for a project-relative path.
    pub fn remote_key(&self, relative: &str) -> String {
        format!("{}/{}", self.remote_prefix(), relative)
    }

    pub fn remote_image_key(&self, index: u32) -> String {
        self.remote_key(&format!("{}/{}", IMAGES_DIR, artifact::image_filename(index)))
    }

    pub fn remote_video_key(&self, index: u32) -> String {
        self.remote_key(&format!("{}/{}", VIDEOS_DIR, artifact::video_filename(index)))
    }

    /// Remote images folder prefix (with trailing slash, for listing).
    pub fn remote_images_prefix(&self) -> String {
        format!("{}/{}/", self.remote_prefix(), IMAGES_DIR)
    }

    pub fn remote_videos_prefix(&self) -> String {
        format!("{}/{}/", self.remote_prefix(), VIDEOS_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> ProjectLayout {
        let paths = WorkspacePaths::new("/srv/work");
        paths.project(&ProjectName::new("midnight").expect("valid"))
    }

    #[test]
    fn test_local_paths() {
        let layout = layout();
        assert_eq!(
            layout.image_path(7),
            PathBuf::from("/srv/work/output/midnight/images/007.png")
        );
        assert_eq!(
            layout.descriptor_path(JobKind::ImageBatch),
            PathBuf::from("/srv/work/output/midnight/image_batch_info.json")
        );
        assert_eq!(
            layout.scene_prompts_path(),
            PathBuf::from("/srv/work/output/midnight/scene_prompts.jsonl")
        );
    }

    #[test]
    fn test_remote_keys_mirror_local_names() {
        let layout = layout();
        assert_eq!(layout.remote_prefix(), "projects/midnight");
        assert_eq!(layout.remote_image_key(7), "projects/midnight/images/007.png");
        assert_eq!(layout.remote_images_prefix(), "projects/midnight/images/");
        assert_eq!(
            layout.remote_key("scene_prompts.jsonl"),
            "projects/midnight/scene_prompts.jsonl"
        );
    }

    #[test]
    fn test_workspace_paths() {
        let paths = WorkspacePaths::new("/srv/work");
        assert_eq!(paths.registry_path(), PathBuf::from("/srv/work/watch_registry.json"));
        assert_eq!(paths.input_dir(), PathBuf::from("/srv/work/input"));
    }
}
