//! Dual-tier checkpoint resolution.
//!
//! Answers "which artifact indices already exist" for a project and phase.
//! The local scan wins whenever it finds anything; only an empty local tier
//! triggers the remote round trip, and remote artifacts are downloaded into
//! the local tier as a side effect so the next resolution is local-only.
//! Any remote failure degrades to "zero done": regenerating work costs money,
//! skipping work that was never done loses the project.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use sreel_models::{artifact, SceneRecord, IMAGES_DIR, SCENE_PROMPTS_FILE, VIDEOS_DIR};

use crate::error::StorageResult;
use crate::layout::ProjectLayout;
use crate::object_store::ObjectStore;

/// Resolves completed work across the local and remote tiers.
#[derive(Clone)]
pub struct CheckpointStore {
    store: Option<Arc<dyn ObjectStore>>,
}

impl CheckpointStore {
    /// `store = None` disables the remote tier entirely (local-only mode).
    pub fn new(store: Option<Arc<dyn ObjectStore>>) -> Self {
        Self { store }
    }

    /// Whether a resolved set covers the expected total.
    pub fn is_complete(done: &BTreeSet<u32>, expected_total: u32) -> bool {
        done.len() as u32 >= expected_total
    }

    /// Resolve completed scene-prompt records.
    pub async fn resolve_scenes(&self, layout: &ProjectLayout) -> BTreeSet<u32> {
        let local = self.local_scenes(layout).await;
        if !local.is_empty() {
            return local;
        }
        match self.remote_scenes(layout).await {
            Ok(done) => done,
            Err(e) => {
                warn!(
                    project = %layout.project(),
                    error = %e,
                    "remote scene checkpoint unavailable, assuming zero done"
                );
                BTreeSet::new()
            }
        }
    }

    /// Resolve completed image artifacts.
    pub async fn resolve_images(&self, layout: &ProjectLayout) -> BTreeSet<u32> {
        self.resolve_indexed(layout, IMAGES_DIR, "png").await
    }

    /// Resolve completed video artifacts.
    pub async fn resolve_videos(&self, layout: &ProjectLayout) -> BTreeSet<u32> {
        self.resolve_indexed(layout, VIDEOS_DIR, "mp4").await
    }

    async fn resolve_indexed(&self, layout: &ProjectLayout, dir: &str, ext: &str) -> BTreeSet<u32> {
        let local_dir = layout.root().join(dir);
        let local = match scan_indexed_dir(&local_dir, ext).await {
            Ok(set) => set,
            Err(e) => {
                warn!(path = %local_dir.display(), error = %e, "local artifact scan failed");
                BTreeSet::new()
            }
        };
        if !local.is_empty() {
            return local;
        }
        match self.remote_indexed(layout, dir, ext).await {
            Ok(done) => done,
            Err(e) => {
                warn!(
                    project = %layout.project(),
                    dir,
                    error = %e,
                    "remote artifact checkpoint unavailable, assuming zero done"
                );
                BTreeSet::new()
            }
        }
    }

    async fn local_scenes(&self, layout: &ProjectLayout) -> BTreeSet<u32> {
        match tokio::fs::read_to_string(layout.scene_prompts_path()).await {
            Ok(text) => {
                let (records, invalid) = SceneRecord::parse_document(&text);
                if invalid > 0 {
                    warn!(
                        project = %layout.project(),
                        invalid,
                        "skipped invalid scene-prompt lines"
                    );
                }
                records.into_keys().collect()
            }
            Err(_) => BTreeSet::new(),
        }
    }

    async fn remote_scenes(&self, layout: &ProjectLayout) -> StorageResult<BTreeSet<u32>> {
        let Some(store) = &self.store else {
            return Ok(BTreeSet::new());
        };

        let key = layout.remote_key(SCENE_PROMPTS_FILE);
        let bytes = match store.get(&key).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(BTreeSet::new()),
            Err(e) => return Err(e),
        };

        let text = String::from_utf8_lossy(&bytes);
        let (records, _) = SceneRecord::parse_document(&text);
        if records.is_empty() {
            return Ok(BTreeSet::new());
        }

        // Materialize locally so the next resolution short-circuits.
        layout.ensure_dirs().await?;
        tokio::fs::write(layout.scene_prompts_path(), bytes.as_slice()).await?;
        info!(
            project = %layout.project(),
            scenes = records.len(),
            "restored scene prompts from archive"
        );
        Ok(records.into_keys().collect())
    }

    async fn remote_indexed(
        &self,
        layout: &ProjectLayout,
        dir: &str,
        ext: &str,
    ) -> StorageResult<BTreeSet<u32>> {
        let Some(store) = &self.store else {
            return Ok(BTreeSet::new());
        };

        let prefix = format!("{}/{}/", layout.remote_prefix(), dir);
        let entries = store.list(&prefix).await?;

        let mut done = BTreeSet::new();
        if entries.is_empty() {
            return Ok(done);
        }

        layout.ensure_dirs().await?;
        for entry in entries {
            let name = entry.key.rsplit('/').next().unwrap_or_default();
            let Some(index) = artifact::parse_indexed_filename(name, ext) else {
                continue;
            };
            let bytes = store.get(&entry.key).await?;
            tokio::fs::write(layout.root().join(dir).join(name), bytes).await?;
            done.insert(index);
        }

        info!(
            project = %layout.project(),
            dir,
            restored = done.len(),
            "restored artifacts from archive"
        );
        Ok(done)
    }
}

async fn scan_indexed_dir(dir: &Path, ext: &str) -> StorageResult<BTreeSet<u32>> {
    let mut done = BTreeSet::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return Ok(done),
    };
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(index) = artifact::parse_indexed_filename(name, ext) {
            done.insert(index);
        }
    }
    Ok(done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::WorkspacePaths;
    use crate::object_store::MemoryStore;
    use async_trait::async_trait;
    use sreel_models::ProjectName;
    use tempfile::TempDir;

    struct FailingStore;

    #[async_trait]
    impl ObjectStore for FailingStore {
        async fn put(&self, _: &str, _: Vec<u8>, _: &str) -> StorageResult<()> {
            Err(crate::StorageError::upload_failed("wire down"))
        }
        async fn get(&self, _: &str) -> StorageResult<Vec<u8>> {
            Err(crate::StorageError::download_failed("wire down"))
        }
        async fn list(&self, _: &str) -> StorageResult<Vec<crate::ObjectInfo>> {
            Err(crate::StorageError::list_failed("wire down"))
        }
        async fn exists(&self, _: &str) -> StorageResult<bool> {
            Err(crate::StorageError::list_failed("wire down"))
        }
    }

    fn setup(tmp: &TempDir) -> ProjectLayout {
        let paths = WorkspacePaths::new(tmp.path());
        paths.project(&ProjectName::new("demo").expect("valid"))
    }

    #[tokio::test]
    async fn test_fresh_project_resolves_empty() {
        let tmp = TempDir::new().expect("tempdir");
        let layout = setup(&tmp);
        let store = MemoryStore::new();
        let checkpoints = CheckpointStore::new(Some(Arc::new(store)));

        assert!(checkpoints.resolve_scenes(&layout).await.is_empty());
        assert!(checkpoints.resolve_images(&layout).await.is_empty());
    }

    #[tokio::test]
    async fn test_local_artifacts_are_authoritative() {
        let tmp = TempDir::new().expect("tempdir");
        let layout = setup(&tmp);
        layout.ensure_dirs().await.expect("dirs");
        tokio::fs::write(layout.image_path(1), b"png1").await.expect("write");
        tokio::fs::write(layout.image_path(3), b"png3").await.expect("write");

        // Remote has a different set; it must not be consulted.
        let store = MemoryStore::new();
        store.insert(layout.remote_image_key(9), b"png9".to_vec());
        let checkpoints = CheckpointStore::new(Some(Arc::new(store)));

        let done = checkpoints.resolve_images(&layout).await;
        assert_eq!(done, BTreeSet::from([1, 3]));
        assert!(!layout.image_path(9).exists());
    }

    #[tokio::test]
    async fn test_remote_images_downloaded_as_side_effect() {
        let tmp = TempDir::new().expect("tempdir");
        let layout = setup(&tmp);
        let store = MemoryStore::new();
        for index in [1u32, 2, 5] {
            store.insert(layout.remote_image_key(index), format!("png{index}").into_bytes());
        }
        // Foreign object under the prefix is ignored.
        store.insert(layout.remote_key("images/cover_art.png"), b"x".to_vec());
        let checkpoints = CheckpointStore::new(Some(Arc::new(store)));

        let done = checkpoints.resolve_images(&layout).await;
        assert_eq!(done, BTreeSet::from([1, 2, 5]));
        assert_eq!(
            tokio::fs::read(layout.image_path(5)).await.expect("downloaded"),
            b"png5"
        );

        // Second resolution is served locally and agrees.
        let done_again = checkpoints.resolve_images(&layout).await;
        assert_eq!(done_again, done);
    }

    #[tokio::test]
    async fn test_remote_scene_records_validated_and_restored() {
        let tmp = TempDir::new().expect("tempdir");
        let layout = setup(&tmp);
        let store = MemoryStore::new();
        let doc = concat!(
            "{\"index\": 1, \"image_prompt\": \"a\"}\n",
            "corrupted half-line\n",
            "{\"index\": 2, \"image_prompt\": \"b\"}\n",
            "{\"index\": 4, \"image_prompt\": \"\"}\n",
        );
        store.insert(layout.remote_key(SCENE_PROMPTS_FILE), doc.as_bytes().to_vec());
        let checkpoints = CheckpointStore::new(Some(Arc::new(store)));

        let done = checkpoints.resolve_scenes(&layout).await;
        assert_eq!(done, BTreeSet::from([1, 2]));
        assert!(layout.scene_prompts_path().exists());
    }

    #[tokio::test]
    async fn test_remote_failure_degrades_to_zero_done() {
        let tmp = TempDir::new().expect("tempdir");
        let layout = setup(&tmp);
        let checkpoints = CheckpointStore::new(Some(Arc::new(FailingStore)));

        assert!(checkpoints.resolve_images(&layout).await.is_empty());
        assert!(checkpoints.resolve_scenes(&layout).await.is_empty());
    }

    #[tokio::test]
    async fn test_no_remote_store_is_local_only() {
        let tmp = TempDir::new().expect("tempdir");
        let layout = setup(&tmp);
        layout.ensure_dirs().await.expect("dirs");
        tokio::fs::write(layout.video_path(2), b"mp4").await.expect("write");

        let checkpoints = CheckpointStore::new(None);
        assert_eq!(checkpoints.resolve_videos(&layout).await, BTreeSet::from([2]));
        assert!(checkpoints.resolve_images(&layout).await.is_empty());
    }

    #[test]
    fn test_is_complete() {
        let done = BTreeSet::from([1, 2, 3]);
        assert!(CheckpointStore::is_complete(&done, 3));
        assert!(CheckpointStore::is_complete(&done, 2));
        assert!(!CheckpointStore::is_complete(&done, 4));
        assert!(CheckpointStore::is_complete(&BTreeSet::new(), 0));
    }
}
