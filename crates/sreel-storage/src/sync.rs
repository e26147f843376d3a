//! File synchronization between the local workspace and the archive.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::layout::{ProjectLayout, SCRIPTS_PREFIX};
use crate::object_store::ObjectStore;

/// Content type for an object key or file name.
pub fn content_type_for(name: &str) -> &'static str {
    match name.rsplit('.').next() {
        Some("png") => "image/png",
        Some("mp4") => "video/mp4",
        Some("json") | Some("jsonl") => "application/json",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Mirroring and bundle-upload helpers over an [`ObjectStore`].
#[derive(Clone)]
pub struct ArchiveSync {
    store: Arc<dyn ObjectStore>,
}

impl ArchiveSync {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Upload one local file to the given key.
    pub async fn upload_file(&self, local: &Path, key: &str) -> StorageResult<()> {
        let bytes = tokio::fs::read(local).await?;
        self.store.put(key, bytes, content_type_for(key)).await?;
        debug!("Mirrored {} to {}", local.display(), key);
        Ok(())
    }

    /// Download a key into a local file, creating parent directories.
    /// Returns `false` when the key does not exist.
    pub async fn try_download(&self, key: &str, local: &Path) -> StorageResult<bool> {
        let bytes = match self.store.get(key).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local, bytes).await?;
        debug!("Downloaded {} to {}", key, local.display());
        Ok(true)
    }

    /// Upload a whole project directory tree under its remote prefix.
    /// Returns the number of files uploaded.
    pub async fn upload_project(&self, layout: &ProjectLayout) -> StorageResult<u32> {
        let root = layout.root().to_path_buf();
        let mut uploaded = 0u32;
        let mut pending: Vec<PathBuf> = vec![root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let relative = path
                    .strip_prefix(&root)
                    .map_err(|e| StorageError::upload_failed(e.to_string()))?
                    .to_string_lossy()
                    .replace('\\', "/");
                self.upload_file(&path, &layout.remote_key(&relative)).await?;
                uploaded += 1;
            }
        }

        info!(project = %layout.project(), files = uploaded, "uploaded project bundle");
        Ok(uploaded)
    }

    /// List script names available in the remote intake folder.
    pub async fn list_scripts(&self) -> StorageResult<Vec<String>> {
        let prefix = format!("{}/", SCRIPTS_PREFIX);
        let entries = self.store.list(&prefix).await?;
        let mut names: Vec<String> = entries
            .into_iter()
            .filter_map(|entry| {
                let name = entry.key.rsplit('/').next()?.to_string();
                name.ends_with(".txt").then_some(name)
            })
            .collect();
        names.sort();
        Ok(names)
    }

    /// Download one intake script into the local input directory.
    pub async fn download_script(&self, name: &str, dest: &Path) -> StorageResult<()> {
        let key = format!("{}/{}", SCRIPTS_PREFIX, name);
        if !self.try_download(&key, dest).await? {
            return Err(StorageError::not_found(key));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::WorkspacePaths;
    use crate::object_store::MemoryStore;
    use sreel_models::ProjectName;
    use tempfile::TempDir;

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("images/001.png"), "image/png");
        assert_eq!(content_type_for("scene_prompts.jsonl"), "application/json");
        assert_eq!(content_type_for("clip.mp4"), "video/mp4");
        assert_eq!(content_type_for("notes"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_upload_project_walks_subdirectories() {
        let tmp = TempDir::new().expect("tempdir");
        let layout = WorkspacePaths::new(tmp.path())
            .project(&ProjectName::new("demo").expect("valid"));
        layout.ensure_dirs().await.expect("dirs");
        tokio::fs::write(layout.settings_path(), b"cast").await.expect("write");
        tokio::fs::write(layout.image_path(1), b"png").await.expect("write");
        tokio::fs::write(layout.video_path(1), b"mp4").await.expect("write");

        let store = MemoryStore::new();
        let sync = ArchiveSync::new(Arc::new(store.clone()));
        let uploaded = sync.upload_project(&layout).await.expect("upload");

        assert_eq!(uploaded, 3);
        let keys = store.keys();
        assert!(keys.contains(&"projects/demo/character_settings.txt".to_string()));
        assert!(keys.contains(&"projects/demo/images/001.png".to_string()));
        assert!(keys.contains(&"projects/demo/videos/001.mp4".to_string()));
    }

    #[tokio::test]
    async fn test_try_download_missing_returns_false() {
        let tmp = TempDir::new().expect("tempdir");
        let sync = ArchiveSync::new(Arc::new(MemoryStore::new()));
        let dest = tmp.path().join("nested/dir/file.txt");
        let found = sync.try_download("projects/demo/missing.txt", &dest).await.expect("ok");
        assert!(!found);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_script_intake_round_trip() {
        let tmp = TempDir::new().expect("tempdir");
        let store = MemoryStore::new();
        store.insert("scripts/tale_one.txt", b"line".to_vec());
        store.insert("scripts/tale_two.txt", b"line".to_vec());
        store.insert("scripts/readme.md", b"not a script".to_vec());
        let sync = ArchiveSync::new(Arc::new(store));

        let names = sync.list_scripts().await.expect("list");
        assert_eq!(names, vec!["tale_one.txt", "tale_two.txt"]);

        let dest = tmp.path().join("input/tale_one.txt");
        sync.download_script("tale_one.txt", &dest).await.expect("download");
        assert!(dest.exists());
    }
}
