//! The watch registry: every in-flight batch job, persisted locally and
//! mirrored to the archive.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use sreel_models::JobDescriptor;
use sreel_storage::{ArchiveSync, ObjectStore, WorkspacePaths, REGISTRY_FILE};

use crate::error::{BatchError, BatchResult};
use crate::persist;

/// On-disk shape of the registry.
///
/// `version` increments on every save; writers check it against what they
/// loaded before overwriting, so two processes sharing a workspace cannot
/// silently clobber each other's entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryDoc {
    #[serde(default)]
    pub version: u64,
    /// Watched jobs keyed by project name. One job per project; a chained
    /// flow that spawns a follow-up batch replaces the entry.
    #[serde(default)]
    pub projects: BTreeMap<String, JobDescriptor>,
}

/// Handle on the registry file with versioned saves and an archive mirror.
pub struct WatchRegistry {
    path: PathBuf,
    mirror: Option<ArchiveSync>,
    doc: RegistryDoc,
    loaded_version: u64,
}

impl WatchRegistry {
    /// Open the registry, restoring from the archive mirror when the local
    /// file is missing (fresh host picking up existing work).
    pub async fn open(
        paths: &WorkspacePaths,
        store: Option<Arc<dyn ObjectStore>>,
    ) -> BatchResult<Self> {
        let path = paths.registry_path();
        let mirror = store.map(ArchiveSync::new);

        if !path.exists() {
            if let Some(sync) = &mirror {
                match sync.try_download(REGISTRY_FILE, &path).await {
                    Ok(true) => info!("Watch registry restored from archive mirror"),
                    Ok(false) => {}
                    Err(e) => warn!("Could not check archive for a registry mirror: {}", e),
                }
            }
        }

        let doc = Self::read_doc(&path);
        let loaded_version = doc.version;
        Ok(Self {
            path,
            mirror,
            doc,
            loaded_version,
        })
    }

    /// Lenient read: a missing or corrupt file starts empty. Per-project
    /// descriptor files remain on disk for manual recovery.
    fn read_doc(path: &std::path::Path) -> RegistryDoc {
        match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str::<RegistryDoc>(&text) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(
                        "Watch registry at {} is corrupt, starting empty: {}",
                        path.display(),
                        e
                    );
                    RegistryDoc::default()
                }
            },
            Err(_) => RegistryDoc::default(),
        }
    }

    pub fn projects(&self) -> &BTreeMap<String, JobDescriptor> {
        &self.doc.projects
    }

    pub fn get(&self, project: &str) -> Option<&JobDescriptor> {
        self.doc.projects.get(project)
    }

    pub fn len(&self) -> usize {
        self.doc.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.projects.is_empty()
    }

    /// Insert or replace the entry for the descriptor's project.
    pub fn upsert(&mut self, descriptor: JobDescriptor) {
        self.doc
            .projects
            .insert(descriptor.project.as_str().to_string(), descriptor);
    }

    pub fn remove(&mut self, project: &str) -> Option<JobDescriptor> {
        self.doc.projects.remove(project)
    }

    /// Persist, refusing to overwrite a version we did not load.
    ///
    /// On [`BatchError::RegistryConflict`] the caller should [`reload`](Self::reload)
    /// and reapply its change. The mirror upload afterwards is best-effort;
    /// the local file is authoritative.
    pub async fn save(&mut self) -> BatchResult<()> {
        if self.path.exists() {
            let on_disk = Self::read_doc(&self.path);
            if on_disk.version != self.loaded_version {
                return Err(BatchError::RegistryConflict {
                    loaded: self.loaded_version,
                    found: on_disk.version,
                });
            }
        }

        self.doc.version = self.loaded_version + 1;
        persist::write_json_atomic(&self.path, &self.doc)?;
        self.loaded_version = self.doc.version;

        if let Some(sync) = &self.mirror {
            if let Err(e) = sync.upload_file(&self.path, REGISTRY_FILE).await {
                warn!("Registry mirror upload failed: {}", e);
            }
        }
        Ok(())
    }

    /// Drop in-memory state and re-read the local file.
    pub fn reload(&mut self) {
        self.doc = Self::read_doc(&self.path);
        self.loaded_version = self.doc.version;
    }
}
