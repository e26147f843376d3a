//! Script intake and the active-project marker.
//!
//! Scripts are plain text files under `input/`, one scene per non-empty
//! line. The project name is the file stem. Remote intake lives under
//! `scripts/` in the archive and is pulled down before selection.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use sreel_batch::write_json_atomic;
use sreel_models::ProjectName;
use sreel_storage::{ArchiveSync, WorkspacePaths};

use crate::error::{PipelineError, PipelineResult};

/// Marker describing which project a run is working on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveProject {
    pub project: String,
    pub script_path: PathBuf,
    pub started_at: DateTime<Utc>,
}

/// Download remote intake scripts that are absent locally. Returns how many
/// were fetched. Archive trouble is reported, not fatal; the run continues
/// with whatever is already on disk.
pub async fn sync_remote_scripts(paths: &WorkspacePaths, sync: &ArchiveSync) -> u32 {
    let names = match sync.list_scripts().await {
        Ok(names) => names,
        Err(e) => {
            warn!("Could not list remote scripts: {}", e);
            return 0;
        }
    };

    let input_dir = paths.input_dir();
    let mut fetched = 0;
    for name in names {
        let dest = input_dir.join(&name);
        if dest.exists() {
            continue;
        }
        match sync.download_script(&name, &dest).await {
            Ok(()) => {
                info!("Fetched remote script {}", name);
                fetched += 1;
            }
            Err(e) => warn!("Could not fetch remote script {}: {}", name, e),
        }
    }
    fetched
}

/// List local script files, sorted by name.
pub fn list_local_scripts(paths: &WorkspacePaths) -> PipelineResult<Vec<PathBuf>> {
    let input_dir = paths.input_dir();
    if !input_dir.exists() {
        return Ok(Vec::new());
    }

    let mut scripts = Vec::new();
    for entry in std::fs::read_dir(&input_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("txt") {
            scripts.push(path);
        }
    }
    scripts.sort();
    Ok(scripts)
}

/// Read a script and derive its project name from the file stem.
pub fn load_script(path: &Path) -> PipelineResult<(ProjectName, String)> {
    let project = ProjectName::from_script_path(path)?;
    let content = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::script_error(format!("cannot read script {}: {}", path.display(), e))
    })?;
    if content.trim().is_empty() {
        return Err(PipelineError::script_error(format!(
            "script {} is empty",
            path.display()
        )));
    }
    Ok((project, content))
}

/// Split a script into scene lines (non-empty, trimmed, in order).
pub fn scene_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Write the `_active_project.json` marker.
pub fn mark_active(
    paths: &WorkspacePaths,
    project: &ProjectName,
    script_path: &Path,
) -> PipelineResult<()> {
    let marker = ActiveProject {
        project: project.as_str().to_string(),
        script_path: script_path.to_path_buf(),
        started_at: Utc::now(),
    };
    write_json_atomic(&paths.active_project_path(), &marker)?;
    Ok(())
}

/// Read the marker back, if present.
pub fn read_active(paths: &WorkspacePaths) -> PipelineResult<Option<ActiveProject>> {
    let path = paths.active_project_path();
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path)?;
    Ok(Some(serde_json::from_str(&text)?))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sreel_storage::{MemoryStore, ObjectStore};

    use super::*;

    #[test]
    fn test_scene_lines_skip_blanks() {
        let content = "A quiet harbor at dawn.\n\n  Fishermen load the boats.  \n\nThe fleet departs.\n";
        let lines = scene_lines(content);
        assert_eq!(
            lines,
            vec![
                "A quiet harbor at dawn.",
                "Fishermen load the boats.",
                "The fleet departs."
            ]
        );
    }

    #[test]
    fn test_load_script_derives_project_from_stem() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("harbor_story.txt");
        std::fs::write(&path, "Scene one.\n").expect("write");

        let (project, content) = load_script(&path).expect("load");
        assert_eq!(project.as_str(), "harbor_story");
        assert_eq!(content, "Scene one.\n");
    }

    #[test]
    fn test_load_script_rejects_empty_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, "   \n").expect("write");
        assert!(load_script(&path).is_err());
    }

    #[test]
    fn test_list_local_scripts_filters_and_sorts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = WorkspacePaths::new(dir.path());
        std::fs::create_dir_all(paths.input_dir()).expect("mkdir");
        std::fs::write(paths.input_dir().join("b.txt"), "x").expect("write");
        std::fs::write(paths.input_dir().join("a.txt"), "x").expect("write");
        std::fs::write(paths.input_dir().join("notes.md"), "x").expect("write");

        let scripts = list_local_scripts(&paths).expect("list");
        let names: Vec<_> = scripts
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn test_sync_remote_scripts_downloads_missing_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = WorkspacePaths::new(dir.path());
        std::fs::create_dir_all(paths.input_dir()).expect("mkdir");
        std::fs::write(paths.input_dir().join("present.txt"), "local copy").expect("write");

        let store = Arc::new(MemoryStore::new());
        let sync = ArchiveSync::new(store.clone());
        store
            .put("scripts/present.txt", b"remote copy".to_vec(), "text/plain")
            .await
            .expect("put");
        store
            .put("scripts/fresh.txt", b"new script".to_vec(), "text/plain")
            .await
            .expect("put");

        let fetched = sync_remote_scripts(&paths, &sync).await;
        assert_eq!(fetched, 1);
        let local = std::fs::read_to_string(paths.input_dir().join("present.txt")).expect("read");
        assert_eq!(local, "local copy");
        let fresh = std::fs::read_to_string(paths.input_dir().join("fresh.txt")).expect("read");
        assert_eq!(fresh, "new script");
    }

    #[test]
    fn test_active_marker_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = WorkspacePaths::new(dir.path());
        let project = ProjectName::new("harbor_story").expect("valid");

        mark_active(&paths, &project, Path::new("input/harbor_story.txt")).expect("mark");
        let marker = read_active(&paths).expect("read").expect("present");
        assert_eq!(marker.project, "harbor_story");
        assert_eq!(marker.script_path, PathBuf::from("input/harbor_story.txt"));
    }
}
