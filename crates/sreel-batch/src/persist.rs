//! Atomic persistence helpers for descriptors and other state documents.
//!
//! Every on-disk document in the pipeline is written through a temp file
//! and rename so a crash mid-write can never leave a half-serialized file
//! behind for the next process to choke on.

use std::path::Path;

use serde::Serialize;

use sreel_models::{JobDescriptor, JobKind};
use sreel_storage::ProjectLayout;

use crate::error::BatchResult;

/// Write bytes through a sibling temp file and rename into place.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> BatchResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> BatchResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    write_atomic(path, json.as_bytes())
}

/// Persist a descriptor to its per-project info file.
pub fn save_descriptor(layout: &ProjectLayout, descriptor: &JobDescriptor) -> BatchResult<()> {
    write_json_atomic(&layout.descriptor_path(descriptor.kind), descriptor)
}

/// Load the persisted descriptor of `kind`, if one exists.
pub fn load_descriptor(layout: &ProjectLayout, kind: JobKind) -> BatchResult<Option<JobDescriptor>> {
    let path = layout.descriptor_path(kind);
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path)?;
    Ok(Some(serde_json::from_str(&text)?))
}
