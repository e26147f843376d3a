//! Archive storage for the StoryReel pipeline.
//!
//! This crate provides:
//! - The `ObjectStore` trait over the durable remote archive
//! - An S3-compatible `ArchiveClient` implementation
//! - Local/remote project layout conventions
//! - Dual-tier checkpoint resolution (local first, then remote)
//! - File synchronization helpers (mirroring, bundle upload, script intake)

pub mod checkpoint;
pub mod client;
pub mod error;
pub mod layout;
pub mod object_store;
pub mod sync;

pub use checkpoint::CheckpointStore;
pub use client::{ArchiveClient, ArchiveConfig};
pub use error::{StorageError, StorageResult};
pub use layout::{ProjectLayout, WorkspacePaths, ACTIVE_PROJECT_FILE, REGISTRY_FILE, SCRIPTS_PREFIX};
pub use object_store::{MemoryStore, ObjectInfo, ObjectStore};
pub use sync::{content_type_for, ArchiveSync};
