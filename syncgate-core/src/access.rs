use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// Raw failure shape of the coordinated-access primitive. Classified into the
/// stable taxonomy exactly once, where it first crosses into the engine.
#[derive(Debug, Error, Clone, PartialEq, Serialize)]
pub enum AccessError {
    #[error("no such item: {0}")]
    NotFound(String),
    #[error("container unavailable: {0}")]
    Unavailable(String),
    #[error("{operation} failed: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },
}

/// The coordinated file-access primitive. Implemented outside the engine; the
/// engine only relies on the contract below.
#[async_trait]
pub trait CoordinatedAccess: Send + Sync {
    /// Open the item at `path`, arbitrated against concurrent writers. A
    /// successful open is the authoritative signal that the item is locally
    /// accessible in the given mode; index metadata never is. May block for
    /// arbitrary durations while arbitration is in progress.
    async fn open(&self, path: &str, mode: AccessMode) -> Result<(), AccessError>;

    /// Hint the backend to begin materializing a remote-only item. Completion
    /// is observed through the metadata index, not through this call.
    async fn request_fetch(&self, path: &str) -> Result<(), AccessError>;

    /// Coordinated write of a local file into the container at `dest`.
    async fn store(&self, source: &Path, dest: &str) -> Result<(), AccessError>;

    async fn remove_item(&self, path: &str) -> Result<(), AccessError>;

    async fn move_item(&self, from: &str, to: &str) -> Result<(), AccessError>;

    async fn copy_item(&self, from: &str, to: &str) -> Result<(), AccessError>;
}
