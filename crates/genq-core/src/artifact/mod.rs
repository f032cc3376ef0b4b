//! Artifact persistence seam: copy remote generation results into durable
//! storage and browse what was saved.

mod fs;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::JobKind;

pub use fs::FsArtifactStore;

/// A remote result waiting to be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub kind: JobKind,
    pub source_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl ArtifactRef {
    pub fn new(kind: JobKind, source_url: impl Into<String>, task_id: Option<String>) -> Self {
        Self {
            kind,
            source_url: source_url.into(),
            task_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactItem {
    pub key: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactPage {
    pub items: Vec<ArtifactItem>,
    /// More keys follow `next_cursor`.
    pub truncated: bool,
    pub next_cursor: Option<String>,
}

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("download failed: {0}")]
    Download(#[from] reqwest::Error),
    #[error("source {url} answered HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("unsupported source: {0}")]
    UnsupportedSource(String),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("storage I/O: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist every ref and return the durable locations, in order.
    /// Persisting the same ref twice returns the same location.
    async fn persist(&self, refs: &[ArtifactRef]) -> Result<Vec<String>, PersistError>;

    async fn list(
        &self,
        prefix: &str,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<ArtifactPage, PersistError>;

    async fn delete(&self, key: &str) -> Result<(), PersistError>;
}
