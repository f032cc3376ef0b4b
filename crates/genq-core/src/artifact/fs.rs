//! Artifact store on the local filesystem.
//!
//! Keys are relative paths under a root directory: `images/<hash>.<ext>` and
//! `videos/<task id>.mp4`. Downloads land in `<key>.part` and are renamed into
//! place once complete, so a key that exists is always a whole file.

use async_trait::async_trait;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use url::Url;

use super::{ArtifactItem, ArtifactPage, ArtifactRef, ArtifactStore, PersistError};
use crate::job::JobKind;

const TEMP_SUFFIX: &str = ".part";

#[derive(Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
    client: reqwest::Client,
}

fn short_hash(s: &str) -> String {
    let digest = Sha256::digest(s.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Extension from the URL path, if it looks like one.
fn image_extension(source_url: &str) -> &'static str {
    if let Some(rest) = source_url.strip_prefix("data:") {
        return match rest.split(';').next() {
            Some("image/jpeg") => "jpg",
            Some("image/webp") => "webp",
            Some("image/gif") => "gif",
            _ => "png",
        };
    }
    let ext = Url::parse(source_url)
        .ok()
        .and_then(|u| {
            Path::new(u.path())
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
        })
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "jpg",
        "webp" => "webp",
        "gif" => "gif",
        _ => "png",
    }
}

fn safe_task_id(task_id: &str) -> bool {
    !task_id.is_empty()
        && task_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Deterministic key for a ref; the same ref always maps to the same key.
pub(crate) fn key_for(artifact: &ArtifactRef) -> String {
    match artifact.kind {
        JobKind::Image => format!(
            "images/{}.{}",
            short_hash(&artifact.source_url),
            image_extension(&artifact.source_url)
        ),
        JobKind::Video => match artifact.task_id.as_deref().filter(|t| safe_task_id(t)) {
            Some(task_id) => format!("videos/{task_id}.mp4"),
            None => format!("videos/{}.mp4", short_hash(&artifact.source_url)),
        },
    }
}

/// Reject absolute keys and keys with `..` or other non-normal components.
fn validate_key(key: &str) -> Result<&Path, PersistError> {
    let path = Path::new(key);
    let ok = !key.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(path)
    } else {
        Err(PersistError::InvalidKey(key.to_string()))
    }
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>, client: reqwest::Client) -> Self {
        Self {
            root: root.into(),
            client,
        }
    }

    /// Store under `root` with its own download client.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("genq/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::new(root, client))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn location(path: &Path) -> String {
        Url::from_file_path(path)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| path.display().to_string())
    }

    async fn fetch(&self, source_url: &str) -> Result<Vec<u8>, PersistError> {
        if let Some(rest) = source_url.strip_prefix("data:") {
            let (_, payload) = rest
                .split_once(',')
                .ok_or_else(|| PersistError::UnsupportedSource("malformed data URL".to_string()))?;
            return base64::engine::general_purpose::STANDARD
                .decode(payload.trim())
                .map_err(|e| PersistError::UnsupportedSource(format!("data URL: {e}")));
        }
        let response = self.client.get(source_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PersistError::Status {
                url: source_url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn persist_one(&self, artifact: &ArtifactRef) -> Result<String, PersistError> {
        let key = key_for(artifact);
        let dest = self.root.join(&key);
        if tokio::fs::try_exists(&dest).await? {
            tracing::debug!(key = %key, "artifact already exists");
            return Ok(Self::location(&dest));
        }
        let bytes = self.fetch(&artifact.source_url).await?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut temp = dest.clone().into_os_string();
        temp.push(TEMP_SUFFIX);
        let temp = PathBuf::from(temp);
        tokio::fs::write(&temp, &bytes).await?;
        tokio::fs::rename(&temp, &dest).await?;
        tracing::info!(key = %key, bytes = bytes.len(), "artifact saved");
        Ok(Self::location(&dest))
    }

    /// Every complete key under the root, sorted.
    async fn all_keys(&self) -> Result<Vec<ArtifactItem>, PersistError> {
        let mut items = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                let path = entry.path();
                if meta.is_dir() {
                    stack.push(path);
                    continue;
                }
                let Ok(rel) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = rel
                    .components()
                    .filter_map(|c| c.as_os_str().to_str())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.ends_with(TEMP_SUFFIX) {
                    continue;
                }
                items.push(ArtifactItem {
                    key,
                    size: meta.len(),
                });
            }
        }
        items.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(items)
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn persist(&self, refs: &[ArtifactRef]) -> Result<Vec<String>, PersistError> {
        let mut saved = Vec::with_capacity(refs.len());
        for artifact in refs {
            saved.push(self.persist_one(artifact).await?);
        }
        Ok(saved)
    }

    async fn list(
        &self,
        prefix: &str,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<ArtifactPage, PersistError> {
        let page_size = page_size.max(1);
        let mut matching = self
            .all_keys()
            .await?
            .into_iter()
            .filter(|item| item.key.starts_with(prefix))
            .filter(|item| cursor.map_or(true, |c| item.key.as_str() > c));
        let items: Vec<ArtifactItem> = matching.by_ref().take(page_size).collect();
        let truncated = matching.next().is_some();
        let next_cursor = if truncated {
            items.last().map(|i| i.key.clone())
        } else {
            None
        };
        Ok(ArtifactPage {
            items,
            truncated,
            next_cursor,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), PersistError> {
        let rel = validate_key(key)?;
        match tokio::fs::remove_file(self.root.join(rel)).await {
            Ok(()) => {
                tracing::info!(key = %key, "artifact deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
