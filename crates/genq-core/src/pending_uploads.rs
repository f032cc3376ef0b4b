//! Durable list of artifacts whose persistence has not been confirmed.
//!
//! Refs are added before every persist attempt and removed only after the
//! artifact store confirms them, so results survive a crash mid-save. A sweep
//! retries the leftovers one by one.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::artifact::{ArtifactRef, ArtifactStore};
use crate::state_db::{unix_millis, StateDb};

/// State key for the pending-upload list.
pub const PENDING_KEY: &str = "pending-uploads-v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub artifact: ArtifactRef,
    pub added_at: i64,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub persisted: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct PendingUploads {
    db: StateDb,
    // Serializes read-modify-write cycles within this process.
    lock: Arc<Mutex<()>>,
}

fn same_source(a: &ArtifactRef, b: &ArtifactRef) -> bool {
    a.kind == b.kind && a.source_url == b.source_url
}

impl PendingUploads {
    pub fn new(db: StateDb) -> Self {
        Self {
            db,
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load(&self) -> Result<Vec<PendingEntry>> {
        let Some(raw) = self.db.get(PENDING_KEY).await.context("read pending uploads")? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                tracing::warn!("discarding unreadable pending-upload list: {}", e);
                Ok(Vec::new())
            }
        }
    }

    async fn store(&self, entries: &[PendingEntry]) -> Result<()> {
        if entries.is_empty() {
            self.db.remove(PENDING_KEY).await.context("clear pending uploads")?;
            return Ok(());
        }
        let raw = serde_json::to_string(entries).context("serialize pending uploads")?;
        self.db.put(PENDING_KEY, &raw).await.context("write pending uploads")
    }

    pub async fn list(&self) -> Result<Vec<PendingEntry>> {
        self.load().await
    }

    /// Record refs about to be persisted. Refs already pending are kept once.
    pub async fn add(&self, refs: &[ArtifactRef]) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        let now = unix_millis();
        for r in refs {
            if !entries.iter().any(|e| same_source(&e.artifact, r)) {
                entries.push(PendingEntry {
                    artifact: r.clone(),
                    added_at: now,
                });
            }
        }
        self.store(&entries).await
    }

    /// Forget refs whose persistence was confirmed.
    pub async fn remove(&self, refs: &[ArtifactRef]) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        let before = entries.len();
        entries.retain(|e| !refs.iter().any(|r| same_source(&e.artifact, r)));
        if entries.len() == before {
            return Ok(());
        }
        self.store(&entries).await
    }

    /// Persist every pending entry in turn. Entries that fail stay for the next sweep.
    pub async fn process(&self, artifacts: &dyn ArtifactStore) -> Result<SweepReport> {
        let entries = self.list().await?;
        let mut report = SweepReport::default();
        for entry in entries {
            let refs = std::slice::from_ref(&entry.artifact);
            match artifacts.persist(refs).await {
                Ok(_) => {
                    self.remove(refs).await?;
                    report.persisted += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        source_url = %entry.artifact.source_url,
                        "pending upload still failing: {}",
                        e
                    );
                    report.failed += 1;
                }
            }
        }
        if report.persisted > 0 || report.failed > 0 {
            tracing::info!(
                persisted = report.persisted,
                failed = report.failed,
                "pending upload sweep finished"
            );
        }
        Ok(report)
    }
}
