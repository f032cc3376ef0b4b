//! Durable job collection shared by every scheduler instance.
//!
//! The whole list lives under one state key as a versioned JSON envelope and
//! is always read and written as a whole. Conflicts between instances are not
//! resolved here: only the leader writes, and followers adopt its snapshots.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::job::Job;
use crate::state_db::StateDb;

/// State key for the job collection.
pub const JOBS_KEY: &str = "jobs-v1";

const FORMAT_VERSION: u32 = 1;

#[derive(Deserialize)]
struct VersionHeader {
    version: u32,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    jobs: Vec<Job>,
}

#[derive(Clone)]
pub struct JobStore {
    db: StateDb,
}

impl JobStore {
    pub fn new(db: StateDb) -> Self {
        Self { db }
    }

    /// Load every persisted job, in stored (enqueue) order.
    ///
    /// A missing key is an empty queue. An envelope written by a different
    /// format version is ignored with a warning rather than failing the caller.
    pub async fn load_all(&self) -> Result<Vec<Job>> {
        let Some(raw) = self.db.get(JOBS_KEY).await.context("read job store")? else {
            return Ok(Vec::new());
        };
        let header: VersionHeader = serde_json::from_str(&raw).context("parse job store")?;
        if header.version != FORMAT_VERSION {
            tracing::warn!(
                version = header.version,
                "job store written by an unknown format version; starting empty"
            );
            return Ok(Vec::new());
        }
        let envelope: Envelope = serde_json::from_str(&raw).context("parse job store")?;
        Ok(envelope.jobs)
    }

    /// Replace the persisted collection with `jobs`.
    pub async fn save_all(&self, jobs: &[Job]) -> Result<()> {
        let envelope = Envelope {
            version: FORMAT_VERSION,
            jobs: jobs.to_vec(),
        };
        let raw = serde_json::to_string(&envelope).context("serialize job store")?;
        self.db.put(JOBS_KEY, &raw).await.context("write job store")
    }

    /// Read-modify-write append, used by instances that are not the leader.
    pub async fn append(&self, job: Job) -> Result<()> {
        let mut jobs = self.load_all().await?;
        jobs.push(job);
        self.save_all(&jobs).await
    }
}
