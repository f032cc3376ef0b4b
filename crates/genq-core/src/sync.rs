//! Publish/subscribe between scheduler instances of one process.
//!
//! Messages are advisory snapshots and notifications, never acknowledged.
//! A receiver that lags simply misses messages; the leader's next periodic
//! snapshot corrects it.

use tokio::sync::broadcast;

use crate::job::{Job, JobId, TabId};

/// User-initiated change forwarded from a follower to the leader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    Retry(JobId),
    Cancel(JobId),
}

#[derive(Debug, Clone)]
pub enum SyncMessage {
    /// Full job list from the leader; followers replace theirs wholesale.
    JobsUpdate(Vec<Job>),
    /// A follower appended this job to the durable store.
    Enqueued(JobId),
    Action(UserAction),
}

#[derive(Debug, Clone)]
pub struct SyncEnvelope {
    pub origin: TabId,
    pub message: SyncMessage,
}

/// Shared channel handle. Clone it into every instance that should see the others.
#[derive(Clone)]
pub struct SyncHub {
    tx: broadcast::Sender<SyncEnvelope>,
}

impl Default for SyncHub {
    fn default() -> Self {
        Self::new(64)
    }
}

impl SyncHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to every subscriber. Having no subscribers is not an error.
    pub fn publish(&self, origin: &TabId, message: SyncMessage) {
        let _ = self.tx.send(SyncEnvelope {
            origin: origin.clone(),
            message,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEnvelope> {
        self.tx.subscribe()
    }
}
