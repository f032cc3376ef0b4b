use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::registry::TaskRegistry;
use super::JobEvent;
use crate::artifact::ArtifactStore;
use crate::config::{ProvidersConfig, QueueConfig};
use crate::job::{Job, JobId, JobStatus, TabId};
use crate::lease::LeaderElection;
use crate::pending_uploads::PendingUploads;
use crate::provider::ProviderSet;
use crate::state_db::StateDb;
use crate::store::JobStore;
use crate::sync::{SyncHub, SyncMessage};

/// Everything a scheduler instance needs from the outside.
pub struct SchedulerParts {
    pub db: StateDb,
    pub hub: SyncHub,
    pub settings: QueueConfig,
    pub providers_config: ProvidersConfig,
    pub providers: ProviderSet,
    pub artifacts: Arc<dyn ArtifactStore>,
}

#[derive(Default)]
pub(super) struct QueueState {
    pub(super) jobs: Vec<Job>,
    /// Jobs this instance removed; never re-absorbed from a stale store copy.
    pub(super) removed: HashSet<JobId>,
}

pub struct SchedulerContext {
    pub(super) tab_id: TabId,
    pub(super) settings: QueueConfig,
    pub(super) providers_config: ProvidersConfig,
    pub(super) store: JobStore,
    pub(super) election: LeaderElection,
    pub(super) hub: SyncHub,
    pub(super) providers: ProviderSet,
    pub(super) artifacts: Arc<dyn ArtifactStore>,
    pub(super) pending: PendingUploads,
    state: Mutex<QueueState>,
    leadership: watch::Sender<bool>,
    // Pending-upload sweep started on gaining leadership.
    sweep: Mutex<Option<JoinHandle<()>>>,
    dirty: AtomicBool,
    pub(super) tasks: TaskRegistry,
    commit_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<JobEvent>,
}

impl SchedulerContext {
    pub fn new(parts: SchedulerParts) -> Arc<Self> {
        let tab_id = TabId::generate();
        let election = LeaderElection::new(
            parts.db.clone(),
            tab_id.clone(),
            parts.settings.lease_ttl(),
        );
        let (events, _) = broadcast::channel(256);
        let (leadership, _) = watch::channel(false);
        Arc::new(Self {
            tab_id,
            settings: parts.settings,
            providers_config: parts.providers_config,
            store: JobStore::new(parts.db.clone()),
            election,
            hub: parts.hub,
            providers: parts.providers,
            artifacts: parts.artifacts,
            pending: PendingUploads::new(parts.db),
            state: Mutex::new(QueueState::default()),
            leadership,
            sweep: Mutex::new(None),
            dirty: AtomicBool::new(false),
            tasks: TaskRegistry::default(),
            commit_lock: tokio::sync::Mutex::new(()),
            events,
        })
    }

    pub(super) fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn tab_id(&self) -> &TabId {
        &self.tab_id
    }

    pub fn settings(&self) -> &QueueConfig {
        &self.settings
    }

    pub fn is_leader(&self) -> bool {
        *self.leadership.borrow()
    }

    /// Observe leadership changes. The value is the current role.
    pub fn watch_leadership(&self) -> watch::Receiver<bool> {
        self.leadership.subscribe()
    }

    pub(super) fn set_leader(&self, leader: bool) {
        self.leadership.send_if_modified(|current| {
            let changed = *current != leader;
            *current = leader;
            changed
        });
    }

    fn sweep_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.sweep.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn track_sweep(&self, handle: JoinHandle<()>) {
        if let Some(previous) = self.sweep_slot().replace(handle) {
            previous.abort();
        }
    }

    pub(super) fn abort_sweep(&self) {
        if let Some(handle) = self.sweep_slot().take() {
            handle.abort();
        }
    }

    /// Whether the pending-upload sweep started on gaining leadership is still running.
    pub fn pending_sweep_running(&self) -> bool {
        self.sweep_slot().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Current in-memory job list.
    pub fn jobs(&self) -> Vec<Job> {
        self.state().jobs.clone()
    }

    pub fn job(&self, id: &JobId) -> Option<Job> {
        self.state().jobs.iter().find(|j| &j.id == id).cloned()
    }

    pub fn has_live_task(&self, id: &JobId) -> bool {
        self.tasks.contains(id)
    }

    pub fn live_task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn pending_uploads(&self) -> &PendingUploads {
        &self.pending
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    pub(super) fn emit(&self, event: JobEvent) {
        let _ = self.events.send(event);
    }

    /// Whether the last store write failed and must be retried.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Remove a job from the list, remembering it so it is not re-absorbed.
    pub(super) fn take_job(&self, id: &JobId) -> Option<Job> {
        let mut state = self.state();
        let idx = state.jobs.iter().position(|j| &j.id == id)?;
        let job = state.jobs.remove(idx);
        state.removed.insert(id.clone());
        Some(job)
    }

    /// Replace the list wholesale (follower snapshot or leader reload).
    pub(super) fn replace_jobs(&self, jobs: Vec<Job>) {
        self.state().jobs = jobs;
    }

    /// Adopt Queued jobs other instances appended to the store. Returns how many.
    ///
    /// Tombstones for jobs the store no longer holds are dropped: once the
    /// removal is durable there is nothing left to resurrect.
    pub(super) fn absorb(&self, stored: Vec<Job>) -> usize {
        let mut state = self.state();
        if !state.removed.is_empty() {
            let stored_ids: HashSet<&JobId> = stored.iter().map(|j| &j.id).collect();
            state.removed.retain(|id| stored_ids.contains(id));
        }
        let mut absorbed = 0;
        for job in stored {
            if job.status != JobStatus::Queued
                || state.removed.contains(&job.id)
                || state.jobs.iter().any(|j| j.id == job.id)
            {
                continue;
            }
            tracing::debug!(job_id = %job.id, kind = %job.kind(), "absorbed job from store");
            state.jobs.push(job);
            absorbed += 1;
        }
        absorbed
    }

    pub(super) async fn absorb_from_store(&self) -> usize {
        match self.store.load_all().await {
            Ok(stored) => self.absorb(stored),
            Err(e) => {
                tracing::warn!(tab_id = %self.tab_id, "reading job store failed: {:#}", e);
                0
            }
        }
    }

    /// Persist the newest snapshot and broadcast it. Leader only.
    ///
    /// Foreign Queued jobs appended since the last read are absorbed first so
    /// the write does not drop them. A failed write leaves the context dirty;
    /// the in-memory list stays authoritative until the next heartbeat retries.
    pub(super) async fn commit(&self) {
        if !self.is_leader() {
            return;
        }
        let _guard = self.commit_lock.lock().await;
        self.absorb_from_store().await;
        let snapshot = self.jobs();
        match self.store.save_all(&snapshot).await {
            Ok(()) => self.dirty.store(false, Ordering::Release),
            Err(e) => {
                self.dirty.store(true, Ordering::Release);
                tracing::warn!(tab_id = %self.tab_id, "saving job store failed: {:#}", e);
            }
        }
        self.hub
            .publish(&self.tab_id, SyncMessage::JobsUpdate(snapshot));
    }
}
