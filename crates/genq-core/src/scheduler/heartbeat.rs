//! Leadership heartbeat, sync listener and the instance run loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, MissedTickBehavior};

use super::{JobEvent, SchedulerContext, TIMED_OUT};
use crate::job::JobStatus;
use crate::state_db::unix_millis;
use crate::sync::{SyncEnvelope, SyncMessage};

/// Upper bound for the pending-upload flush on shutdown.
const SHUTDOWN_FLUSH: Duration = Duration::from_secs(3);

impl SchedulerContext {
    /// Initial election. A leader loads the store and resumes work; a follower
    /// mirrors the store.
    pub async fn start(self: &Arc<Self>) {
        let leader = match self.election.acquire_or_observe().await {
            Ok(leader) => leader,
            Err(e) => {
                tracing::warn!(tab_id = %self.tab_id, "lease check failed: {:#}", e);
                false
            }
        };
        self.set_leader(leader);
        if leader {
            self.become_leader().await;
        } else {
            tracing::info!(tab_id = %self.tab_id, "following");
            self.follower_refresh().await;
        }
    }

    /// One heartbeat: renew or contest the lease, then do this role's upkeep.
    pub async fn tick(self: &Arc<Self>) {
        let was_leader = self.is_leader();
        let leader = match self.election.heartbeat(was_leader).await {
            Ok(leader) => leader,
            Err(e) => {
                tracing::warn!(tab_id = %self.tab_id, "lease heartbeat failed: {:#}", e);
                was_leader
            }
        };
        self.set_leader(leader);
        match (was_leader, leader) {
            (false, true) => self.become_leader().await,
            (true, false) => self.step_down(),
            (true, true) => self.leader_tick().await,
            (false, false) => self.follower_refresh().await,
        }
    }

    async fn become_leader(self: &Arc<Self>) {
        tracing::info!(tab_id = %self.tab_id, "leading");
        match self.store.load_all().await {
            Ok(jobs) => self.replace_jobs(jobs),
            Err(e) => tracing::warn!(
                tab_id = %self.tab_id,
                "loading job store failed, keeping in-memory list: {:#}",
                e
            ),
        }
        self.resume_active().await;
        self.promote_queued().await;
        self.commit().await;

        let ctx = Arc::clone(self);
        self.track_sweep(tokio::spawn(async move {
            if let Err(e) = ctx.pending.process(ctx.artifacts.as_ref()).await {
                tracing::warn!("pending upload sweep failed: {:#}", e);
            }
        }));
    }

    fn step_down(&self) {
        self.abort_sweep();
        let aborted = self.tasks.abort_all();
        tracing::info!(tab_id = %self.tab_id, aborted, "stepped down");
    }

    async fn leader_tick(self: &Arc<Self>) {
        if self.is_dirty() {
            self.commit().await;
        }
        self.absorb_from_store().await;
        self.sweep_timeouts().await;
        self.promote_queued().await;
        self.resume_active().await;
        self.commit().await;
    }

    /// Move Processing jobs past their deadline to Timeout, including jobs
    /// whose driver is not running.
    async fn sweep_timeouts(self: &Arc<Self>) {
        let now = unix_millis();
        let expired: Vec<_> = {
            let mut state = self.state();
            state
                .jobs
                .iter_mut()
                .filter(|j| j.status == JobStatus::Processing && j.is_timed_out(now))
                .map(|job| {
                    job.status = JobStatus::Timeout;
                    job.error = Some(TIMED_OUT.to_string());
                    job.touch(now);
                    job.id.clone()
                })
                .collect()
        };
        for id in expired {
            self.tasks.abort(&id);
            tracing::warn!(job_id = %id, "job timed out");
            self.emit(JobEvent::TimedOut(id));
        }
    }

    /// Mirror the durable store. Covers leaders in other processes, which
    /// this instance cannot hear on the in-process hub.
    pub(super) async fn follower_refresh(&self) {
        match self.store.load_all().await {
            Ok(jobs) => self.replace_jobs(jobs),
            Err(e) => tracing::debug!(tab_id = %self.tab_id, "refresh from store failed: {:#}", e),
        }
    }

    /// React to a message from another instance on the hub.
    pub async fn handle_sync(self: &Arc<Self>, envelope: SyncEnvelope) {
        if envelope.origin == self.tab_id {
            return;
        }
        match envelope.message {
            SyncMessage::JobsUpdate(jobs) => {
                if !self.is_leader() {
                    self.replace_jobs(jobs);
                }
            }
            SyncMessage::Enqueued(id) => {
                if self.is_leader() {
                    tracing::debug!(job_id = %id, origin = %envelope.origin, "enqueue notice");
                    if self.absorb_from_store().await > 0 {
                        self.commit().await;
                    }
                    self.promote_queued().await;
                }
            }
            SyncMessage::Action(action) => {
                if self.is_leader() {
                    if let Err(e) = self.apply_action(action).await {
                        tracing::warn!(origin = %envelope.origin, "forwarded action rejected: {}", e);
                    }
                }
            }
        }
    }

    /// Stop this instance: abort drivers, flush the list, hand the lease
    /// back and give pending uploads one bounded last attempt.
    pub async fn shutdown(self: &Arc<Self>) {
        self.abort_sweep();
        let aborted = self.tasks.abort_all();
        if self.is_leader() {
            self.commit().await;
            match self.election.release().await {
                Ok(released) => tracing::info!(tab_id = %self.tab_id, released, aborted, "shut down"),
                Err(e) => tracing::warn!("releasing lease failed: {:#}", e),
            }
            self.set_leader(false);
        }
        match tokio::time::timeout(SHUTDOWN_FLUSH, self.pending.process(self.artifacts.as_ref()))
            .await
        {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!("pending upload flush failed: {:#}", e),
            Err(_) => tracing::warn!("pending upload flush timed out"),
        }
    }
}

/// Run an instance until `shutdown_signal` resolves: heartbeat loop plus
/// the hub listener. Shuts the context down before returning.
pub async fn run<F>(ctx: Arc<SchedulerContext>, shutdown_signal: F)
where
    F: Future<Output = ()>,
{
    let mut sync_rx = ctx.hub.subscribe();
    ctx.start().await;

    let mut heartbeat = interval(ctx.settings.heartbeat());
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;

    tokio::pin!(shutdown_signal);
    loop {
        tokio::select! {
            _ = &mut shutdown_signal => break,
            _ = heartbeat.tick() => ctx.tick().await,
            msg = sync_rx.recv() => match msg {
                Ok(envelope) => ctx.handle_sync(envelope).await,
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "sync listener lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    ctx.shutdown().await;
}
