//! Enqueue and the user actions on timed-out jobs.

use anyhow::{Context, Result};
use std::sync::Arc;

use super::admission::has_capacity;
use super::{ActionError, EnqueueOptions, SchedulerContext};
use crate::control::ControlCommand;
use crate::job::{ImageParams, Job, JobId, JobPayload, JobStatus, VideoParams};
use crate::state_db::unix_millis;
use crate::sync::{SyncMessage, UserAction};

impl SchedulerContext {
    pub async fn enqueue_image(
        self: &Arc<Self>,
        params: ImageParams,
        opts: EnqueueOptions,
    ) -> Result<JobId> {
        self.enqueue(JobPayload::image(params), opts).await
    }

    pub async fn enqueue_video(
        self: &Arc<Self>,
        params: VideoParams,
        opts: EnqueueOptions,
    ) -> Result<JobId> {
        self.enqueue(JobPayload::video(params), opts).await
    }

    /// Add a Queued job. The leader admits it right away; a follower appends
    /// it to the store and notifies the leader.
    async fn enqueue(self: &Arc<Self>, payload: JobPayload, opts: EnqueueOptions) -> Result<JobId> {
        let provider_id = opts
            .provider_id
            .or_else(|| self.providers_config.selected.clone());
        let timeout_ms = self.settings.timeout().as_millis() as i64;
        let job = Job::new(payload, provider_id, unix_millis(), timeout_ms);
        let id = job.id.clone();
        tracing::info!(job_id = %id, kind = %job.kind(), tab_id = %self.tab_id, "enqueued");

        if self.is_leader() {
            self.state().jobs.push(job);
            self.commit().await;
            self.promote_queued().await;
        } else {
            self.store
                .append(job.clone())
                .await
                .context("append job to store")?;
            self.state().jobs.push(job);
            self.hub
                .publish(&self.tab_id, SyncMessage::Enqueued(id.clone()));
        }
        Ok(id)
    }

    fn check_timed_out(&self, id: &JobId) -> Result<(), ActionError> {
        match self.job(id) {
            None => Err(ActionError::NotFound(id.clone())),
            Some(job) if job.status != JobStatus::Timeout => {
                Err(ActionError::NotTimedOut(id.clone()))
            }
            Some(_) => Ok(()),
        }
    }

    /// Give a timed-out job a fresh time budget and run it again: polling if
    /// it has a remote task, resubmitting if not, or back to Queued when its
    /// kind is at capacity. Followers forward the request to the leader.
    pub async fn retry(self: &Arc<Self>, id: &JobId) -> Result<(), ActionError> {
        if !self.is_leader() {
            self.check_timed_out(id)?;
            self.hub
                .publish(&self.tab_id, SyncMessage::Action(UserAction::Retry(id.clone())));
            return Ok(());
        }

        let start = {
            let mut state = self.state();
            let jobs = &state.jobs;
            let Some(idx) = jobs.iter().position(|j| &j.id == id) else {
                return Err(ActionError::NotFound(id.clone()));
            };
            if jobs[idx].status != JobStatus::Timeout {
                return Err(ActionError::NotTimedOut(id.clone()));
            }
            let capacity = has_capacity(jobs, jobs[idx].kind(), &self.settings);
            let now = unix_millis();
            let job = &mut state.jobs[idx];
            job.timeout_at = now.saturating_add(self.settings.timeout().as_millis() as i64);
            job.status = match (capacity, job.task_id.is_some()) {
                (false, _) => JobStatus::Queued,
                (true, true) => JobStatus::Processing,
                (true, false) => JobStatus::Submitting,
            };
            job.error = None;
            job.touch(now);
            tracing::info!(job_id = %id, status = %job.status, "retrying timed-out job");
            capacity
        };
        self.commit().await;
        if start {
            self.spawn_driver(id.clone());
        }
        Ok(())
    }

    /// Remove a timed-out job for good. Followers forward the request.
    pub async fn cancel(self: &Arc<Self>, id: &JobId) -> Result<(), ActionError> {
        if !self.is_leader() {
            self.check_timed_out(id)?;
            self.hub
                .publish(&self.tab_id, SyncMessage::Action(UserAction::Cancel(id.clone())));
            return Ok(());
        }
        {
            let mut state = self.state();
            let Some(idx) = state.jobs.iter().position(|j| &j.id == id) else {
                return Err(ActionError::NotFound(id.clone()));
            };
            if state.jobs[idx].status != JobStatus::Timeout {
                return Err(ActionError::NotTimedOut(id.clone()));
            }
            state.jobs.remove(idx);
            state.removed.insert(id.clone());
        }
        self.tasks.abort(id);
        tracing::info!(job_id = %id, "cancelled timed-out job");
        self.commit().await;
        Ok(())
    }

    pub async fn apply_action(self: &Arc<Self>, action: UserAction) -> Result<(), ActionError> {
        match action {
            UserAction::Retry(id) => self.retry(&id).await,
            UserAction::Cancel(id) => self.cancel(&id).await,
        }
    }

    /// Handle a control-socket command. Only the leader accepts commands;
    /// a follower has no socket client to forward them for.
    pub async fn apply_command(self: &Arc<Self>, command: ControlCommand) -> Result<(), ActionError> {
        if !self.is_leader() {
            return Err(ActionError::NotLeader);
        }
        match command {
            ControlCommand::Action(action) => self.apply_action(action).await,
            ControlCommand::Wake => {
                if self.absorb_from_store().await > 0 {
                    self.commit().await;
                }
                self.promote_queued().await;
                Ok(())
            }
        }
    }
}
