//! Per-job driver task: submit if needed, poll on a fixed interval, save.

use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};

use super::{JobEvent, PollStep, SchedulerContext, TIMED_OUT};
use crate::artifact::ArtifactRef;
use crate::job::{JobId, JobKind, JobStatus};
use crate::provider::TaskState;
use crate::state_db::unix_millis;

impl SchedulerContext {
    /// Start the driver for `id` unless one is already live in this instance.
    pub(super) fn spawn_driver(self: &Arc<Self>, id: JobId) -> bool {
        let Some(generation) = self.tasks.try_claim(&id) else {
            return false;
        };
        let ctx = Arc::clone(self);
        let job_id = id.clone();
        let task = tokio::spawn(async move {
            ctx.drive(&job_id).await;
            ctx.tasks.release(&job_id, generation);
        });
        self.tasks.attach(&id, generation, task.abort_handle());
        true
    }

    async fn drive(self: &Arc<Self>, id: &JobId) {
        let needs_submit = self
            .job(id)
            .is_some_and(|j| j.status == JobStatus::Submitting && j.task_id.is_none());
        if needs_submit && !self.submit_job(id).await {
            return;
        }

        let mut ticker = interval(self.settings.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; polling starts one interval later.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if self.poll_job_once(id).await == PollStep::Stop {
                break;
            }
        }
    }

    /// Remove a job that cannot continue, tell observers and free its slot.
    async fn drop_job(self: &Arc<Self>, id: &JobId, kind: JobKind, reason: String) {
        if self.take_job(id).is_none() {
            return;
        }
        tracing::warn!(job_id = %id, kind = %kind, "job dropped: {}", reason);
        self.commit().await;
        self.emit(JobEvent::Dropped {
            id: id.clone(),
            kind,
            reason,
        });
        self.promote_queued().await;
    }

    /// Create the remote task. Returns false when the job was dropped.
    async fn submit_job(self: &Arc<Self>, id: &JobId) -> bool {
        let Some(job) = self.job(id) else {
            return false;
        };
        let kind = job.kind();
        let Some(endpoint) = self.providers_config.resolve(job.provider_id.as_deref()) else {
            self.drop_job(id, kind, "no provider credentials configured".to_string())
                .await;
            return false;
        };

        tracing::info!(job_id = %id, kind = %kind, "submitting");
        let submitted = match self
            .providers
            .for_kind(kind)
            .submit(&endpoint, &job.payload)
            .await
        {
            Ok(s) => s,
            Err(e) => {
                self.drop_job(id, kind, format!("submission failed: {e}")).await;
                return false;
            }
        };

        let accepted = {
            let mut state = self.state();
            match state.jobs.iter_mut().find(|j| &j.id == id) {
                Some(job) if job.status == JobStatus::Submitting => {
                    job.task_id = Some(submitted.task_id.clone());
                    job.status = JobStatus::Processing;
                    job.record_progress(i64::from(self.settings.submit_progress_floor));
                    if let Some(p) = submitted.progress {
                        job.record_progress(p);
                    }
                    job.touch(unix_millis());
                    true
                }
                _ => false,
            }
        };
        if !accepted {
            tracing::debug!(job_id = %id, "job changed during submission; not tracking task");
            return false;
        }
        tracing::info!(job_id = %id, kind = %kind, task_id = %submitted.task_id, "submitted");
        self.commit().await;
        true
    }

    /// One poll tick for a Processing job (or a Saving job being re-polled
    /// after a leadership change).
    ///
    /// Past its deadline a Processing job moves to Timeout without polling.
    /// Transport errors are ignored until the next tick.
    pub async fn poll_job_once(self: &Arc<Self>, id: &JobId) -> PollStep {
        let now = unix_millis();
        let next = {
            let mut state = self.state();
            let Some(job) = state.jobs.iter_mut().find(|j| &j.id == id) else {
                return PollStep::Stop;
            };
            if !matches!(job.status, JobStatus::Processing | JobStatus::Saving) {
                return PollStep::Stop;
            }
            let Some(task_id) = job.task_id.clone() else {
                return PollStep::Stop;
            };
            if job.status == JobStatus::Processing && job.is_timed_out(now) {
                job.status = JobStatus::Timeout;
                job.error = Some(TIMED_OUT.to_string());
                job.touch(now);
                None
            } else {
                Some((job.kind(), task_id, job.provider_id.clone()))
            }
        };

        let Some((kind, task_id, provider_id)) = next else {
            tracing::warn!(job_id = %id, "job timed out");
            self.commit().await;
            self.emit(JobEvent::TimedOut(id.clone()));
            self.promote_queued().await;
            return PollStep::Stop;
        };

        let Some(endpoint) = self.providers_config.resolve(provider_id.as_deref()) else {
            tracing::debug!(job_id = %id, "no provider credentials; skipping poll");
            return PollStep::Continue;
        };
        let report = match self.providers.for_kind(kind).poll(&endpoint, &task_id).await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(job_id = %id, task_id = %task_id, "poll failed: {}", e);
                return PollStep::Continue;
            }
        };

        match report.state {
            TaskState::Pending => {
                let changed = {
                    let mut state = self.state();
                    match state.jobs.iter_mut().find(|j| &j.id == id) {
                        Some(job) if job.status == JobStatus::Processing => {
                            let before = job.progress;
                            if let Some(p) = report.progress {
                                job.record_progress(p);
                            }
                            job.touch(unix_millis());
                            job.progress != before
                        }
                        Some(job) if job.status == JobStatus::Saving => false,
                        _ => return PollStep::Stop,
                    }
                };
                if changed {
                    self.commit().await;
                }
                PollStep::Continue
            }
            TaskState::Failure => {
                let still_tracked = self
                    .job(id)
                    .is_some_and(|j| matches!(j.status, JobStatus::Processing | JobStatus::Saving));
                if still_tracked {
                    let reason = report
                        .message
                        .unwrap_or_else(|| "generation failed".to_string());
                    self.drop_job(id, kind, reason).await;
                }
                PollStep::Stop
            }
            TaskState::Success => {
                let saving = {
                    let mut state = self.state();
                    match state.jobs.iter_mut().find(|j| &j.id == id) {
                        Some(job)
                            if matches!(job.status, JobStatus::Processing | JobStatus::Saving) =>
                        {
                            job.status = JobStatus::Saving;
                            if let Some(p) = report.progress {
                                job.record_progress(p);
                            }
                            job.touch(unix_millis());
                            true
                        }
                        _ => false,
                    }
                };
                if saving {
                    self.commit().await;
                    self.save_results(id, kind, &task_id, report.result_refs)
                        .await;
                }
                PollStep::Stop
            }
        }
    }

    /// Persist the results and complete the job. The job reaches Success even
    /// when persisting fails; the refs then stay in the pending-upload list
    /// and the completed job carries the failure in `error`.
    async fn save_results(
        self: &Arc<Self>,
        id: &JobId,
        kind: JobKind,
        task_id: &str,
        refs: Vec<String>,
    ) {
        let artifacts: Vec<ArtifactRef> = refs
            .iter()
            .map(|url| ArtifactRef::new(kind, url.clone(), Some(task_id.to_string())))
            .collect();
        if let Err(e) = self.pending.add(&artifacts).await {
            tracing::warn!(job_id = %id, "recording pending uploads failed: {:#}", e);
        }
        let mut persist_error = None;
        let results = match self.artifacts.persist(&artifacts).await {
            Ok(saved) => {
                if let Err(e) = self.pending.remove(&artifacts).await {
                    tracing::warn!(job_id = %id, "clearing pending uploads failed: {:#}", e);
                }
                saved
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %id,
                    task_id = %task_id,
                    "persisting artifacts failed, kept for retry: {}",
                    e
                );
                persist_error = Some(format!("artifacts not persisted: {e}"));
                refs
            }
        };

        let Some(mut job) = self.take_job(id) else {
            return;
        };
        job.status = JobStatus::Success;
        job.progress = 100;
        job.payload.set_results(results);
        job.error = persist_error;
        job.touch(unix_millis());
        tracing::info!(job_id = %id, kind = %kind, task_id = %task_id, "job completed");
        self.commit().await;
        self.emit(JobEvent::Completed(job));
        self.promote_queued().await;
    }

    /// Start a driver for every in-flight job that has none in this instance.
    ///
    /// Submitting jobs (and Processing jobs that lost their task id) are
    /// resubmitted; jobs with a task id resume polling. Safe to call on every
    /// heartbeat.
    pub async fn resume_active(self: &Arc<Self>) -> usize {
        if !self.is_leader() {
            return 0;
        }
        let (candidates, repaired) = {
            let mut state = self.state();
            let mut repaired = false;
            let mut candidates = Vec::new();
            for job in state.jobs.iter_mut() {
                if !matches!(
                    job.status,
                    JobStatus::Submitting | JobStatus::Processing | JobStatus::Saving
                ) || self.tasks.contains(&job.id)
                {
                    continue;
                }
                if job.task_id.is_none() && job.status != JobStatus::Submitting {
                    job.status = JobStatus::Submitting;
                    repaired = true;
                }
                candidates.push(job.id.clone());
            }
            (candidates, repaired)
        };
        if repaired {
            self.commit().await;
        }
        let mut started = 0;
        for id in candidates {
            if self.spawn_driver(id.clone()) {
                tracing::debug!(job_id = %id, "resumed job");
                started += 1;
            }
        }
        started
    }
}
