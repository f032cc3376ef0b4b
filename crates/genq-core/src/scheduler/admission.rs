//! Per-kind capacity accounting and promotion of queued jobs.
//!
//! Only Submitting and Processing jobs hold a slot. Promotion is decided and
//! applied under the job-list lock, so concurrent tasks never overfill a kind.

use std::sync::Arc;

use super::SchedulerContext;
use crate::config::QueueConfig;
use crate::job::{Job, JobId, JobKind, JobStatus};
use crate::state_db::unix_millis;

pub(crate) fn active_count(jobs: &[Job], kind: JobKind) -> usize {
    jobs.iter()
        .filter(|j| j.kind() == kind && j.status.is_active())
        .count()
}

pub(crate) fn has_capacity(jobs: &[Job], kind: JobKind, cfg: &QueueConfig) -> bool {
    active_count(jobs, kind) < cfg.concurrency(kind)
}

/// Indexes of the Queued jobs to promote now: per kind, the oldest ones
/// (by `created_at`, then list order) up to the free capacity.
pub(crate) fn promotion_picks(jobs: &[Job], cfg: &QueueConfig) -> Vec<usize> {
    let mut picks = Vec::new();
    for kind in JobKind::ALL {
        let free = cfg.concurrency(kind).saturating_sub(active_count(jobs, kind));
        if free == 0 {
            continue;
        }
        let mut queued: Vec<usize> = jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| j.kind() == kind && j.status == JobStatus::Queued)
            .map(|(i, _)| i)
            .collect();
        // Stable sort keeps list order among equal timestamps.
        queued.sort_by_key(|&i| jobs[i].created_at);
        picks.extend(queued.into_iter().take(free));
    }
    picks
}

impl SchedulerContext {
    /// Fill every free slot with the oldest Queued jobs and start their tasks.
    /// A job that already has a remote task resumes polling instead of resubmitting.
    pub async fn promote_queued(self: &Arc<Self>) -> usize {
        if !self.is_leader() {
            return 0;
        }
        let promoted: Vec<JobId> = {
            let mut state = self.state();
            let now = unix_millis();
            let picks = promotion_picks(&state.jobs, &self.settings);
            picks
                .into_iter()
                .map(|i| {
                    let job = &mut state.jobs[i];
                    job.status = if job.task_id.is_some() {
                        JobStatus::Processing
                    } else {
                        JobStatus::Submitting
                    };
                    job.touch(now);
                    tracing::debug!(job_id = %job.id, kind = %job.kind(), "promoted");
                    job.id.clone()
                })
                .collect()
        };
        if promoted.is_empty() {
            return 0;
        }
        self.commit().await;
        for id in &promoted {
            self.spawn_driver(id.clone());
        }
        promoted.len()
    }
}
