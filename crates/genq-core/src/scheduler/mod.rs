//! Job queue scheduler.
//!
//! One `SchedulerContext` per instance. The leader admits Queued jobs under a
//! per-kind capacity, submits them, polls the remote tasks, persists results
//! and removes finished jobs. Followers mirror the leader's snapshots and
//! forward new jobs and user actions to it.
//!
//! Each active job is driven by one tokio task (submit, poll loop, save),
//! registered in a per-instance registry so a job never has two drivers here.

mod actions;
mod admission;
mod context;
mod driver;
mod heartbeat;
mod registry;

use thiserror::Error;

use crate::job::{Job, JobId, JobKind};

pub use context::{SchedulerContext, SchedulerParts};
pub use heartbeat::run;

/// `Job::error` for a job that ran out of time.
pub const TIMED_OUT: &str = "no result before the deadline";

/// Options for a new job.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Provider for this job; the selected provider when None.
    pub provider_id: Option<String>,
}

/// Result of one poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStep {
    /// Keep polling on the normal interval.
    Continue,
    /// The job left Processing (finished, failed, timed out or vanished).
    Stop,
}

/// Notifications for observers of this instance.
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// The job reached Success and was removed from the queue.
    Completed(Job),
    /// Submission or generation failed; the job was removed.
    Dropped {
        id: JobId,
        kind: JobKind,
        reason: String,
    },
    TimedOut(JobId),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("job {0} has not timed out")]
    NotTimedOut(JobId),
    #[error("this instance is not the leader")]
    NotLeader,
}
