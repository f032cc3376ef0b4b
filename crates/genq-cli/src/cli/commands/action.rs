//! `genq retry <id>` / `genq cancel <id>` – act on a timed-out job.
//!
//! The leading scheduler gets the action over the control socket and answers
//! whether it applied it. With no scheduler alive the store is edited
//! directly; the next leader picks up a retried job on startup.

use anyhow::{bail, Result};
use genq_core::config::GenqConfig;
use genq_core::control::{default_control_socket_path, send_command, ControlCommand, ControlReply};
use genq_core::job::{JobId, JobStatus, TabId};
use genq_core::lease::LeaderElection;
use genq_core::scheduler::ActionError;
use genq_core::state_db::{unix_millis, StateDb};
use genq_core::store::JobStore;
use genq_core::sync::UserAction;

fn target(action: &UserAction) -> &JobId {
    match action {
        UserAction::Retry(id) | UserAction::Cancel(id) => id,
    }
}

/// Apply `action` to the stored job list. Same rules as a live scheduler:
/// only Timeout jobs accept either action. A retried job goes back to Queued
/// with a fresh time budget and keeps its remote task id.
pub(super) async fn apply_offline(
    store: &JobStore,
    action: &UserAction,
    now: i64,
    timeout_ms: i64,
) -> Result<()> {
    let mut jobs = store.load_all().await?;
    let id = target(action);
    let Some(pos) = jobs.iter().position(|j| &j.id == id) else {
        return Err(ActionError::NotFound(id.clone()).into());
    };
    if jobs[pos].status != JobStatus::Timeout {
        return Err(ActionError::NotTimedOut(id.clone()).into());
    }
    match action {
        UserAction::Retry(_) => {
            let job = &mut jobs[pos];
            job.status = JobStatus::Queued;
            job.timeout_at = now.saturating_add(timeout_ms);
            job.updated_at = now;
            job.error = None;
        }
        UserAction::Cancel(_) => {
            jobs.remove(pos);
        }
    }
    store.save_all(&jobs).await
}

pub async fn run_action(db: &StateDb, cfg: &GenqConfig, action: UserAction) -> Result<()> {
    let verb = match action {
        UserAction::Retry(_) => "retry",
        UserAction::Cancel(_) => "cancel",
    };
    let id = target(&action).clone();

    let cmd = ControlCommand::Action(action.clone());
    if let Ok(path) = default_control_socket_path() {
        match send_command(&path, &cmd).await? {
            Some(ControlReply::Ok) => {
                println!("Scheduler accepted {verb} for {id}");
                return Ok(());
            }
            Some(ControlReply::Rejected(reason)) => bail!("scheduler rejected {verb}: {reason}"),
            None => {}
        }
    }

    let settings = cfg.queue_settings();
    let election = LeaderElection::new(db.clone(), TabId::generate(), settings.lease_ttl());
    if let Some(lease) = election.current().await? {
        if !lease.is_stale(unix_millis(), settings.lease_ttl()) {
            bail!(
                "scheduler {} is running but its control socket is unreachable; try again later",
                lease.tab_id
            );
        }
    }

    let timeout_ms = settings.timeout().as_millis() as i64;
    apply_offline(&JobStore::new(db.clone()), &action, unix_millis(), timeout_ms).await?;
    match action {
        UserAction::Retry(_) => println!("Re-queued job {id}"),
        UserAction::Cancel(_) => println!("Cancelled job {id}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use genq_core::job::{ImageParams, Job, JobPayload};

    async fn store_with(status: JobStatus) -> (tempfile::TempDir, JobStore, Job) {
        let dir = tempfile::tempdir().unwrap();
        let db = StateDb::open_at(dir.path().join("state.db")).await.unwrap();
        let store = JobStore::new(db);
        let mut job = Job::new(
            JobPayload::image(ImageParams {
                prompt: "p".to_string(),
                ..ImageParams::default()
            }),
            None,
            1_000,
            10,
        );
        job.status = status;
        job.task_id = Some("T9".to_string());
        job.error = Some("timed out".to_string());
        store.save_all(std::slice::from_ref(&job)).await.unwrap();
        (dir, store, job)
    }

    #[tokio::test]
    async fn retry_requeues_with_fresh_budget_and_keeps_task() {
        let (_dir, store, job) = store_with(JobStatus::Timeout).await;
        apply_offline(&store, &UserAction::Retry(job.id.clone()), 5_000, 600)
            .await
            .unwrap();

        let jobs = store.load_all().await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Queued);
        assert_eq!(jobs[0].timeout_at, 5_600);
        assert_eq!(jobs[0].task_id.as_deref(), Some("T9"));
        assert!(jobs[0].error.is_none());
    }

    #[tokio::test]
    async fn cancel_removes_the_job() {
        let (_dir, store, job) = store_with(JobStatus::Timeout).await;
        apply_offline(&store, &UserAction::Cancel(job.id.clone()), 5_000, 600)
            .await
            .unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn actions_require_timeout_status() {
        let (_dir, store, job) = store_with(JobStatus::Processing).await;
        let err = apply_offline(&store, &UserAction::Cancel(job.id.clone()), 5_000, 600)
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ActionError>(),
            Some(&ActionError::NotTimedOut(job.id.clone()))
        );
        assert_eq!(store.load_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let (_dir, store, _job) = store_with(JobStatus::Timeout).await;
        let missing = JobId::from("job_0_none");
        let err = apply_offline(&store, &UserAction::Retry(missing.clone()), 5_000, 600)
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ActionError>(),
            Some(&ActionError::NotFound(missing))
        );
    }
}
